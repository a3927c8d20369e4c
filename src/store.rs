//! Object stores that do not need the network.
//!
//! - [`InMemoryObjectStore`]: keeps archives in a map. Used by tests and
//!   handy for embedding the pipeline.
//! - [`LocalDirStore`]: writes archives under a directory, one file per key,
//!   as `<root>/<bucket>/<key>`. Selected with `--output-dir`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;

use crate::archive::ObjectKey;
use crate::traits::ObjectStore;

/// In-memory [`ObjectStore`].
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Keys stored in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .read()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn put(&self, bucket: &str, key: &ObjectKey, body: Vec<u8>) -> Result<String> {
        self.objects
            .write()
            .map_err(|_| anyhow!("in-memory object store lock poisoned"))?
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(format!("memory://{}/{}", bucket, key))
    }
}

/// [`ObjectStore`] backed by a local directory.
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, bucket: &str, key: &ObjectKey) -> Result<PathBuf> {
        let mut path = self.root.join(bucket);
        for segment in key.as_str().split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                bail!("key '{}' cannot be mapped to a file path", key);
            }
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    fn kind(&self) -> &str {
        "dir"
    }

    async fn put(&self, bucket: &str, key: &ObjectKey, body: Vec<u8>) -> Result<String> {
        let path = self.path_for(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path.display().to_string())
    }
}
