//! Archive chunks and object keys.
//!
//! One page of flattened rows becomes one [`ArchiveChunk`]: newline-delimited
//! JSON, gzip-compressed at best compression. Sealing the chunk computes a
//! CRC-32 (IEEE) checksum of the compressed bytes, which goes into the
//! [`ObjectKey`] so that distinct payloads never share a key and identical
//! payloads always do, without any coordination between workers.
//!
//! # Key Format
//!
//! ```text
//! {database}/{table}/{partition}/{YYYYMMDD}/{from}_{to}_{crc32:08x}.log.gz
//! TestDB/IoT/cpu/20210223/20210223T150426Z_20210223T150456Z_0ffab703.log.gz
//! ```
//!
//! The day directory is taken from the chunk's `from` bound. Restore tooling
//! depends on this layout; do not change it.

use std::fmt;
use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::flatten::FlattenedRow;

const DAY_FORMAT: &str = "%Y%m%d";
const FILENAME_TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// An in-progress archive for one page.
pub struct ArchiveChunk {
    encoder: GzEncoder<Vec<u8>>,
    rows: u64,
    line: Vec<u8>,
}

impl ArchiveChunk {
    pub fn new() -> Self {
        Self {
            encoder: GzEncoder::new(Vec::new(), Compression::best()),
            rows: 0,
            line: Vec::new(),
        }
    }

    /// Serialize one row as a JSON line and append it.
    ///
    /// The row is fully serialized before anything is written, so a failed
    /// row leaves the archive untouched and uncounted.
    pub fn push_row(&mut self, row: &FlattenedRow) -> Result<()> {
        self.line.clear();
        serde_json::to_writer(&mut self.line, row).context("marshal row")?;
        self.line.push(b'\n');
        self.encoder
            .write_all(&self.line)
            .context("compress row")?;
        self.rows += 1;
        Ok(())
    }

    /// Rows appended so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Finish the gzip stream and checksum the compressed bytes.
    pub fn seal(self) -> Result<SealedChunk> {
        let bytes = self.encoder.finish().context("finish gzip stream")?;
        let checksum = crc32fast::hash(&bytes);
        Ok(SealedChunk {
            bytes,
            rows: self.rows,
            checksum,
        })
    }
}

impl Default for ArchiveChunk {
    fn default() -> Self {
        Self::new()
    }
}

/// A finished, compressed chunk ready for upload.
#[derive(Debug, Clone)]
pub struct SealedChunk {
    pub bytes: Vec<u8>,
    pub rows: u64,
    /// CRC-32 (IEEE) of `bytes`.
    pub checksum: u32,
}

/// Deterministic object key for a sealed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(
        database: &str,
        table: &str,
        partition: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        checksum: u32,
    ) -> Self {
        Self(format!(
            "{}/{}/{}/{}/{}_{}_{:08x}.log.gz",
            database,
            table,
            partition,
            from.format(DAY_FORMAT),
            from.format(FILENAME_TIME_FORMAT),
            to.format(FILENAME_TIME_FORMAT),
            checksum
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
