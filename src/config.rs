//! Configuration file.
//!
//! Everything is optional; a missing file or section falls back to the
//! defaults below, and command-line flags override whatever the file says.
//!
//! ```toml
//! [aws]
//! region = "eu-west-1"
//! # query_endpoint = "query-cell2.timestream.eu-west-1.amazonaws.com"
//! # s3_endpoint = "http://localhost:9000"
//! # path_style = true
//!
//! [backup]
//! database = "TestDB"
//! table = "IoT"
//! column = "measure_name"
//! bucket = "test-playday-bucket"
//! rows = 1000
//! dry_run = false
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AwsConfig {
    #[serde(default = "default_region")]
    pub region: String,
    /// Fixed Timestream query endpoint; skips endpoint discovery.
    #[serde(default)]
    pub query_endpoint: Option<String>,
    /// S3-compatible endpoint (MinIO, LocalStack).
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    #[serde(default)]
    pub path_style: bool,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            query_endpoint: None,
            s3_endpoint: None,
            path_style: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_column")]
    pub column: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_rows")]
    pub rows: u64,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            table: default_table(),
            column: default_column(),
            bucket: default_bucket(),
            rows: default_rows(),
            dry_run: false,
        }
    }
}

fn default_region() -> String {
    "eu-west-1".to_string()
}
fn default_database() -> String {
    "TestDB".to_string()
}
fn default_table() -> String {
    "IoT".to_string()
}
fn default_column() -> String {
    "measure_name".to_string()
}
fn default_bucket() -> String {
    "test-playday-bucket".to_string()
}
fn default_rows() -> u64 {
    1000
}

impl Config {
    /// Check the values a run cannot do without.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("aws.region", &self.aws.region),
            ("backup.database", &self.backup.database),
            ("backup.table", &self.backup.table),
            ("backup.column", &self.backup.column),
            ("backup.bucket", &self.backup.bucket),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                anyhow::bail!("{} must not be empty", name);
            }
        }

        // Interpolated unquoted into the query text.
        if !is_identifier(&self.backup.column) {
            anyhow::bail!(
                "backup.column must be a plain column name, got '{}'",
                self.backup.column
            );
        }

        if self.backup.rows == 0 {
            anyhow::bail!("backup.rows must be > 0");
        }

        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Read and parse a config file.
///
/// Not validated here: command-line flags may still override file values,
/// so callers run [`Config::validate`] once everything is merged.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    Ok(config)
}
