//! Engine configuration: target object, transport tuning, and file layout.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for one download run.
///
/// Deserializable from a TOML file; the CLI overrides individual fields from
/// flags. `bucket` and `object_key` are required, everything else has a
/// default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object key. A leading `<bucket>/` prefix is tolerated and stripped.
    pub object_key: String,
    /// AWS region.
    pub region: String,
    /// Endpoint override for S3-compatible stores (forces path-style).
    pub endpoint: Option<String>,
    /// Named credentials profile; the SDK's default chain applies otherwise.
    pub profile: Option<String>,
    /// Number of concurrent segment connections.
    pub concurrency: usize,
    /// Directory receiving scratch files, the final file, and the log.
    pub download_dir: PathBuf,
    /// Log file name override; a timestamped name is generated when unset.
    pub log_file_name: Option<String>,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            object_key: String::new(),
            region: "ap-east-1".to_string(),
            endpoint: None,
            profile: None,
            concurrency: 10,
            download_dir: default_download_dir(),
            log_file_name: None,
        }
    }
}

fn default_download_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join("files")
}

impl PullConfig {
    /// Load configuration from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg: PullConfig = toml::from_str(&data)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(cfg)
    }

    /// The object key with any `<bucket>/` prefix stripped.
    pub fn normalized_key(&self) -> &str {
        let prefix_len = self.bucket.len() + 1;
        if !self.bucket.is_empty()
            && self.object_key.len() > prefix_len
            && self.object_key.starts_with(&self.bucket)
            && self.object_key.as_bytes()[self.bucket.len()] == b'/'
        {
            &self.object_key[prefix_len..]
        } else {
            &self.object_key
        }
    }

    /// Final path component of the key: scratch and final file basename.
    pub fn basename(&self) -> &str {
        let key = self.normalized_key();
        key.rsplit('/').next().unwrap_or(key)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.bucket.is_empty(), "bucket must not be empty");
        ensure!(!self.object_key.is_empty(), "object key must not be empty");
        ensure!(!self.basename().is_empty(), "object key has no file name component");
        ensure!(self.concurrency >= 1, "concurrency must be at least 1");
        Ok(())
    }
}
