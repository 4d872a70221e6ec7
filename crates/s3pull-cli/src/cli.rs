//! Argument parsing and config assembly for the s3pull binary.

use anyhow::Result;
use clap::Parser;
use s3pull_core::config::PullConfig;
use std::path::PathBuf;

/// Segmented, resumable downloader for S3-compatible object stores.
#[derive(Debug, Parser)]
#[command(name = "s3pull")]
#[command(about = "s3pull: multi-connection resumable S3 object downloader", long_about = None)]
pub struct Cli {
    /// Bucket holding the object.
    pub bucket: String,

    /// Object key (a leading "<bucket>/" prefix is stripped).
    pub object_key: String,

    /// AWS region.
    #[arg(long)]
    pub region: Option<String>,

    /// Endpoint URL override for S3-compatible stores.
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Named AWS credentials profile.
    #[arg(long)]
    pub profile: Option<String>,

    /// Number of concurrent segment connections.
    #[arg(short = 'n', long)]
    pub concurrency: Option<usize>,

    /// Directory for scratch files, the final file, and the log.
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Log file name inside the download directory.
    #[arg(long)]
    pub log_file_name: Option<String>,

    /// Optional TOML config file; flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Merge the optional config file with command-line overrides.
    pub fn into_config(self) -> Result<PullConfig> {
        let mut cfg = match &self.config {
            Some(path) => PullConfig::load_from(path)?,
            None => PullConfig::default(),
        };

        cfg.bucket = self.bucket;
        cfg.object_key = self.object_key;
        if let Some(region) = self.region {
            cfg.region = region;
        }
        if let Some(endpoint) = self.endpoint {
            cfg.endpoint = Some(endpoint);
        }
        if let Some(profile) = self.profile {
            cfg.profile = Some(profile);
        }
        if let Some(concurrency) = self.concurrency {
            cfg.concurrency = concurrency;
        }
        if let Some(dir) = self.download_dir {
            cfg.download_dir = dir;
        }
        if let Some(name) = self.log_file_name {
            cfg.log_file_name = Some(name);
        }

        cfg.validate()?;
        Ok(cfg)
    }
}
