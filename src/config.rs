//! Configuration file loading

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use auditscan_scan::{DEFAULT_BATCH_SIZE, DEFAULT_QUEUE_CAPACITY, PipelineConfig};
use auditscan_server::ServerConfig;
use auditscan_source::SourceConfig;

/// Config file read when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "auditscan.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub scan: ScanConfig,
    pub server: ServerConfig,
}

/// `[scan]` section
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub batch_size: usize,
    pub queue_capacity: usize,
    pub shutdown_timeout_secs: u64,
    pub track_durations: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_timeout_secs: 5,
            track_durations: false,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("scan.batch_size must be greater than 0".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("scan.queue_capacity must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            queue_capacity: self.queue_capacity,
            batch_size: self.batch_size,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

/// Load configuration.
///
/// An explicit path must exist. Without one, `auditscan.toml` in the working
/// directory is used if present, defaults otherwise.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                return Ok(Config::default());
            }
            default
        }
    };

    let contents = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
    parse(&contents).with_context(|| format!("Invalid config file: {:?}", config_path))
}

fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("Failed to parse config")?;
    config
        .scan
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;
    Ok(config)
}
