//! Collector configuration.
//!
//! Built from defaults, then an optional TOML file, then `VODSYNC_*`
//! environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vodsync_fetch::pager::PagerConfig;
use vodsync_fetch::retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Directory holding the snapshot files.
    pub data_dir: PathBuf,
    /// Snapshot base name: `<catalog>.db`, `<catalog>.staging.db`, ...
    pub catalog: String,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub page_delay_ms: u64,
    pub max_pages: u32,
    /// Sources fetched at the same time.
    pub fetch_concurrency: usize,
    /// Unmapped drops logged individually per source.
    pub skip_report_limit: u64,
    pub detail_batch_size: usize,
    /// Batches buffered between fetch tasks and the writer.
    pub channel_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            catalog: "vod".to_string(),
            request_timeout_secs: 30,
            max_attempts: 3,
            retry_base_ms: 500,
            page_delay_ms: 500,
            max_pages: 10_000,
            fetch_concurrency: 1,
            skip_report_limit: 5,
            detail_batch_size: 20,
            channel_capacity: 16,
        }
    }
}

impl CollectorConfig {
    /// Defaults, overlaid with `path` if given, overlaid with the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from variables returned by `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigLoadError> {
        if let Some(v) = lookup("VODSYNC_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("VODSYNC_CATALOG") {
            self.catalog = v;
        }
        parse_env(&lookup, "VODSYNC_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs)?;
        parse_env(&lookup, "VODSYNC_MAX_ATTEMPTS", &mut self.max_attempts)?;
        parse_env(&lookup, "VODSYNC_RETRY_BASE_MS", &mut self.retry_base_ms)?;
        parse_env(&lookup, "VODSYNC_PAGE_DELAY_MS", &mut self.page_delay_ms)?;
        parse_env(&lookup, "VODSYNC_MAX_PAGES", &mut self.max_pages)?;
        parse_env(&lookup, "VODSYNC_FETCH_CONCURRENCY", &mut self.fetch_concurrency)?;
        parse_env(&lookup, "VODSYNC_SKIP_REPORT_LIMIT", &mut self.skip_report_limit)?;
        parse_env(&lookup, "VODSYNC_DETAIL_BATCH_SIZE", &mut self.detail_batch_size)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_ms),
        }
    }

    pub fn pager_config(&self) -> PagerConfig {
        PagerConfig {
            retry: self.retry_policy(),
            max_pages: self.max_pages,
            page_delay: Duration::from_millis(self.page_delay_ms),
        }
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    slot: &mut T,
) -> Result<(), ConfigLoadError> {
    if let Some(value) = lookup(var) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::Env { var, value })?;
    }
    Ok(())
}
