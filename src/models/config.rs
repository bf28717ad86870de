// src/models/config.rs

//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upstream catalog and retry settings
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Worker pool settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Frontier crawl settings
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// On-disk layout settings
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.fetcher.base_url)?;
        Url::parse(&self.fetcher.latest_url)?;
        if self.fetcher.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetcher.user_agent is empty"));
        }
        if self.fetcher.timeout_secs == 0 {
            return Err(AppError::validation("fetcher.timeout_secs must be > 0"));
        }
        if self.fetcher.max_attempts == 0 {
            return Err(AppError::validation("fetcher.max_attempts must be > 0"));
        }
        if self.scheduler.concurrency == 0 {
            return Err(AppError::validation("scheduler.concurrency must be > 0"));
        }
        if self.crawl.max_consecutive_misses == 0 {
            return Err(AppError::validation(
                "crawl.max_consecutive_misses must be > 0",
            ));
        }
        if self.storage.block_size == 0 {
            return Err(AppError::validation("storage.block_size must be > 0"));
        }
        Ok(())
    }
}

/// Upstream catalog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Base URL; a record is fetched from `{base_url}/{id}`
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Endpoint listing the most recently created items
    #[serde(default = "defaults::latest_url")]
    pub latest_url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-attempt request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Attempts made for a request that times out
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Exponential backoff base between timed-out attempts
    #[serde(default = "defaults::backoff_base")]
    pub backoff_base: u32,

    /// Length of one backoff unit in milliseconds
    #[serde(default = "defaults::backoff_unit_ms")]
    pub backoff_unit_ms: u64,
}

impl FetcherConfig {
    /// Delay to wait after the given (1-based) failed attempt.
    ///
    /// With the defaults this yields 2s, 4s, 8s, ...
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.backoff_base).saturating_pow(attempt);
        Duration::from_millis(factor.saturating_mul(self.backoff_unit_ms))
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            latest_url: defaults::latest_url(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_attempts: defaults::max_attempts(),
            backoff_base: defaults::backoff_base(),
            backoff_unit_ms: defaults::backoff_unit_ms(),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum concurrent fetches
    #[serde(default = "defaults::concurrency")]
    pub concurrency: usize,

    /// Delay after each completed task in milliseconds
    #[serde(default)]
    pub request_delay_ms: u64,

    /// Consecutive rate-limited/error outcomes that stop dispatch (0 = never)
    #[serde(default = "defaults::max_consecutive_failures")]
    pub max_consecutive_failures: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::concurrency(),
            request_delay_ms: 0,
            max_consecutive_failures: defaults::max_consecutive_failures(),
        }
    }
}

/// Frontier crawl settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Consecutive not-found probes that end a crawl
    #[serde(default = "defaults::max_consecutive_misses")]
    pub max_consecutive_misses: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_consecutive_misses: defaults::max_consecutive_misses(),
        }
    }
}

/// On-disk layout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for records and ledgers
    #[serde(default = "defaults::output_dir")]
    pub output_dir: PathBuf,

    /// Number of ids grouped into one bucket directory
    #[serde(default = "defaults::block_size")]
    pub block_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: defaults::output_dir(),
            block_size: defaults::block_size(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Fetcher defaults
    pub fn base_url() -> String {
        "https://civitai.com/api/v1/models".into()
    }
    pub fn latest_url() -> String {
        "https://civitai.com/api/v1/models?sort=Newest&limit=100".into()
    }
    pub fn user_agent() -> String {
        concat!("dumptool/", env!("CARGO_PKG_VERSION")).into()
    }
    pub fn timeout() -> u64 {
        15
    }
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn backoff_base() -> u32 {
        2
    }
    pub fn backoff_unit_ms() -> u64 {
        1000
    }

    // Scheduler defaults
    pub fn concurrency() -> usize {
        5
    }
    pub fn max_consecutive_failures() -> usize {
        50
    }

    // Crawl defaults
    pub fn max_consecutive_misses() -> u32 {
        200
    }

    // Storage defaults
    pub fn output_dir() -> PathBuf {
        PathBuf::from("civitai-meta")
    }
    pub fn block_size() -> u64 {
        10_000
    }
}
