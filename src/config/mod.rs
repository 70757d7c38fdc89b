//! # Batch Configuration System
//!
//! Explicit configuration object for a batch job: chunk size, throttle limit, partitioning,
//! read strategy and execution mode. The runnable pipeline is constructed directly from
//! this struct.
//!
//! ## Sources
//!
//! Loaded by [`ConfigManager`] from layered sources, later ones winning:
//!
//! 1. `batch.toml` in the configuration directory
//! 2. `batch.{environment}.toml`
//! 3. Environment variables `BATCH__<SECTION>__<KEY>` (e.g. `BATCH__STEP__CHUNK_SIZE=10`)
//!
//! Every field has a default, so an empty directory yields [`BatchConfig::default`].
//!
//! ```rust
//! use batch_core::config::BatchConfig;
//!
//! let config = BatchConfig::default();
//! assert_eq!(config.step.chunk_size, 15);
//! assert!(config.validate().is_ok());
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::defaults;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `batch.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    pub job: JobConfig,
    pub step: StepConfig,
    pub pool: PoolConfig,
    pub inactive_user: InactiveUserConfig,
    pub retry: RetryConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct JobConfig {
    /// Reject launching a job instance whose identifying parameters already ran
    pub prevent_restart: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            prevent_restart: true,
        }
    }
}

/// How chunks of a step are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One sequential chunk runner per partition, partitions run concurrently
    #[default]
    Partitioned,
    /// A single unpartitioned step whose chunks run on concurrent workers
    MultiThreaded,
}

/// How a paging reader advances over a filtered, mutating record set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStrategy {
    /// Always read from offset 0; committed records drop out of the filter
    #[default]
    FrozenOffset,
    /// Snapshot matching ids once, then page over id slices
    SnapshotIdRange,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StepConfig {
    /// Commit interval: items per atomic write
    pub chunk_size: usize,
    /// Reader page size, defaults to the chunk size
    pub page_size: Option<usize>,
    /// Optional limit on one read-process-write cycle
    pub chunk_timeout_ms: Option<u64>,
    pub read_strategy: ReadStrategy,
    pub mode: ExecutionMode,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            page_size: None,
            chunk_timeout_ms: None,
            read_strategy: ReadStrategy::default(),
            mode: ExecutionMode::default(),
        }
    }
}

impl StepConfig {
    pub fn effective_page_size(&self) -> usize {
        self.page_size.unwrap_or(self.chunk_size)
    }

    pub fn chunk_timeout(&self) -> Option<Duration> {
        self.chunk_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Total execution slots shared by every step of the orchestrator
    pub pool_size: usize,
    /// Maximum concurrently active workers for one step
    pub throttle_limit: usize,
    /// Advisory partition count handed to the partitioner
    pub grid_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: defaults::POOL_SIZE,
            throttle_limit: defaults::THROTTLE_LIMIT,
            grid_size: defaults::GRID_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct InactiveUserConfig {
    /// Months without update after which an active user becomes inactive
    pub inactive_after_months: u32,
}

impl Default for InactiveUserConfig {
    fn default() -> Self {
        Self {
            inactive_after_months: defaults::INACTIVE_AFTER_MONTHS,
        }
    }
}

/// Backoff settings for the explicit retrying writer wrapper
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Wrap the job's writers in a retrying writer; off by default
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            backoff_multiplier: defaults::RETRY_BACKOFF_MULTIPLIER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL; `${DATABASE_URL}` expands from the environment
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: defaults::DATABASE_MAX_CONNECTIONS,
        }
    }
}

impl DatabaseConfig {
    /// Resolve the connection URL, expanding `${DATABASE_URL}`
    pub fn database_url(&self) -> ConfigResult<String> {
        match self.url.as_deref() {
            Some("${DATABASE_URL}") | None => std::env::var("DATABASE_URL").map_err(|_| {
                ConfigurationError::missing_required_field("url", "database (or DATABASE_URL)")
            }),
            Some(url) => Ok(url.to_string()),
        }
    }
}

impl BatchConfig {
    /// Validate cross-field constraints
    pub fn validate(&self) -> ConfigResult<()> {
        if self.step.chunk_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "step.chunk_size",
                self.step.chunk_size,
                "chunk size must be at least 1",
            ));
        }

        if self.step.page_size == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "step.page_size",
                0,
                "page size must be at least 1",
            ));
        }

        if self.step.chunk_timeout_ms == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "step.chunk_timeout_ms",
                0,
                "omit the timeout instead of setting it to zero",
            ));
        }

        if self.pool.throttle_limit == 0 {
            return Err(ConfigurationError::invalid_value(
                "pool.throttle_limit",
                0,
                "throttle limit must be at least 1",
            ));
        }

        if self.pool.throttle_limit >= self.pool.pool_size {
            return Err(ConfigurationError::invalid_value(
                "pool.throttle_limit",
                self.pool.throttle_limit,
                format!(
                    "throttle limit must be strictly less than pool size ({})",
                    self.pool.pool_size
                ),
            ));
        }

        if self.pool.grid_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "pool.grid_size",
                0,
                "grid size must be at least 1",
            ));
        }

        if self.step.mode == ExecutionMode::MultiThreaded
            && self.step.read_strategy == ReadStrategy::FrozenOffset
        {
            return Err(ConfigurationError::invalid_value(
                "step.read_strategy",
                "frozen_offset",
                "multi_threaded mode requires snapshot_id_range: concurrent workers would read the same uncommitted front page",
            ));
        }

        if self.inactive_user.inactive_after_months == 0 {
            return Err(ConfigurationError::invalid_value(
                "inactive_user.inactive_after_months",
                0,
                "threshold must be at least one month",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                0,
                "at least one attempt is required",
            ));
        }

        Ok(())
    }
}
