//! Error types for the batch engine.
//!
//! The taxonomy follows the boundaries at which a fault is contained:
//!
//! - [`StartupError`] aborts a job before any partition starts (no side effects)
//! - [`ReaderError`] / [`WriterError`] abort the current chunk only; the owning partition
//!   terminates as failed while earlier committed chunks stay committed
//! - [`ListenerError`] is logged and never changes a run status

use crate::config::ConfigurationError;
use crate::store::StoreError;
use thiserror::Error;

/// Faults detected before any partition is dispatched
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StartupError {
    #[error("Missing required job parameter '{name}'")]
    MissingParameter { name: String },

    #[error("Invalid job parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Job instance '{job_name}' with identifying parameters {instance_key} already ran and restart is prevented")]
    RestartPrevented {
        job_name: String,
        instance_key: String,
    },

    #[error("Job instance '{job_name}' with identifying parameters {instance_key} cannot be relaunched: last run is {status}")]
    InstanceNotRestartable {
        job_name: String,
        instance_key: String,
        status: String,
    },

    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Missing execution context key '{key}' for partition '{partition}'")]
    MissingContextKey { partition: String, key: String },
}

/// Source fault raised while reading the next item
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Reader fault: {message}")]
pub struct ReaderError {
    pub message: String,
}

impl ReaderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Commit fault raised while flushing a chunk
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Writer fault: {message}")]
pub struct WriterError {
    pub message: String,
}

impl WriterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Fault raised by a lifecycle hook
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Listener '{hook}' failed: {message}")]
pub struct ListenerError {
    pub hook: String,
    pub message: String,
}

impl From<StoreError> for ReaderError {
    fn from(error: StoreError) -> Self {
        ReaderError::new(error.to_string())
    }
}

impl From<StoreError> for WriterError {
    fn from(error: StoreError) -> Self {
        WriterError::new(error.to_string())
    }
}

impl From<ConfigurationError> for StartupError {
    fn from(error: ConfigurationError) -> Self {
        StartupError::InvalidConfiguration(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    #[error("Startup fault: {0}")]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error("Chunk {chunk_index} exceeded timeout of {timeout_ms}ms")]
    ChunkTimeout { chunk_index: usize, timeout_ms: u64 },

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("State transition error: {0}")]
    StateTransition(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ConfigurationError> for BatchError {
    fn from(error: ConfigurationError) -> Self {
        BatchError::Configuration(error.to_string())
    }
}

impl BatchError {
    /// Whether the fault aborted a chunk (as opposed to the whole job)
    pub fn is_chunk_fault(&self) -> bool {
        matches!(
            self,
            Self::Reader(_) | Self::Writer(_) | Self::ChunkTimeout { .. }
        )
    }
}

pub type BatchResult<T> = anyhow::Result<T, BatchError>;
