//! # Structured Logging Module
//!
//! Environment-aware structured logging for batch runs. Console output by default,
//! JSON lines when `LOG_FORMAT=json` (for log shipping from batch hosts).

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize console logging only.
///
/// Safe to call more than once; only the first call installs a subscriber, and an
/// already-installed global subscriber is left untouched.
pub fn init_console_only() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let use_ansi = IsTerminal::is_terminal(&std::io::stdout());

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(use_ansi)
            .with_filter(EnvFilter::new(&log_level));

        let subscriber = tracing_subscriber::registry().with(console_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                ansi_colors = use_ansi,
                "Console logging initialized"
            );
        }
    });
}

/// Initialize tracing, honoring `LOG_FORMAT=json` for structured output
pub fn init_tracing() {
    if !json_format_requested() {
        init_console_only();
        return;
    }

    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let json_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_current_span(true)
            .with_filter(EnvFilter::new(&log_level));

        if tracing_subscriber::registry()
            .with(json_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(environment = %environment, format = "json", "Structured logging initialized");
        }
    });
}

fn json_format_requested() -> bool {
    std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("BATCH_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment variables or environment defaults
fn get_log_level(environment: &str) -> String {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        return level.to_lowercase();
    }

    if let Ok(level) = std::env::var("RUST_LOG") {
        return level.to_lowercase();
    }

    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log job-level operations
#[macro_export]
macro_rules! log_job {
    ($level:ident, $operation:expr, job_name: $job_name:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            job_name = %$job_name,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "JOB_{}", $operation
        );
    };
    ($level:ident, $operation:expr $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "JOB_{}", $operation
        );
    };
    ($level:ident, $operation:expr, $($key:ident: $value:expr),+ $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "JOB_{}", $operation
        );
    };
}

/// Log partition-level operations
#[macro_export]
macro_rules! log_partition {
    ($level:ident, $operation:expr, partition: $partition:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            partition = %$partition,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "PARTITION_{} ({})", $operation, $partition
        );
    };
    ($level:ident, $operation:expr $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "PARTITION_{}", $operation
        );
    };
}

/// Log chunk-level operations
#[macro_export]
macro_rules! log_chunk {
    ($level:ident, $operation:expr, step: $step:expr, chunk: $chunk:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            step = %$step,
            chunk = $chunk,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "CHUNK_{}", $operation
        );
    };
    ($level:ident, $operation:expr $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "CHUNK_{}", $operation
        );
    };
}
