//! Configuration Loader
//!
//! Environment-aware loading: base file, environment override file, then
//! `BATCH__`-prefixed environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::BatchConfig;
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const BASE_FILE_STEM: &str = "batch";
const ENV_PREFIX: &str = "BATCH";

#[derive(Debug)]
pub struct ConfigManager {
    config: BatchConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration from `./config` with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful in tests that must not depend on process-wide environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading batch configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_layers(&config_directory, environment)?;
        config.validate()?;

        crate::log_job!(info, "configuration_loaded",
            environment: environment,
            chunk_size: config.step.chunk_size,
            throttle_limit: config.pool.throttle_limit,
            mode: config.step.mode
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn load_layers(directory: &Path, environment: &str) -> ConfigResult<BatchConfig> {
        let base = directory.join(format!("{BASE_FILE_STEM}.toml"));
        let overrides = directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        Config::builder()
            .add_source(File::from(base).required(false))
            .add_source(File::from(overrides).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|config| config.try_deserialize::<BatchConfig>())
            .map_err(|e| ConfigurationError::load(directory.display().to_string(), e))
    }

    fn detect_environment() -> String {
        std::env::var("BATCH_ENV")
            .or_else(|_| std::env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration rendered for logging with the database URL masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        if let Some(url) = value.pointer_mut("/database/url") {
            if !url.is_null() {
                *url = serde_json::Value::String("***REDACTED***".to_string());
            }
        }
        value
    }
}
