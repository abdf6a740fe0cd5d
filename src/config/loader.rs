//! Configuration Loader
//!
//! Environment-aware loading: defaults, base file, environment file, then
//! `PROVISIONER__*` environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::EngineConfig;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_STEM: &str = "provisioner";
const ENV_PREFIX: &str = "PROVISIONER";
const ENV_SEPARATOR: &str = "__";

pub struct ConfigManager {
    config: EngineConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_overrides(config_dir, environment, None)
    }

    /// Load configuration with an explicit variable map standing in for the
    /// process environment. Tests use this to avoid mutating global state.
    pub fn load_with_overrides(
        config_dir: Option<PathBuf>,
        environment: &str,
        overrides: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let explicit = config_dir.is_some();
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        // Only an explicitly requested directory must exist; the default
        // location falls back to built-in defaults.
        if explicit && !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound {
                path: config_directory,
            });
        }

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading engine configuration"
        );

        let config = Self::build(&config_directory, environment, overrides)?;
        config.validate()?;

        info!(
            environment = environment,
            max_concurrent_operations = config.scheduler.max_concurrent_operations,
            retry_strategy = ?config.retry.strategy,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn build(
        config_directory: &Path,
        environment: &str,
        overrides: Option<HashMap<String, String>>,
    ) -> ConfigResult<EngineConfig> {
        let base = config_directory.join(format!("{BASE_FILE_STEM}.toml"));
        let env_file = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        let env_source = Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(overrides);

        let merged = Config::builder()
            .add_source(File::from(base).format(FileFormat::Toml).required(false))
            .add_source(File::from(env_file).format(FileFormat::Toml).required(false))
            .add_source(env_source)
            .build()?;

        merged
            .try_deserialize::<EngineConfig>()
            .map_err(|e| ConfigurationError::DeserializationError {
                error: e.to_string(),
            })
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn detect_environment() -> String {
        std::env::var("PROVISIONER_ENV").unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        std::env::var("PROVISIONER_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}
