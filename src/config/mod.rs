//! # Engine Configuration
//!
//! Layered configuration for the stage execution engine.
//!
//! ## Sources (later sources override earlier ones)
//!
//! 1. Built-in defaults (`EngineConfig::default()`)
//! 2. `config/provisioner.toml`
//! 3. `config/provisioner.<environment>.toml`
//! 4. Environment variables prefixed with `PROVISIONER__`, e.g.
//!    `PROVISIONER__SCHEDULER__MAX_CONCURRENT_OPERATIONS=16`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use provisioner_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let poll = manager.config().scheduler.poll_interval();
//! let workers = manager.config().scheduler.max_concurrent_operations;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scheduler loop settings
    pub scheduler: SchedulerConfig,

    /// Retry and backoff policy for recoverable stage failures
    pub retry: RetryConfig,

    /// Stage defaults applied when a stage definition leaves a value unset
    pub stages: StagesConfig,

    /// Stuck-operation detection
    pub monitoring: MonitoringConfig,

    /// Durable store connection
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,
    pub max_concurrent_operations: usize,
    pub batch_size: usize,
    pub shutdown_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_concurrent_operations: 8,
            batch_size: 32,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Backoff strategy for recoverable failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub strategy: RetryStrategy,
    pub base_delay_seconds: u64,
    pub max_delay_seconds: u64,
    pub multiplier: f64,
    pub jitter_enabled: bool,
    /// Maximum jitter as a fraction of the computed delay (0.0 - 1.0)
    pub max_jitter: f64,
    /// Consecutive recoverable failures tolerated on one stage; 0 means unbounded
    pub max_consecutive_failures: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            base_delay_seconds: 5,
            max_delay_seconds: 300,
            multiplier: 2.0,
            jitter_enabled: true,
            max_jitter: 0.1,
            max_consecutive_failures: 50,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_seconds)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StagesConfig {
    pub default_timeout_seconds: u64,
    /// Maximum time an operation may spend on one stage; 0 disables the limit
    pub default_time_limit_seconds: u64,
    /// Interval used by polling stages while their condition is unmet
    pub poll_interval_seconds: u64,
    /// Retry hint used when a stage dependency cannot be fetched
    pub dependency_retry_seconds: u64,
    pub installation_status: InstallationStatusBackend,
}

/// Where installation-waiting stages read progress from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationStatusBackend {
    #[default]
    Deployer,
    /// The installer's status ConfigMap on the managed cluster
    ClusterConfigMap,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 300,
            default_time_limit_seconds: 0,
            poll_interval_seconds: 30,
            dependency_retry_seconds: 20,
            installation_status: InstallationStatusBackend::Deployer,
        }
    }
}

impl StagesConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }

    pub fn default_time_limit(&self) -> Option<Duration> {
        (self.default_time_limit_seconds > 0)
            .then(|| Duration::from_secs(self.default_time_limit_seconds))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn dependency_retry(&self) -> Duration {
        Duration::from_secs(self.dependency_retry_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub stuck_operation_threshold_seconds: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            stuck_operation_threshold_seconds: 4 * 60 * 60,
        }
    }
}

impl MonitoringConfig {
    pub fn stuck_operation_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_operation_threshold_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

impl DatabaseConfig {
    /// Explicit URL, falling back to `DATABASE_URL`
    pub fn database_url(&self) -> Option<String> {
        self.url
            .clone()
            .filter(|url| !url.is_empty())
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.max_concurrent_operations == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.max_concurrent_operations",
                0,
                "at least one worker is required",
            ));
        }
        if self.scheduler.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.batch_size",
                0,
                "batch size must be positive",
            ));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.poll_interval_ms",
                0,
                "poll interval must be positive",
            ));
        }
        if self.stages.default_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "stages.default_timeout_seconds",
                0,
                "every stage invocation must be bounded by a timeout",
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.multiplier",
                self.retry.multiplier,
                "multiplier must be >= 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.max_jitter) {
            return Err(ConfigurationError::invalid_value(
                "retry.max_jitter",
                self.retry.max_jitter,
                "jitter must be within 0.0 and 1.0",
            ));
        }
        if self.retry.base_delay_seconds > self.retry.max_delay_seconds {
            return Err(ConfigurationError::invalid_value(
                "retry.base_delay_seconds",
                self.retry.base_delay_seconds,
                "base delay exceeds retry.max_delay_seconds",
            ));
        }
        Ok(())
    }
}
