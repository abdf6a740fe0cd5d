//! # Backoff Calculator
//!
//! Computes how long an operation waits before a failed stage is retried.
//!
//! - **Stage-requested backoff**: a stage may attach a retry hint to a
//!   recoverable error (e.g. "dependency unavailable, retry in 20s"). The hint
//!   wins over the policy, capped at the maximum delay.
//! - **Fixed**: every retry waits `base_delay`.
//! - **Exponential**: `base_delay * multiplier^(attempt - 1)`, capped, with
//!   optional jitter to keep many failing operations from retrying in lockstep.

use crate::config::{RetryConfig, RetryStrategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffCalculatorConfig {
    pub strategy: RetryStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_enabled: bool,
    /// Maximum jitter percentage (0.0 to 1.0)
    pub max_jitter: f64,
}

impl Default for BackoffCalculatorConfig {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for BackoffCalculatorConfig {
    fn from(config: &RetryConfig) -> Self {
        Self {
            strategy: config.strategy,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            multiplier: config.multiplier,
            jitter_enabled: config.jitter_enabled,
            max_jitter: config.max_jitter,
        }
    }
}

/// Source of the computed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    StageRequested,
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffResult {
    pub delay: Duration,
    pub backoff_type: BackoffType,
}

#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    config: BackoffCalculatorConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffCalculatorConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(BackoffCalculatorConfig::default())
    }

    pub fn config(&self) -> &BackoffCalculatorConfig {
        &self.config
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn calculate(&self, attempt: u32, requested: Option<Duration>) -> BackoffResult {
        if let Some(requested) = requested {
            return BackoffResult {
                delay: requested.min(self.config.max_delay),
                backoff_type: BackoffType::StageRequested,
            };
        }

        match self.config.strategy {
            RetryStrategy::Fixed => BackoffResult {
                delay: self.config.base_delay.min(self.config.max_delay),
                backoff_type: BackoffType::Fixed,
            },
            RetryStrategy::Exponential => BackoffResult {
                delay: self.exponential_delay(attempt),
                backoff_type: BackoffType::Exponential,
            },
        }
    }

    fn exponential_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.config.multiplier.powi(exponent);
        let max_secs = self.config.max_delay.as_secs_f64();

        let mut delay_secs = (self.config.base_delay.as_secs_f64() * factor).min(max_secs);
        if self.config.jitter_enabled && self.config.max_jitter > 0.0 {
            delay_secs = (delay_secs * (1.0 + fastrand::f64() * self.config.max_jitter)).min(max_secs);
        }

        if delay_secs.is_finite() {
            Duration::from_secs_f64(delay_secs.max(0.0))
        } else {
            self.config.max_delay
        }
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exponential(jitter: bool) -> BackoffCalculator {
        BackoffCalculator::new(BackoffCalculatorConfig {
            strategy: RetryStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_enabled: jitter,
            max_jitter: 0.1,
        })
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let calculator = exponential(false);
        assert_eq!(calculator.calculate(1, None).delay, Duration::from_secs(1));
        assert_eq!(calculator.calculate(2, None).delay, Duration::from_secs(2));
        assert_eq!(calculator.calculate(4, None).delay, Duration::from_secs(8));
        assert_eq!(calculator.calculate(30, None).delay, Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let calculator = exponential(true);
        for _ in 0..100 {
            let delay = calculator.calculate(3, None).delay;
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_secs_f64(4.4));
        }
    }

    #[test]
    fn test_fixed_strategy() {
        let calculator = BackoffCalculator::new(BackoffCalculatorConfig {
            strategy: RetryStrategy::Fixed,
            base_delay: Duration::from_secs(20),
            ..BackoffCalculatorConfig::default()
        });
        let result = calculator.calculate(7, None);
        assert_eq!(result.delay, Duration::from_secs(20));
        assert_eq!(result.backoff_type, BackoffType::Fixed);
    }

    #[test]
    fn test_stage_requested_delay_wins_but_is_capped() {
        let calculator = exponential(false);
        let result = calculator.calculate(5, Some(Duration::from_secs(20)));
        assert_eq!(result.delay, Duration::from_secs(20));
        assert_eq!(result.backoff_type, BackoffType::StageRequested);

        let capped = calculator.calculate(1, Some(Duration::from_secs(3600)));
        assert_eq!(capped.delay, Duration::from_secs(60));
    }
}
