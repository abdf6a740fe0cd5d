//! # Stage Error Classification
//!
//! Failure taxonomy for stage invocations and the policy that turns a failure
//! into a retry-or-abandon decision.
//!
//! ## Overview
//!
//! A stage reports failures as a [`StageError`], a tagged value:
//!
//! - `Recoverable`: transient (network blip, resource not ready, rate limit,
//!   invocation timeout). The operation stays on the same stage and is retried.
//! - `NonRecoverable`: permanent (malformed input, authorization denial,
//!   irreconcilable conflict). The operation fails.
//!
//! Classification happens where the failure is observed, inside the stage. The
//! executor never looks at error text; it asks an [`ErrorClassifier`] what to
//! do with the tag it was handed. An error that reaches the executor without
//! a tag (via `From<anyhow::Error>`) is treated as recoverable.
//!
//! ## Usage
//!
//! ```rust
//! use provisioner_core::orchestration::error_classifier::{
//!     ClassifyResultExt, ErrorCategory, StageError,
//! };
//!
//! fn parse_port(raw: &str) -> Result<u16, StageError> {
//!     raw.parse::<u16>().or_non_recoverable("invalid port in cluster config")
//! }
//!
//! let err = parse_port("http").unwrap_err();
//! assert_eq!(err.category(), ErrorCategory::NonRecoverable);
//! ```

use crate::orchestration::backoff_calculator::{BackoffCalculator, BackoffType};
use crate::stages::StageName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Recoverability tag carried by every stage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Recoverable,
    NonRecoverable,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Recoverable => write!(f, "Recoverable"),
            ErrorCategory::NonRecoverable => write!(f, "Non-recoverable"),
        }
    }
}

/// Failure returned from [`Stage::run`](crate::stages::Stage::run)
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{cause:#}")]
    Recoverable {
        cause: anyhow::Error,
        /// Stage-requested delay before the retry
        retry_after: Option<Duration>,
    },

    #[error("{cause:#}")]
    NonRecoverable { cause: anyhow::Error },
}

/// Marker cause for an invocation that outlived its stage timeout
#[derive(Debug, Error)]
#[error("stage {stage} did not finish within {timeout:?}")]
pub struct StageTimeout {
    pub stage: StageName,
    pub timeout: Duration,
}

impl StageError {
    pub fn recoverable(cause: impl Into<anyhow::Error>) -> Self {
        Self::Recoverable {
            cause: cause.into(),
            retry_after: None,
        }
    }

    /// Recoverable failure that asks to be retried after a specific delay
    pub fn recoverable_after(cause: impl Into<anyhow::Error>, retry_after: Duration) -> Self {
        Self::Recoverable {
            cause: cause.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn non_recoverable(cause: impl Into<anyhow::Error>) -> Self {
        Self::NonRecoverable {
            cause: cause.into(),
        }
    }

    /// Invocation timeout; the external action may still be running, and the
    /// stage is idempotent, so it is retried like any transient failure.
    pub fn timeout(stage: StageName, timeout: Duration) -> Self {
        Self::recoverable(StageTimeout { stage, timeout })
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Recoverable { .. } => ErrorCategory::Recoverable,
            Self::NonRecoverable { .. } => ErrorCategory::NonRecoverable,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.category() == ErrorCategory::Recoverable
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Recoverable { retry_after, .. } => *retry_after,
            Self::NonRecoverable { .. } => None,
        }
    }

    pub fn cause(&self) -> &anyhow::Error {
        match self {
            Self::Recoverable { cause, .. } | Self::NonRecoverable { cause } => cause,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.cause().is::<StageTimeout>()
    }
}

/// Errors that arrive without a tag default to recoverable
impl From<anyhow::Error> for StageError {
    fn from(cause: anyhow::Error) -> Self {
        Self::recoverable(cause)
    }
}

/// `classify(err) -> {Recoverable, NonRecoverable}`
pub fn classify(error: &StageError) -> ErrorCategory {
    error.category()
}

/// Tag a fallible result at the point of failure
pub trait ClassifyResultExt<T> {
    fn or_recoverable(self, context: &'static str) -> Result<T, StageError>;
    fn or_recoverable_after(self, context: &'static str, retry_after: Duration)
        -> Result<T, StageError>;
    fn or_non_recoverable(self, context: &'static str) -> Result<T, StageError>;
}

impl<T, E> ClassifyResultExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn or_recoverable(self, context: &'static str) -> Result<T, StageError> {
        self.map_err(|e| StageError::recoverable(into_cause(e).context(context)))
    }

    fn or_recoverable_after(
        self,
        context: &'static str,
        retry_after: Duration,
    ) -> Result<T, StageError> {
        self.map_err(|e| StageError::recoverable_after(into_cause(e).context(context), retry_after))
    }

    fn or_non_recoverable(self, context: &'static str) -> Result<T, StageError> {
        self.map_err(|e| StageError::non_recoverable(into_cause(e).context(context)))
    }
}

fn into_cause<E: Into<anyhow::Error>>(error: E) -> anyhow::Error {
    error.into()
}

/// Context information for error classification
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation_id: Uuid,
    pub stage: StageName,
    /// Consecutive failures on this stage including the current one (1-based)
    pub attempt_number: u32,
    /// Retry delay configured on the stage definition, if any
    pub stage_retry_delay: Option<Duration>,
}

/// Result of error classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub error_category: ErrorCategory,
    /// Whether the operation should stay on the stage and retry
    pub is_retryable: bool,
    pub retry_delay: Option<Duration>,
    pub backoff_type: Option<BackoffType>,
    /// Specific error code for tracking
    pub error_code: String,
    /// Message persisted as the operation's last error
    pub error_message: String,
    pub is_final_attempt: bool,
}

/// Strategy deciding what the executor does with a stage failure
pub trait ErrorClassifier: Send + Sync {
    fn classify_error(&self, error: &StageError, context: &ErrorContext) -> ErrorClassification;

    fn classifier_name(&self) -> &'static str;
}

/// Tag-driven classifier with a bounded retry budget
#[derive(Debug, Clone)]
pub struct StandardErrorClassifier {
    backoff: BackoffCalculator,
    /// 0 means recoverable failures retry forever
    max_consecutive_failures: u32,
}

impl StandardErrorClassifier {
    pub fn new(backoff: BackoffCalculator, max_consecutive_failures: u32) -> Self {
        Self {
            backoff,
            max_consecutive_failures,
        }
    }

    fn budget_exhausted(&self, attempt_number: u32) -> bool {
        self.max_consecutive_failures > 0 && attempt_number >= self.max_consecutive_failures
    }
}

impl Default for StandardErrorClassifier {
    fn default() -> Self {
        Self::new(
            BackoffCalculator::with_defaults(),
            crate::config::RetryConfig::default().max_consecutive_failures,
        )
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify_error(&self, error: &StageError, context: &ErrorContext) -> ErrorClassification {
        match error {
            StageError::NonRecoverable { cause } => ErrorClassification {
                error_category: ErrorCategory::NonRecoverable,
                is_retryable: false,
                retry_delay: None,
                backoff_type: None,
                error_code: "NON_RECOVERABLE".to_string(),
                error_message: format!("{cause:#}"),
                is_final_attempt: true,
            },
            StageError::Recoverable { cause, retry_after } => {
                if self.budget_exhausted(context.attempt_number) {
                    return ErrorClassification {
                        error_category: ErrorCategory::Recoverable,
                        is_retryable: false,
                        retry_delay: None,
                        backoff_type: None,
                        error_code: "RETRY_LIMIT_EXCEEDED".to_string(),
                        error_message: format!(
                            "stage {} failed {} consecutive times, giving up: {cause:#}",
                            context.stage, context.attempt_number
                        ),
                        is_final_attempt: true,
                    };
                }

                let requested = retry_after.or(context.stage_retry_delay);
                let backoff = self.backoff.calculate(context.attempt_number, requested);
                let error_code = if error.is_timeout() {
                    "STAGE_TIMEOUT"
                } else {
                    "RECOVERABLE"
                };

                ErrorClassification {
                    error_category: ErrorCategory::Recoverable,
                    is_retryable: true,
                    retry_delay: Some(backoff.delay),
                    backoff_type: Some(backoff.backoff_type),
                    error_code: error_code.to_string(),
                    error_message: format!("{cause:#}"),
                    is_final_attempt: false,
                }
            }
        }
    }

    fn classifier_name(&self) -> &'static str {
        "StandardErrorClassifier"
    }
}
