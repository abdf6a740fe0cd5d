//! # Orchestration Engine
//!
//! The stage execution engine: error classification, retry backoff, the
//! executor that advances one operation by one stage, and the scheduler loop
//! that feeds it due operations.
//!
//! ## Core Components
//!
//! - **ErrorClassifier**: decides retry versus abandonment for classified stage failures
//! - **BackoffCalculator**: fixed or exponential retry delays, honoring stage hints
//! - **StageExecutor**: invokes the current stage under its timeout and persists the outcome
//! - **SchedulerLoop**: bounded-concurrency polling of due operations
//!
//! ## Data flow
//!
//! ```text
//! SchedulerLoop ─▶ StageExecutor ─▶ StageRegistry::lookup ─▶ Stage::run
//!       ▲                │
//!       └── due_at ◀── OperationStore::save (compare-and-swap)
//! ```

pub mod backoff_calculator;
pub mod error_classifier;
pub mod scheduler;
pub mod stage_executor;

pub use backoff_calculator::{
    BackoffCalculator, BackoffCalculatorConfig, BackoffResult, BackoffType,
};
pub use error_classifier::{
    classify, ClassifyResultExt, ErrorCategory, ErrorClassification, ErrorClassifier,
    ErrorContext, StageError, StandardErrorClassifier,
};
pub use scheduler::{SchedulerLoop, TickReport};
pub use stage_executor::{Decision, ExecutionReport, SkipReason, StageExecutor};
