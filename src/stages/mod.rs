//! # Stages
//!
//! The unit-of-work contract every lifecycle step implements, plus the
//! reference stages shipped with the engine.
//!
//! A stage receives a read-only [`Cluster`], a read-only snapshot of the
//! [`Operation`] and a [`StageLogger`]. It answers with a [`StageResult`]
//! naming the next stage and a delay, or with a classified [`StageError`].
//!
//! Stages are configured once at registration (next stage, poll interval,
//! clients) and keep no per-invocation state. They must be idempotent: the
//! executor re-runs a stage after a crash or timeout without knowing how far
//! the previous attempt got.
//!
//! Waiting is expressed by returning the current stage with a delay, never by
//! blocking inside `run`.

use crate::logging::StageLogger;
use crate::models::{Cluster, Operation};
use crate::orchestration::error_classifier::StageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::time::Duration;

pub mod cluster;
pub mod components;
pub mod installation;
pub mod operator_bindings;
pub mod wait_for_condition;

pub use cluster::{
    ClusterCreated, ClusterDeleted, ClusterHibernated, TriggerClusterDeletion, TriggerHibernation,
    WaitForHibernation,
};
pub use components::{ComponentConfig, ComponentEntry, ComponentList};
pub use installation::{
    InstallationMode, InstallationSettings, TriggerInstallation, WaitForInstallation,
};
pub use operator_bindings::{CreateBindingsForOperators, OperatorRoleBindingConfig};
pub use wait_for_condition::{ConditionProbe, WaitForCondition};

/// Name of a stage within an operation kind's graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageName(String);

impl StageName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Terminal-success marker shared by every operation kind
    pub fn finished() -> Self {
        Self(crate::constants::stages::FINISHED.to_string())
    }

    pub fn is_finished(&self) -> bool {
        self.0 == crate::constants::stages::FINISHED
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for StageName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for StageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// What a successful stage invocation asks the executor to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub next: StageName,
    /// Zero means "as soon as the scheduler picks it up again"
    pub delay: Duration,
}

impl StageResult {
    pub fn new(next: StageName, delay: Duration) -> Self {
        Self { next, delay }
    }

    /// Move on to `next` immediately
    pub fn advance(next: StageName) -> Self {
        Self::new(next, Duration::ZERO)
    }

    /// Stay on the current stage and check again after `delay`
    pub fn poll(operation: &Operation, delay: Duration) -> Self {
        Self::new(operation.stage.clone(), delay)
    }

    pub fn is_same_stage(&self, operation: &Operation) -> bool {
        self.next == operation.stage
    }
}

pub type StageOutcome = Result<StageResult, StageError>;

/// One retryable unit of work in an operation's lifecycle
#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(
        &self,
        cluster: &Cluster,
        operation: &Operation,
        logger: &StageLogger,
    ) -> StageOutcome;
}
