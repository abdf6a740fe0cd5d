//! Error types for the provisioner engine.
//!
//! Stage failures are not represented here. A stage reports a
//! [`StageError`](crate::orchestration::error_classifier::StageError) and the
//! executor folds it into the operation record; the variants below cover the
//! engine's own plumbing (store, configuration, registry structure).

use crate::config::ConfigurationError;
use crate::models::OperationKind;
use crate::registry::RegistryError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Operation {operation_id} was modified concurrently (expected version {expected_version})")]
    ConcurrentModification {
        operation_id: Uuid,
        expected_version: i64,
    },

    #[error("Operation {0} not found")]
    OperationNotFound(Uuid),

    #[error("Cluster {0} not found")]
    ClusterNotFound(String),

    #[error("Cluster {cluster_id} already has {kind} operation {operation_id} in progress")]
    ClusterBusy {
        cluster_id: String,
        operation_id: Uuid,
        kind: OperationKind,
    },

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProvisionerError {
    /// True for optimistic-concurrency losses, which callers skip rather than report.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

impl From<serde_json::Error> for ProvisionerError {
    fn from(error: serde_json::Error) -> Self {
        ProvisionerError::Serialization(format!("JSON serialization error: {error}"))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for ProvisionerError {
    fn from(err: sqlx::Error) -> Self {
        ProvisionerError::DatabaseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProvisionerError>;
