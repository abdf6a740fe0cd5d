//! # Collaborator Interfaces
//!
//! Narrow async interfaces to the systems stages act against: the managed
//! cluster's API server, the kubeconfig source, the shoot (infrastructure)
//! API and the component deployer. Implementations live outside the engine;
//! tests use in-memory fakes.
//!
//! Every call surfaces a [`ClientError`] whose variants keep "not found",
//! "already exists" and transport failures apart, so stages can decide
//! between success, retry and abandonment without reading messages.

use crate::models::Cluster;
use crate::orchestration::error_classifier::{ErrorCategory, StageError};
use crate::stages::ComponentList;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod installation_status;

pub use installation_status::{
    ConfigMapInstallationStatus, DeployerInstallationStatus, InstallationStatusSource,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl ClientError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Denials and malformed requests will not fix themselves on retry
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Forbidden(_) | Self::Invalid(_) => ErrorCategory::NonRecoverable,
            Self::NotFound { .. } | Self::AlreadyExists { .. } | Self::Transport(_) => {
                ErrorCategory::Recoverable
            }
        }
    }
}

impl From<ClientError> for StageError {
    fn from(error: ClientError) -> Self {
        match error.category() {
            ErrorCategory::Recoverable => StageError::recoverable(error),
            ErrorCategory::NonRecoverable => StageError::non_recoverable(error),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
    Group,
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectKind::User => write!(f, "User"),
            SubjectKind::Group => write!(f, "Group"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRoleBinding {
    pub name: String,
    pub role: String,
    pub subject_kind: SubjectKind,
    pub subject_name: String,
    pub labels: BTreeMap<String, String>,
}

/// Object and RBAC access to one managed cluster
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> ClientResult<()>;

    async fn create_namespace(&self, name: &str) -> ClientResult<()>;

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClientResult<BTreeMap<String, String>>;
}

/// Builds a [`ClusterClient`] for a cluster from a kubeconfig
pub trait ClusterClientProvider: Send + Sync {
    fn client_for(&self, cluster: &Cluster, kubeconfig: &str) -> ClientResult<Arc<dyn ClusterClient>>;
}

/// Source of short-lived admin kubeconfigs for managed clusters
#[async_trait]
pub trait KubeconfigProvider: Send + Sync {
    async fn fetch(&self, cluster_name: &str) -> ClientResult<String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShootStatus {
    /// Infrastructure reports the cluster as ready for workloads
    pub ready: bool,
    pub hibernation_enabled: bool,
    pub hibernated: bool,
}

/// Infrastructure-level operations on the cluster ("shoot")
#[async_trait]
pub trait ShootClient: Send + Sync {
    /// `NotFound` once the shoot no longer exists
    async fn status(&self, shoot_name: &str) -> ClientResult<ShootStatus>;

    async fn hibernate(&self, shoot_name: &str) -> ClientResult<()>;

    async fn delete(&self, shoot_name: &str) -> ClientResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationState {
    NotStarted,
    InProgress,
    Installed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationStatus {
    pub state: InstallationState,
    pub description: String,
}

impl InstallationStatus {
    pub fn new(state: InstallationState, description: impl Into<String>) -> Self {
        Self {
            state,
            description: description.into(),
        }
    }
}

/// Everything the deployer needs to start a multi-component installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationRequest {
    pub release: String,
    pub profile: Option<String>,
    pub components: ComponentList,
    pub global_overrides: BTreeMap<String, String>,
}

/// Drives asynchronous component installation on a managed cluster
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn trigger_installation(
        &self,
        kubeconfig: &str,
        request: &InstallationRequest,
    ) -> ClientResult<()>;

    async fn trigger_upgrade(&self, kubeconfig: &str, request: &InstallationRequest)
        -> ClientResult<()>;

    async fn installation_state(&self, kubeconfig: &str) -> ClientResult<InstallationStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert_eq!(
            ClientError::Forbidden("rbac".into()).category(),
            ErrorCategory::NonRecoverable
        );
        assert_eq!(
            ClientError::Invalid("bad name".into()).category(),
            ErrorCategory::NonRecoverable
        );
        assert_eq!(
            ClientError::transport("connection reset").category(),
            ErrorCategory::Recoverable
        );
        assert_eq!(
            ClientError::not_found("Namespace", "istio-system").category(),
            ErrorCategory::Recoverable
        );
    }

    #[test]
    fn test_conversion_preserves_category() {
        let error: StageError = ClientError::Forbidden("denied".into()).into();
        assert!(!error.is_recoverable());

        let error: StageError = ClientError::transport("eof").into();
        assert!(error.is_recoverable());
        assert_eq!(error.to_string(), "transport failure: eof");
    }
}
