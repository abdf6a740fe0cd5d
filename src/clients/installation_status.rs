//! Where the state of a component installation is read from.
//!
//! The deployer can report it directly. Installers that publish their
//! progress on the managed cluster instead are read through the `kyma`
//! ConfigMap in `kyma-system`, whose `status` and `reason` keys carry the
//! installer's own vocabulary.

use super::{
    ClientError, ClientResult, ClusterClientProvider, Deployer, InstallationState,
    InstallationStatus,
};
use crate::constants::resources::{INSTALLATION_STATUS_CONFIG_MAP, INSTALLATION_STATUS_NAMESPACE};
use crate::models::Cluster;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const STATUS_KEY: &str = "status";
const REASON_KEY: &str = "reason";

#[async_trait]
pub trait InstallationStatusSource: Send + Sync {
    async fn installation_status(
        &self,
        cluster: &Cluster,
        kubeconfig: &str,
    ) -> ClientResult<InstallationStatus>;
}

/// Asks the deployer that started the installation
pub struct DeployerInstallationStatus {
    deployer: Arc<dyn Deployer>,
}

impl DeployerInstallationStatus {
    pub fn new(deployer: Arc<dyn Deployer>) -> Self {
        Self { deployer }
    }
}

#[async_trait]
impl InstallationStatusSource for DeployerInstallationStatus {
    async fn installation_status(
        &self,
        _cluster: &Cluster,
        kubeconfig: &str,
    ) -> ClientResult<InstallationStatus> {
        self.deployer.installation_state(kubeconfig).await
    }
}

/// Reads the installer's status ConfigMap on the managed cluster
pub struct ConfigMapInstallationStatus {
    clients: Arc<dyn ClusterClientProvider>,
}

impl ConfigMapInstallationStatus {
    pub fn new(clients: Arc<dyn ClusterClientProvider>) -> Self {
        Self { clients }
    }
}

#[async_trait]
impl InstallationStatusSource for ConfigMapInstallationStatus {
    async fn installation_status(
        &self,
        cluster: &Cluster,
        kubeconfig: &str,
    ) -> ClientResult<InstallationStatus> {
        let client = self.clients.client_for(cluster, kubeconfig)?;
        match client
            .get_config_map(INSTALLATION_STATUS_NAMESPACE, INSTALLATION_STATUS_CONFIG_MAP)
            .await
        {
            Ok(data) => status_from_config_map(&data),
            Err(error) if error.is_not_found() => {
                debug!(cluster_id = %cluster.id, "No installation status ConfigMap yet");
                Ok(InstallationStatus::new(
                    InstallationState::NotStarted,
                    "installation has not started",
                ))
            }
            Err(error) => Err(error),
        }
    }
}

/// Maps the installer's `status` value; `reason` becomes the description
pub fn status_from_config_map(data: &BTreeMap<String, String>) -> ClientResult<InstallationStatus> {
    let status = data.get(STATUS_KEY).ok_or_else(|| {
        ClientError::Invalid(format!(
            "field {STATUS_KEY} does not exist in ConfigMap {INSTALLATION_STATUS_NAMESPACE}/{INSTALLATION_STATUS_CONFIG_MAP}"
        ))
    })?;
    let reason = data.get(REASON_KEY).cloned().unwrap_or_default();

    let state = match status.as_str() {
        "Deployed" => InstallationState::Installed,
        "DeploymentInProgress" => InstallationState::InProgress,
        "DeploymentError" => InstallationState::Failed,
        other => {
            return Err(ClientError::Invalid(format!(
                "unsupported installation status: {other}"
            )))
        }
    };
    Ok(InstallationStatus::new(state, reason))
}
