//! Component installation and upgrade through the [`Deployer`].
//!
//! The installation settings come from the cluster's provider configuration
//! under the `installation` key. A cluster without them, or with settings
//! that do not parse, cannot be installed however often it is retried.

use super::{ComponentConfig, ComponentList, Stage, StageName, StageOutcome, StageResult};
use crate::clients::{
    Deployer, InstallationRequest, InstallationState, InstallationStatusSource, KubeconfigProvider,
};
use crate::logging::StageLogger;
use crate::models::{Cluster, Operation};
use crate::orchestration::error_classifier::{ClassifyResultExt, StageError};
use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationSettings {
    pub release: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
    #[serde(default)]
    pub global_overrides: BTreeMap<String, String>,
}

impl InstallationSettings {
    pub fn from_cluster(cluster: &Cluster) -> Result<Self, StageError> {
        let raw = cluster.provider_config.get("installation").ok_or_else(|| {
            StageError::non_recoverable(anyhow!(
                "cluster {} has no installation settings",
                cluster.id
            ))
        })?;
        serde_json::from_value(raw.clone()).or_non_recoverable("while parsing installation settings")
    }

    pub fn into_request(self) -> InstallationRequest {
        InstallationRequest {
            components: ComponentList::from_components(&self.components),
            release: self.release,
            profile: self.profile,
            global_overrides: self.global_overrides,
        }
    }
}

/// Static kubeconfig on the cluster record, otherwise a fresh one from the provider
async fn resolve_kubeconfig(
    cluster: &Cluster,
    kubeconfigs: &dyn KubeconfigProvider,
    dependency_retry: Duration,
) -> Result<String, StageError> {
    match &cluster.kubeconfig {
        Some(kubeconfig) => Ok(kubeconfig.clone()),
        None => kubeconfigs
            .fetch(&cluster.name)
            .await
            .or_recoverable_after("while fetching kubeconfig", dependency_retry),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallationMode {
    Install,
    Upgrade,
}

pub struct TriggerInstallation {
    deployer: Arc<dyn Deployer>,
    kubeconfigs: Arc<dyn KubeconfigProvider>,
    mode: InstallationMode,
    next_stage: StageName,
    dependency_retry: Duration,
}

impl TriggerInstallation {
    pub fn new(
        deployer: Arc<dyn Deployer>,
        kubeconfigs: Arc<dyn KubeconfigProvider>,
        mode: InstallationMode,
        next_stage: StageName,
        dependency_retry: Duration,
    ) -> Self {
        Self {
            deployer,
            kubeconfigs,
            mode,
            next_stage,
            dependency_retry,
        }
    }
}

#[async_trait]
impl Stage for TriggerInstallation {
    async fn run(
        &self,
        cluster: &Cluster,
        _operation: &Operation,
        logger: &StageLogger,
    ) -> StageOutcome {
        let request = InstallationSettings::from_cluster(cluster)?.into_request();
        let kubeconfig =
            resolve_kubeconfig(cluster, self.kubeconfigs.as_ref(), self.dependency_retry).await?;

        match self.mode {
            InstallationMode::Install => {
                self.deployer
                    .trigger_installation(&kubeconfig, &request)
                    .await?
            }
            InstallationMode::Upgrade => self.deployer.trigger_upgrade(&kubeconfig, &request).await?,
        }

        logger.info(&format!(
            "{:?} of release {} started with {} components",
            self.mode,
            request.release,
            request.components.len()
        ));
        Ok(StageResult::advance(self.next_stage.clone()))
    }
}

/// Polls an installation status source until the installation settles
pub struct WaitForInstallation {
    status: Arc<dyn InstallationStatusSource>,
    kubeconfigs: Arc<dyn KubeconfigProvider>,
    next_stage: StageName,
    poll_interval: Duration,
    dependency_retry: Duration,
}

impl WaitForInstallation {
    pub fn new(
        status: Arc<dyn InstallationStatusSource>,
        kubeconfigs: Arc<dyn KubeconfigProvider>,
        next_stage: StageName,
        poll_interval: Duration,
        dependency_retry: Duration,
    ) -> Self {
        Self {
            status,
            kubeconfigs,
            next_stage,
            poll_interval,
            dependency_retry,
        }
    }
}

#[async_trait]
impl Stage for WaitForInstallation {
    async fn run(
        &self,
        cluster: &Cluster,
        operation: &Operation,
        logger: &StageLogger,
    ) -> StageOutcome {
        let kubeconfig =
            resolve_kubeconfig(cluster, self.kubeconfigs.as_ref(), self.dependency_retry).await?;
        let status = self
            .status
            .installation_status(cluster, &kubeconfig)
            .await
            .or_recoverable("while checking installation state")?;

        match status.state {
            InstallationState::Installed => {
                logger.info("installation finished");
                Ok(StageResult::advance(self.next_stage.clone()))
            }
            InstallationState::NotStarted | InstallationState::InProgress => {
                logger.debug(&format!(
                    "installation {:?}: {}",
                    status.state, status.description
                ));
                Ok(StageResult::poll(operation, self.poll_interval))
            }
            InstallationState::Failed => Err(StageError::non_recoverable(anyhow!(
                "installation failed: {}",
                status.description
            ))),
        }
    }
}
