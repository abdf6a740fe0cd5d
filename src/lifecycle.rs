//! # Lifecycle Graphs
//!
//! Declarative stage lists for each operation kind, wired to the reference
//! stages and their collaborators.
//!
//! ```text
//! provision:   WaitingForClusterCreation ─▶ CreatingBindingsForOperators
//!              ─▶ StartingInstallation ─▶ WaitingForInstallation ─▶ Finished
//! upgrade:     StartingUpgrade ─▶ WaitingForUpgrade ─▶ Finished
//! hibernate:   TriggerHibernation ─▶ WaitingForHibernation ─▶ Finished
//! deprovision: TriggerClusterDeletion ─▶ WaitingForClusterDeletion ─▶ Finished
//! ```

use crate::clients::{
    ClusterClientProvider, ConfigMapInstallationStatus, Deployer, DeployerInstallationStatus,
    InstallationStatusSource, KubeconfigProvider, ShootClient,
};
use crate::config::{InstallationStatusBackend, StagesConfig};
use crate::constants::stages::*;
use crate::models::OperationKind;
use crate::registry::{RegistryError, StageRegistry, StageSpec};
use crate::stages::{
    ClusterCreated, ClusterDeleted, CreateBindingsForOperators, InstallationMode,
    OperatorRoleBindingConfig, StageName, TriggerClusterDeletion, TriggerHibernation,
    TriggerInstallation, WaitForCondition, WaitForHibernation, WaitForInstallation,
};
use std::sync::Arc;
use std::time::Duration;

const CLUSTER_CREATION_TIME_LIMIT: Duration = Duration::from_secs(60 * 60);
const INSTALLATION_TIME_LIMIT: Duration = Duration::from_secs(2 * 60 * 60);
const HIBERNATION_TIME_LIMIT: Duration = Duration::from_secs(60 * 60);
const DELETION_TIME_LIMIT: Duration = Duration::from_secs(60 * 60);

/// External systems the reference stages act against
#[derive(Clone)]
pub struct Collaborators {
    pub shoots: Arc<dyn ShootClient>,
    pub cluster_clients: Arc<dyn ClusterClientProvider>,
    pub kubeconfigs: Arc<dyn KubeconfigProvider>,
    pub deployer: Arc<dyn Deployer>,
    pub operator_bindings: OperatorRoleBindingConfig,
}

/// Initial stage of each built-in lifecycle
pub fn first_stage(kind: OperationKind) -> StageName {
    let name = match kind {
        OperationKind::Provision => WAITING_FOR_CLUSTER_CREATION,
        OperationKind::Upgrade => STARTING_UPGRADE,
        OperationKind::Hibernate => TRIGGER_HIBERNATION,
        OperationKind::Deprovision => TRIGGER_CLUSTER_DELETION,
    };
    StageName::from(name)
}

fn installation_status(
    collaborators: &Collaborators,
    config: &StagesConfig,
) -> Arc<dyn InstallationStatusSource> {
    match config.installation_status {
        InstallationStatusBackend::Deployer => Arc::new(DeployerInstallationStatus::new(
            Arc::clone(&collaborators.deployer),
        )),
        InstallationStatusBackend::ClusterConfigMap => Arc::new(ConfigMapInstallationStatus::new(
            Arc::clone(&collaborators.cluster_clients),
        )),
    }
}

/// Ordered stage list for `kind`
pub fn stage_specs(
    kind: OperationKind,
    collaborators: &Collaborators,
    config: &StagesConfig,
) -> Vec<StageSpec> {
    let poll = config.poll_interval();
    let dependency_retry = config.dependency_retry();

    match kind {
        OperationKind::Provision => vec![
            StageSpec::new(
                WAITING_FOR_CLUSTER_CREATION,
                Arc::new(WaitForCondition::new(
                    ClusterCreated::new(Arc::clone(&collaborators.shoots)),
                    CREATING_BINDINGS_FOR_OPERATORS.into(),
                    poll,
                )),
            )
            .with_time_limit(CLUSTER_CREATION_TIME_LIMIT)
            .then(CREATING_BINDINGS_FOR_OPERATORS),
            StageSpec::new(
                CREATING_BINDINGS_FOR_OPERATORS,
                Arc::new(CreateBindingsForOperators::new(
                    Arc::clone(&collaborators.cluster_clients),
                    Arc::clone(&collaborators.kubeconfigs),
                    collaborators.operator_bindings.clone(),
                    STARTING_INSTALLATION.into(),
                    dependency_retry,
                )),
            )
            .then(STARTING_INSTALLATION),
            StageSpec::new(
                STARTING_INSTALLATION,
                Arc::new(TriggerInstallation::new(
                    Arc::clone(&collaborators.deployer),
                    Arc::clone(&collaborators.kubeconfigs),
                    InstallationMode::Install,
                    WAITING_FOR_INSTALLATION.into(),
                    dependency_retry,
                )),
            )
            .then(WAITING_FOR_INSTALLATION),
            StageSpec::new(
                WAITING_FOR_INSTALLATION,
                Arc::new(WaitForInstallation::new(
                    installation_status(collaborators, config),
                    Arc::clone(&collaborators.kubeconfigs),
                    StageName::finished(),
                    poll,
                    dependency_retry,
                )),
            )
            .with_time_limit(INSTALLATION_TIME_LIMIT)
            .then(StageName::finished()),
        ],
        OperationKind::Upgrade => vec![
            StageSpec::new(
                STARTING_UPGRADE,
                Arc::new(TriggerInstallation::new(
                    Arc::clone(&collaborators.deployer),
                    Arc::clone(&collaborators.kubeconfigs),
                    InstallationMode::Upgrade,
                    WAITING_FOR_UPGRADE.into(),
                    dependency_retry,
                )),
            )
            .then(WAITING_FOR_UPGRADE),
            StageSpec::new(
                WAITING_FOR_UPGRADE,
                Arc::new(WaitForInstallation::new(
                    installation_status(collaborators, config),
                    Arc::clone(&collaborators.kubeconfigs),
                    StageName::finished(),
                    poll,
                    dependency_retry,
                )),
            )
            .with_time_limit(INSTALLATION_TIME_LIMIT)
            .then(StageName::finished()),
        ],
        OperationKind::Hibernate => vec![
            StageSpec::new(
                TRIGGER_HIBERNATION,
                Arc::new(TriggerHibernation::new(
                    Arc::clone(&collaborators.shoots),
                    WAITING_FOR_HIBERNATION.into(),
                )),
            )
            .then(WAITING_FOR_HIBERNATION),
            StageSpec::new(
                WAITING_FOR_HIBERNATION,
                Arc::new(WaitForHibernation::for_shoots(
                    Arc::clone(&collaborators.shoots),
                    StageName::finished(),
                    poll,
                )),
            )
            .with_time_limit(HIBERNATION_TIME_LIMIT)
            .then(StageName::finished()),
        ],
        OperationKind::Deprovision => vec![
            StageSpec::new(
                TRIGGER_CLUSTER_DELETION,
                Arc::new(TriggerClusterDeletion::new(
                    Arc::clone(&collaborators.shoots),
                    WAITING_FOR_CLUSTER_DELETION.into(),
                )),
            )
            .then(WAITING_FOR_CLUSTER_DELETION),
            StageSpec::new(
                WAITING_FOR_CLUSTER_DELETION,
                Arc::new(WaitForCondition::new(
                    ClusterDeleted::new(Arc::clone(&collaborators.shoots)),
                    StageName::finished(),
                    poll,
                )),
            )
            .with_time_limit(DELETION_TIME_LIMIT)
            .then(StageName::finished()),
        ],
    }
}

/// Registry holding every built-in lifecycle
pub fn default_registry(
    collaborators: &Collaborators,
    config: &StagesConfig,
) -> Result<StageRegistry, RegistryError> {
    OperationKind::ALL
        .into_iter()
        .fold(
            StageRegistry::builder()
                .with_default_timeout(config.default_timeout())
                .with_default_time_limit(config.default_time_limit()),
            |builder, kind| builder.register_all(kind, stage_specs(kind, collaborators, config)),
        )
        .build()
}
