//! # System Constants
//!
//! Stage names and fixed resource names used by the reference lifecycles.

/// Stage names of the built-in lifecycle graphs
pub mod stages {
    /// Terminal-success marker for every operation kind
    pub const FINISHED: &str = "Finished";

    // Provision
    pub const WAITING_FOR_CLUSTER_CREATION: &str = "WaitingForClusterCreation";
    pub const CREATING_BINDINGS_FOR_OPERATORS: &str = "CreatingBindingsForOperators";
    pub const STARTING_INSTALLATION: &str = "StartingInstallation";
    pub const WAITING_FOR_INSTALLATION: &str = "WaitingForInstallation";

    // Upgrade
    pub const STARTING_UPGRADE: &str = "StartingUpgrade";
    pub const WAITING_FOR_UPGRADE: &str = "WaitingForUpgrade";

    // Hibernate
    pub const TRIGGER_HIBERNATION: &str = "TriggerHibernation";
    pub const WAITING_FOR_HIBERNATION: &str = "WaitingForHibernation";

    // Deprovision
    pub const TRIGGER_CLUSTER_DELETION: &str = "TriggerClusterDeletion";
    pub const WAITING_FOR_CLUSTER_DELETION: &str = "WaitingForClusterDeletion";
}

/// Kubernetes object names created or read on managed clusters
pub mod resources {
    pub const DEFAULT_COMPONENT_NAMESPACE: &str = "kyma-system";
    pub const ISTIO_NAMESPACE: &str = "istio-system";

    pub const INSTALLATION_STATUS_CONFIG_MAP: &str = "kyma";
    pub const INSTALLATION_STATUS_NAMESPACE: &str = "kyma-system";

    pub const ADMINISTRATOR_BINDING_PREFIX: &str = "administrator";
    pub const L2_OPERATOR_BINDING: &str = "l2-operator";
    pub const L3_OPERATOR_BINDING: &str = "l3-operator";

    pub const CLUSTER_ADMIN_ROLE: &str = "cluster-admin";
    pub const VIEW_ROLE: &str = "view";
}

/// Errors recorded when the engine, not a stage, fails an operation
pub mod failure_reasons {
    pub const CANCELLED: &str = "operation cancelled by a newer lifecycle request";
}
