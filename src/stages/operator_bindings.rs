use super::{Stage, StageName, StageOutcome, StageResult};
use crate::clients::{
    ClientError, ClusterClient, ClusterClientProvider, ClusterRoleBinding, KubeconfigProvider,
    SubjectKind,
};
use crate::constants::resources::{
    ADMINISTRATOR_BINDING_PREFIX, CLUSTER_ADMIN_ROLE, ISTIO_NAMESPACE, L2_OPERATOR_BINDING,
    L3_OPERATOR_BINDING, VIEW_ROLE,
};
use crate::logging::StageLogger;
use crate::models::{Cluster, Operation};
use crate::orchestration::error_classifier::ClassifyResultExt;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Which operator access the stage grants on a new cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorRoleBindingConfig {
    /// Group bound to the read-only role; skipped when empty
    pub l2_group: String,
    /// Group bound to cluster-admin; skipped when empty
    pub l3_group: String,
    /// Bind every cluster administrator to cluster-admin
    pub creating_for_admin: bool,
}

/// Grants operators and administrators access to a freshly created cluster.
///
/// Every object it creates may already exist from an earlier attempt; that
/// counts as success.
pub struct CreateBindingsForOperators {
    clients: Arc<dyn ClusterClientProvider>,
    kubeconfigs: Arc<dyn KubeconfigProvider>,
    config: OperatorRoleBindingConfig,
    next_stage: StageName,
    dependency_retry: Duration,
}

impl CreateBindingsForOperators {
    pub fn new(
        clients: Arc<dyn ClusterClientProvider>,
        kubeconfigs: Arc<dyn KubeconfigProvider>,
        config: OperatorRoleBindingConfig,
        next_stage: StageName,
        dependency_retry: Duration,
    ) -> Self {
        Self {
            clients,
            kubeconfigs,
            config,
            next_stage,
            dependency_retry,
        }
    }

    fn bindings_for(&self, cluster: &Cluster) -> Vec<ClusterRoleBinding> {
        let labels = BTreeMap::from([("app".to_string(), "kyma".to_string())]);
        let mut bindings = Vec::new();

        if self.config.creating_for_admin {
            for (index, administrator) in cluster.administrators.iter().enumerate() {
                bindings.push(ClusterRoleBinding {
                    name: format!("{ADMINISTRATOR_BINDING_PREFIX}{index}"),
                    role: CLUSTER_ADMIN_ROLE.to_string(),
                    subject_kind: SubjectKind::User,
                    subject_name: administrator.clone(),
                    labels: labels.clone(),
                });
            }
        }

        for (name, role, group) in [
            (L2_OPERATOR_BINDING, VIEW_ROLE, &self.config.l2_group),
            (L3_OPERATOR_BINDING, CLUSTER_ADMIN_ROLE, &self.config.l3_group),
        ] {
            if group.is_empty() {
                continue;
            }
            bindings.push(ClusterRoleBinding {
                name: name.to_string(),
                role: role.to_string(),
                subject_kind: SubjectKind::Group,
                subject_name: group.clone(),
                labels: labels.clone(),
            });
        }

        bindings
    }
}

fn tolerate_existing(result: Result<(), ClientError>) -> Result<(), ClientError> {
    match result {
        Err(e) if e.is_already_exists() => Ok(()),
        other => other,
    }
}

#[async_trait]
impl Stage for CreateBindingsForOperators {
    async fn run(
        &self,
        cluster: &Cluster,
        _operation: &Operation,
        logger: &StageLogger,
    ) -> StageOutcome {
        let kubeconfig = match self.kubeconfigs.fetch(&cluster.name).await {
            Ok(kubeconfig) => kubeconfig,
            Err(e) => {
                logger.warn(&format!("failed to fetch dynamic kubeconfig: {e}"));
                return Err(e).or_recoverable_after(
                    "while fetching dynamic kubeconfig",
                    self.dependency_retry,
                );
            }
        };

        let client: Arc<dyn ClusterClient> = self
            .clients
            .client_for(cluster, &kubeconfig)
            .or_recoverable("while creating cluster client")?;

        for binding in self.bindings_for(cluster) {
            tolerate_existing(client.create_cluster_role_binding(&binding).await)?;
            logger.debug(&format!("cluster role binding {} in place", binding.name));
        }

        tolerate_existing(client.create_namespace(ISTIO_NAMESPACE).await)?;

        logger.info("operator bindings created");
        Ok(StageResult::advance(self.next_stage.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoClients;

    impl ClusterClientProvider for NoClients {
        fn client_for(&self, _: &Cluster, _: &str) -> crate::clients::ClientResult<Arc<dyn ClusterClient>> {
            Err(ClientError::transport("unused"))
        }
    }

    struct NoKubeconfig;

    #[async_trait]
    impl KubeconfigProvider for NoKubeconfig {
        async fn fetch(&self, _: &str) -> crate::clients::ClientResult<String> {
            Err(ClientError::transport("unused"))
        }
    }

    fn stage(config: OperatorRoleBindingConfig) -> CreateBindingsForOperators {
        CreateBindingsForOperators::new(
            Arc::new(NoClients),
            Arc::new(NoKubeconfig),
            config,
            "StartingInstallation".into(),
            Duration::from_secs(20),
        )
    }

    #[test]
    fn test_bindings_cover_admins_and_operator_groups() {
        let cluster = Cluster::new("c1", "shoot")
            .with_administrators(vec!["admin1".to_string(), "admin2".to_string()]);
        let bindings = stage(OperatorRoleBindingConfig {
            l2_group: "l2-ops".to_string(),
            l3_group: "l3-ops".to_string(),
            creating_for_admin: true,
        })
        .bindings_for(&cluster);

        let names: Vec<_> = bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["administrator0", "administrator1", "l2-operator", "l3-operator"]
        );
        assert_eq!(bindings[1].subject_name, "admin2");
        assert_eq!(bindings[2].role, "view");
        assert_eq!(bindings[3].subject_kind, SubjectKind::Group);
    }

    #[test]
    fn test_admin_bindings_are_optional() {
        let cluster = Cluster::new("c1", "shoot").with_administrators(vec!["admin1".to_string()]);
        let bindings = stage(OperatorRoleBindingConfig::default()).bindings_for(&cluster);
        assert!(bindings.is_empty());
    }

    #[test]
    fn test_existing_objects_are_tolerated() {
        assert!(tolerate_existing(Err(ClientError::already_exists("Namespace", "istio-system"))).is_ok());
        assert!(tolerate_existing(Err(ClientError::Forbidden("rbac".into()))).is_err());
    }
}
