use serde::{Deserialize, Serialize};

/// Description of a managed cluster.
///
/// Read-only to stages for the whole duration of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Runtime identifier
    pub id: String,
    /// Name of the cluster at the infrastructure provider
    pub name: String,
    /// Provider-specific settings (node pools, region, credentials reference)
    pub provider_config: serde_json::Value,
    /// Admin kubeconfig, once the provider has issued one
    pub kubeconfig: Option<String>,
    /// Identities granted cluster-admin bindings during provisioning
    pub administrators: Vec<String>,
}

impl Cluster {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            provider_config: serde_json::Value::Null,
            kubeconfig: None,
            administrators: Vec::new(),
        }
    }

    pub fn with_provider_config(mut self, provider_config: serde_json::Value) -> Self {
        self.provider_config = provider_config;
        self
    }

    pub fn with_kubeconfig(mut self, kubeconfig: impl Into<String>) -> Self {
        self.kubeconfig = Some(kubeconfig.into());
        self
    }

    pub fn with_administrators(mut self, administrators: Vec<String>) -> Self {
        self.administrators = administrators;
        self
    }
}
