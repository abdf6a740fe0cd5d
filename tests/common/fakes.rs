//! In-memory stand-ins for the collaborator interfaces

use async_trait::async_trait;
use parking_lot::Mutex;
use provisioner_core::clients::{
    ClientError, ClientResult, ClusterClient, ClusterClientProvider, ClusterRoleBinding, Deployer,
    InstallationRequest, InstallationState, InstallationStatus, KubeconfigProvider, ShootClient,
    ShootStatus,
};
use provisioner_core::lifecycle::Collaborators;
use provisioner_core::models::Cluster;
use provisioner_core::stages::OperatorRoleBindingConfig;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shoot API keyed by shoot name. Hibernation and deletion requests are
/// recorded; tests decide when the infrastructure catches up.
#[derive(Default)]
pub struct FakeShootClient {
    shoots: Mutex<HashMap<String, ShootStatus>>,
    failure: Mutex<Option<ClientError>>,
    hibernate_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl FakeShootClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, shoot: &str, status: ShootStatus) {
        self.shoots.lock().insert(shoot.to_string(), status);
    }

    pub fn set_ready(&self, shoot: &str) {
        self.set_status(
            shoot,
            ShootStatus {
                ready: true,
                ..ShootStatus::default()
            },
        );
    }

    pub fn mark_hibernated(&self, shoot: &str) {
        if let Some(status) = self.shoots.lock().get_mut(shoot) {
            status.hibernated = true;
        }
    }

    pub fn remove(&self, shoot: &str) {
        self.shoots.lock().remove(shoot);
    }

    /// Every call fails with `error` until cleared with `None`
    pub fn fail_with(&self, error: Option<ClientError>) {
        *self.failure.lock() = error;
    }

    pub fn hibernate_calls(&self) -> usize {
        self.hibernate_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> ClientResult<()> {
        match self.failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ShootClient for FakeShootClient {
    async fn status(&self, shoot_name: &str) -> ClientResult<ShootStatus> {
        self.check_failure()?;
        self.shoots
            .lock()
            .get(shoot_name)
            .copied()
            .ok_or_else(|| ClientError::not_found("Shoot", shoot_name))
    }

    async fn hibernate(&self, shoot_name: &str) -> ClientResult<()> {
        self.check_failure()?;
        self.hibernate_calls.fetch_add(1, Ordering::SeqCst);
        let mut shoots = self.shoots.lock();
        let status = shoots
            .get_mut(shoot_name)
            .ok_or_else(|| ClientError::not_found("Shoot", shoot_name))?;
        status.hibernation_enabled = true;
        Ok(())
    }

    async fn delete(&self, shoot_name: &str) -> ClientResult<()> {
        self.check_failure()?;
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.shoots.lock().contains_key(shoot_name) {
            Ok(())
        } else {
            Err(ClientError::not_found("Shoot", shoot_name))
        }
    }
}

/// Records created objects; objects listed in `existing` answer `AlreadyExists`
#[derive(Default)]
pub struct FakeClusterClient {
    bindings: Mutex<Vec<ClusterRoleBinding>>,
    namespaces: Mutex<Vec<String>>,
    existing: Mutex<HashSet<String>>,
    config_maps: Mutex<HashMap<(String, String), BTreeMap<String, String>>>,
    failure: Mutex<Option<ClientError>>,
}

impl FakeClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing(self, names: &[&str]) -> Self {
        self.existing
            .lock()
            .extend(names.iter().map(|name| name.to_string()));
        self
    }

    pub fn fail_with(&self, error: Option<ClientError>) {
        *self.failure.lock() = error;
    }

    pub fn bindings(&self) -> Vec<ClusterRoleBinding> {
        self.bindings.lock().clone()
    }

    pub fn binding_names(&self) -> Vec<String> {
        self.bindings
            .lock()
            .iter()
            .map(|binding| binding.name.clone())
            .collect()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.lock().clone()
    }

    pub fn set_config_map(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        self.config_maps.lock().insert(
            (namespace.to_string(), name.to_string()),
            data.iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        );
    }

    fn create(&self, kind: &str, name: &str) -> ClientResult<()> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        if self.existing.lock().contains(name) {
            return Err(ClientError::already_exists(kind, name));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> ClientResult<()> {
        self.create("ClusterRoleBinding", &binding.name)?;
        self.bindings.lock().push(binding.clone());
        self.existing.lock().insert(binding.name.clone());
        Ok(())
    }

    async fn create_namespace(&self, name: &str) -> ClientResult<()> {
        self.create("Namespace", name)?;
        self.namespaces.lock().push(name.to_string());
        self.existing.lock().insert(name.to_string());
        Ok(())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClientResult<BTreeMap<String, String>> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        self.config_maps
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClientError::not_found("ConfigMap", format!("{namespace}/{name}")))
    }
}

/// Hands out one shared [`FakeClusterClient`] and remembers the kubeconfigs
/// it was asked to use
pub struct FakeClusterClientProvider {
    client: Arc<FakeClusterClient>,
    kubeconfigs: Mutex<Vec<String>>,
}

impl FakeClusterClientProvider {
    pub fn new(client: Arc<FakeClusterClient>) -> Self {
        Self {
            client,
            kubeconfigs: Mutex::new(Vec::new()),
        }
    }

    pub fn kubeconfigs(&self) -> Vec<String> {
        self.kubeconfigs.lock().clone()
    }
}

impl ClusterClientProvider for FakeClusterClientProvider {
    fn client_for(
        &self,
        _cluster: &Cluster,
        kubeconfig: &str,
    ) -> ClientResult<Arc<dyn ClusterClient>> {
        self.kubeconfigs.lock().push(kubeconfig.to_string());
        let client: Arc<dyn ClusterClient> = Arc::clone(&self.client) as Arc<dyn ClusterClient>;
        Ok(client)
    }
}

/// Kubeconfig source that fails a configurable number of times first
#[derive(Default)]
pub struct FakeKubeconfigProvider {
    failures_remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeKubeconfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(times: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(times),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KubeconfigProvider for FakeKubeconfigProvider {
    async fn fetch(&self, cluster_name: &str) -> ClientResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ClientError::transport("kubeconfig endpoint unavailable"));
        }
        Ok(format!("kubeconfig-for-{cluster_name}"))
    }
}

/// Deployer answering installation state from a script; the last entry repeats
pub struct FakeDeployer {
    states: Mutex<VecDeque<InstallationStatus>>,
    installs: Mutex<Vec<InstallationRequest>>,
    upgrades: Mutex<Vec<InstallationRequest>>,
}

impl FakeDeployer {
    pub fn new() -> Self {
        Self::with_states(vec![InstallationStatus::new(
            InstallationState::Installed,
            "all components installed",
        )])
    }

    pub fn with_states(states: Vec<InstallationStatus>) -> Self {
        Self {
            states: Mutex::new(states.into()),
            installs: Mutex::new(Vec::new()),
            upgrades: Mutex::new(Vec::new()),
        }
    }

    pub fn installs(&self) -> Vec<InstallationRequest> {
        self.installs.lock().clone()
    }

    pub fn upgrades(&self) -> Vec<InstallationRequest> {
        self.upgrades.lock().clone()
    }
}

impl Default for FakeDeployer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Deployer for FakeDeployer {
    async fn trigger_installation(
        &self,
        _kubeconfig: &str,
        request: &InstallationRequest,
    ) -> ClientResult<()> {
        self.installs.lock().push(request.clone());
        Ok(())
    }

    async fn trigger_upgrade(
        &self,
        _kubeconfig: &str,
        request: &InstallationRequest,
    ) -> ClientResult<()> {
        self.upgrades.lock().push(request.clone());
        Ok(())
    }

    async fn installation_state(&self, _kubeconfig: &str) -> ClientResult<InstallationStatus> {
        let mut states = self.states.lock();
        let status = if states.len() > 1 {
            states.pop_front()
        } else {
            states.front().cloned()
        };
        status.ok_or_else(|| ClientError::transport("installer not reachable"))
    }
}

/// Fakes wired together, with handles kept for assertions
pub struct FakeWorld {
    pub shoots: Arc<FakeShootClient>,
    pub cluster_client: Arc<FakeClusterClient>,
    pub cluster_clients: Arc<FakeClusterClientProvider>,
    pub kubeconfigs: Arc<FakeKubeconfigProvider>,
    pub deployer: Arc<FakeDeployer>,
}

impl FakeWorld {
    pub fn new() -> Self {
        Self::with_parts(FakeKubeconfigProvider::new(), FakeDeployer::new())
    }

    pub fn with_parts(kubeconfigs: FakeKubeconfigProvider, deployer: FakeDeployer) -> Self {
        let cluster_client = Arc::new(FakeClusterClient::new());
        Self {
            shoots: Arc::new(FakeShootClient::new()),
            cluster_clients: Arc::new(FakeClusterClientProvider::new(Arc::clone(&cluster_client))),
            cluster_client,
            kubeconfigs: Arc::new(kubeconfigs),
            deployer: Arc::new(deployer),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            shoots: Arc::clone(&self.shoots) as Arc<dyn ShootClient>,
            cluster_clients: Arc::clone(&self.cluster_clients) as Arc<dyn ClusterClientProvider>,
            kubeconfigs: Arc::clone(&self.kubeconfigs) as Arc<dyn KubeconfigProvider>,
            deployer: Arc::clone(&self.deployer) as Arc<dyn Deployer>,
            operator_bindings: OperatorRoleBindingConfig {
                l2_group: "runtimeOperator".to_string(),
                l3_group: "runtimeAdmin".to_string(),
                creating_for_admin: true,
            },
        }
    }
}

impl Default for FakeWorld {
    fn default() -> Self {
        Self::new()
    }
}
