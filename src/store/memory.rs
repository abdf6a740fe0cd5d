use super::OperationStore;
use crate::error::{ProvisionerError, Result};
use crate::models::{Cluster, Operation, OperationKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Process-local store for tests and embedded use.
///
/// Compare-and-swap holds the map shard lock for the duration of the check
/// and write, so concurrent `save` calls on one operation serialize.
/// `insert_exclusive` does the same with the cluster's entry.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    operations: DashMap<Uuid, Operation>,
    clusters: DashMap<String, Cluster>,
    cancellations: DashSet<Uuid>,
    saves: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful `save` calls since creation
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }
}

#[async_trait]
impl OperationStore for InMemoryStore {
    async fn insert_cluster(&self, cluster: &Cluster) -> Result<()> {
        self.clusters.insert(cluster.id.clone(), cluster.clone());
        Ok(())
    }

    async fn load_cluster(&self, cluster_id: &str) -> Result<Cluster> {
        self.clusters
            .get(cluster_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ProvisionerError::ClusterNotFound(cluster_id.to_string()))
    }

    async fn insert(&self, operation: &Operation) -> Result<()> {
        match self.operations.entry(operation.id) {
            Entry::Occupied(_) => Err(ProvisionerError::ValidationError(format!(
                "Operation {} already exists",
                operation.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(operation.clone());
                Ok(())
            }
        }
    }

    async fn insert_exclusive(&self, operation: &Operation) -> Result<Vec<Uuid>> {
        // Held until return; serializes admission per cluster
        let _cluster = self
            .clusters
            .get_mut(&operation.cluster_id)
            .ok_or_else(|| ProvisionerError::ClusterNotFound(operation.cluster_id.clone()))?;

        let in_flight: Vec<(Uuid, OperationKind)> = self
            .operations
            .iter()
            .filter(|entry| entry.cluster_id == operation.cluster_id && !entry.is_terminal())
            .map(|entry| (entry.id, entry.kind))
            .collect();

        if let Some(&(operation_id, kind)) = in_flight
            .iter()
            .find(|(_, kind)| !operation.kind.supersedes(*kind))
        {
            return Err(ProvisionerError::ClusterBusy {
                cluster_id: operation.cluster_id.clone(),
                operation_id,
                kind,
            });
        }

        match self.operations.entry(operation.id) {
            Entry::Occupied(_) => {
                return Err(ProvisionerError::ValidationError(format!(
                    "Operation {} already exists",
                    operation.id
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(operation.clone());
            }
        }

        let superseded: Vec<Uuid> = in_flight.into_iter().map(|(id, _)| id).collect();
        for id in &superseded {
            self.cancellations.insert(*id);
        }
        Ok(superseded)
    }

    async fn load(&self, operation_id: Uuid) -> Result<Operation> {
        self.operations
            .get(&operation_id)
            .map(|entry| entry.value().clone())
            .ok_or(ProvisionerError::OperationNotFound(operation_id))
    }

    async fn save(&self, operation: &Operation, expected_version: i64) -> Result<Operation> {
        let mut stored = self
            .operations
            .get_mut(&operation.id)
            .ok_or(ProvisionerError::OperationNotFound(operation.id))?;

        if stored.version != expected_version || stored.is_terminal() {
            return Err(ProvisionerError::ConcurrentModification {
                operation_id: operation.id,
                expected_version,
            });
        }

        let mut next = operation.clone();
        next.version = expected_version + 1;
        *stored = next.clone();
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(next)
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>> {
        let mut due: Vec<(DateTime<Utc>, Uuid)> = self
            .operations
            .iter()
            .filter(|entry| entry.is_due(now))
            .map(|entry| (entry.due_at, entry.id))
            .collect();
        due.sort();
        Ok(due.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn list_in_progress(&self) -> Result<Vec<Operation>> {
        let mut operations: Vec<Operation> = self
            .operations
            .iter()
            .filter(|entry| !entry.is_terminal())
            .map(|entry| entry.value().clone())
            .collect();
        operations.sort_by_key(|op| op.created_at);
        Ok(operations)
    }

    async fn list_for_cluster(&self, cluster_id: &str) -> Result<Vec<Operation>> {
        let mut operations: Vec<Operation> = self
            .operations
            .iter()
            .filter(|entry| entry.cluster_id == cluster_id)
            .map(|entry| entry.value().clone())
            .collect();
        operations.sort_by_key(|op| op.created_at);
        Ok(operations)
    }

    async fn request_cancellation(&self, operation_id: Uuid) -> Result<()> {
        if !self.operations.contains_key(&operation_id) {
            return Err(ProvisionerError::OperationNotFound(operation_id));
        }
        self.cancellations.insert(operation_id);
        Ok(())
    }

    async fn is_cancellation_requested(&self, operation_id: Uuid) -> Result<bool> {
        Ok(self.cancellations.contains(&operation_id))
    }
}
