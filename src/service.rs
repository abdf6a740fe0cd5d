//! # Operation Service
//!
//! Entry point for lifecycle requests and status queries.
//!
//! A cluster runs one operation at a time. The exception is deprovisioning:
//! it is accepted while another operation is in flight and asks that
//! operation to cancel. Cancellation lands at the in-flight operation's next
//! stage boundary, where the executor fails it instead of invoking the stage.

use crate::clock::{Clock, SystemClock};
use crate::config::MonitoringConfig;
use crate::error::Result;
use crate::models::{Cluster, NewOperation, Operation, OperationKind, OperationStatus};
use crate::registry::StageRegistry;
use crate::stages::StageName;
use crate::store::OperationStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Read-only view of an operation for callers outside the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStatusView {
    pub id: Uuid,
    pub cluster_id: String,
    pub kind: OperationKind,
    pub stage: StageName,
    pub status: OperationStatus,
    pub last_error: Option<String>,
    pub attempts: u32,
    pub time_in_stage: Duration,
}

impl OperationStatusView {
    fn new(operation: Operation, time_in_stage: Duration) -> Self {
        Self {
            id: operation.id,
            cluster_id: operation.cluster_id,
            kind: operation.kind,
            stage: operation.stage,
            status: operation.status,
            last_error: operation.last_error,
            attempts: operation.attempts,
            time_in_stage,
        }
    }
}

pub struct OperationService {
    store: Arc<dyn OperationStore>,
    registry: Arc<StageRegistry>,
    clock: Arc<dyn Clock>,
    stuck_threshold: Duration,
}

impl OperationService {
    pub fn new(store: Arc<dyn OperationStore>, registry: Arc<StageRegistry>) -> Self {
        Self {
            store,
            registry,
            clock: Arc::new(SystemClock),
            stuck_threshold: MonitoringConfig::default().stuck_operation_threshold(),
        }
    }

    pub fn with_monitoring(mut self, monitoring: &MonitoringConfig) -> Self {
        self.stuck_threshold = monitoring.stuck_operation_threshold();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn register_cluster(&self, cluster: &Cluster) -> Result<()> {
        self.store.insert_cluster(cluster).await
    }

    /// Accept a lifecycle request and create its operation, due immediately.
    ///
    /// Admission is decided by the store so that concurrent requests for one
    /// cluster cannot both pass the busy check.
    #[instrument(skip(self))]
    pub async fn start(&self, kind: OperationKind, cluster_id: &str) -> Result<Operation> {
        let first_stage = self.registry.first_stage(kind)?.clone();
        let operation = NewOperation::new(cluster_id, kind, first_stage).into_operation(self.clock.now());

        let superseded = self.store.insert_exclusive(&operation).await?;
        for id in &superseded {
            warn!(
                operation_id = %id,
                superseded_by = %operation.id,
                "Cancellation requested by deprovisioning"
            );
        }
        info!(
            operation_id = %operation.id,
            stage = %operation.stage,
            "Operation accepted"
        );
        Ok(operation)
    }

    pub async fn status(&self, operation_id: Uuid) -> Result<OperationStatusView> {
        let operation = self.store.load(operation_id).await?;
        let time_in_stage = if operation.is_terminal() {
            Duration::ZERO
        } else {
            operation.time_in_stage(self.clock.now())
        };
        Ok(OperationStatusView::new(operation, time_in_stage))
    }

    /// In-progress operations that have spent longer than the configured
    /// threshold on their current stage
    pub async fn stuck_operations(&self) -> Result<Vec<OperationStatusView>> {
        let threshold = self.stuck_threshold;
        let now = self.clock.now();
        let stuck: Vec<OperationStatusView> = self
            .store
            .list_in_progress()
            .await?
            .into_iter()
            .filter_map(|op| {
                let time_in_stage = op.time_in_stage(now);
                (time_in_stage > threshold).then(|| OperationStatusView::new(op, time_in_stage))
            })
            .collect();

        for view in &stuck {
            warn!(
                operation_id = %view.id,
                kind = %view.kind,
                stage = %view.stage,
                time_in_stage_secs = view.time_in_stage.as_secs(),
                threshold_secs = threshold.as_secs(),
                last_error = view.last_error.as_deref().unwrap_or(""),
                "Operation stuck in stage"
            );
        }
        Ok(stuck)
    }
}
