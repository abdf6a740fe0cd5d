//! Executor wired to an in-memory store and a manual clock

use chrono::{DateTime, TimeZone, Utc};
use provisioner_core::clock::{Clock, ManualClock};
use provisioner_core::config::RetryStrategy;
use provisioner_core::models::{Cluster, NewOperation, Operation, OperationKind};
use provisioner_core::orchestration::{
    BackoffCalculator, BackoffCalculatorConfig, ExecutionReport, StageExecutor,
    StandardErrorClassifier,
};
use provisioner_core::registry::StageRegistry;
use provisioner_core::store::{InMemoryStore, OperationStore};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const CLUSTER_ID: &str = "runtime-1";
pub const SHOOT_NAME: &str = "c-4f2a9b";

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

/// Exponential backoff from 10s to 5m without jitter, so delays are exact
pub fn deterministic_classifier(max_consecutive_failures: u32) -> Arc<StandardErrorClassifier> {
    let backoff = BackoffCalculator::new(BackoffCalculatorConfig {
        strategy: RetryStrategy::Exponential,
        base_delay: Duration::from_secs(10),
        max_delay: Duration::from_secs(300),
        multiplier: 2.0,
        jitter_enabled: false,
        max_jitter: 0.0,
    });
    Arc::new(StandardErrorClassifier::new(backoff, max_consecutive_failures))
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub executor: Arc<StageExecutor>,
    pub cluster: Cluster,
}

impl Harness {
    pub async fn new(registry: StageRegistry) -> Self {
        Self::with_cluster(registry, default_cluster(), 50).await
    }

    pub async fn with_retry_budget(registry: StageRegistry, max_consecutive_failures: u32) -> Self {
        Self::with_cluster(registry, default_cluster(), max_consecutive_failures).await
    }

    pub async fn with_cluster(
        registry: StageRegistry,
        cluster: Cluster,
        max_consecutive_failures: u32,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store.insert_cluster(&cluster).await.unwrap();
        let clock = Arc::new(ManualClock::new(epoch()));
        let executor = StageExecutor::new(Arc::new(registry), Arc::clone(&store) as Arc<dyn OperationStore>)
            .with_classifier(deterministic_classifier(max_consecutive_failures))
            .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);

        Self {
            store,
            clock,
            executor: Arc::new(executor),
            cluster,
        }
    }

    /// Insert an operation of `kind` at its registered first stage
    pub async fn start(&self, kind: OperationKind) -> Operation {
        let first = self.executor.registry().first_stage(kind).unwrap().clone();
        let operation = NewOperation::new(&self.cluster.id, kind, first).into_operation(self.clock.now());
        self.store.insert(&operation).await.unwrap();
        operation
    }

    pub async fn execute(&self, operation_id: Uuid) -> ExecutionReport {
        self.executor.execute(operation_id).await.unwrap()
    }

    pub async fn load(&self, operation_id: Uuid) -> Operation {
        self.store.load(operation_id).await.unwrap()
    }

    /// Move the clock to the operation's due time if it lies ahead
    pub async fn advance_to_due(&self, operation_id: Uuid) {
        let operation = self.load(operation_id).await;
        if operation.due_at > self.clock.now() {
            self.clock.set(operation.due_at);
        }
    }

    /// Advance to due and execute, repeatedly, until the operation is terminal
    pub async fn drive_to_completion(&self, operation_id: Uuid, max_steps: usize) -> Operation {
        for _ in 0..max_steps {
            self.advance_to_due(operation_id).await;
            let report = self.execute(operation_id).await;
            if report.decision.is_terminal() {
                break;
            }
        }
        self.load(operation_id).await
    }
}

pub fn default_cluster() -> Cluster {
    Cluster::new(CLUSTER_ID, SHOOT_NAME)
}
