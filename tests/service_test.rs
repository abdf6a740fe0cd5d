//! Lifecycle requests, status queries and stuck-operation detection

mod common;

use common::*;
use provisioner_core::clock::Clock;
use provisioner_core::config::{MonitoringConfig, StagesConfig};
use provisioner_core::constants::failure_reasons;
use provisioner_core::constants::stages::*;
use provisioner_core::error::ProvisionerError;
use provisioner_core::lifecycle::default_registry;
use provisioner_core::models::{Cluster, OperationKind, OperationStatus};
use provisioner_core::service::OperationService;
use provisioner_core::store::OperationStore;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    world: FakeWorld,
    harness: Harness,
    service: OperationService,
}

async fn fixture() -> Fixture {
    let world = FakeWorld::new();
    let registry = default_registry(&world.collaborators(), &StagesConfig::default()).unwrap();
    let harness = Harness::new(registry).await;
    let service = OperationService::new(
        Arc::clone(&harness.store) as Arc<dyn OperationStore>,
        Arc::clone(harness.executor.registry()),
    )
    .with_clock(Arc::clone(&harness.clock) as Arc<dyn Clock>);
    Fixture {
        world,
        harness,
        service,
    }
}

#[tokio::test]
async fn test_start_creates_operation_at_first_stage() {
    let fx = fixture().await;

    let op = fx
        .service
        .start(OperationKind::Provision, CLUSTER_ID)
        .await
        .unwrap();

    assert_eq!(op.stage.as_str(), WAITING_FOR_CLUSTER_CREATION);
    assert_eq!(op.status, OperationStatus::InProgress);
    assert!(op.is_due(fx.harness.clock.now()));
    assert_eq!(fx.harness.load(op.id).await, op);
}

#[tokio::test]
async fn test_start_requires_known_cluster() {
    let fx = fixture().await;

    let result = fx.service.start(OperationKind::Provision, "unknown").await;

    assert!(matches!(result, Err(ProvisionerError::ClusterNotFound(_))));
}

#[tokio::test]
async fn test_second_operation_on_busy_cluster_is_rejected() {
    let fx = fixture().await;
    fx.service
        .start(OperationKind::Provision, CLUSTER_ID)
        .await
        .unwrap();

    let result = fx.service.start(OperationKind::Upgrade, CLUSTER_ID).await;

    assert!(matches!(
        result,
        Err(ProvisionerError::ClusterBusy { kind: OperationKind::Provision, .. })
    ));
    assert_eq!(fx.harness.store.operation_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_admit_one_operation() {
    let fx = fixture().await;
    let service = Arc::new(fx.service);

    let handles: Vec<_> = [
        OperationKind::Provision,
        OperationKind::Upgrade,
        OperationKind::Hibernate,
    ]
    .into_iter()
    .cycle()
    .take(9)
    .map(|kind| {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.start(kind, CLUSTER_ID).await })
    })
    .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(error) => assert!(matches!(error, ProvisionerError::ClusterBusy { .. })),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(fx.harness.store.operation_count(), 1);
}

#[tokio::test]
async fn test_deprovision_cancels_in_flight_operation() {
    let fx = fixture().await;
    let provision = fx
        .service
        .start(OperationKind::Provision, CLUSTER_ID)
        .await
        .unwrap();
    // Provisioning is parked waiting for the shoot
    fx.harness.execute(provision.id).await;

    let deprovision = fx
        .service
        .start(OperationKind::Deprovision, CLUSTER_ID)
        .await
        .unwrap();
    assert!(fx
        .harness
        .store
        .is_cancellation_requested(provision.id)
        .await
        .unwrap());

    fx.harness.advance_to_due(provision.id).await;
    fx.harness.execute(provision.id).await;
    let cancelled = fx.harness.load(provision.id).await;
    assert_eq!(cancelled.status, OperationStatus::Failed);
    assert_eq!(cancelled.last_error.as_deref(), Some(failure_reasons::CANCELLED));

    let finished = fx.harness.drive_to_completion(deprovision.id, 5).await;
    assert_eq!(finished.status, OperationStatus::Succeeded);
    // Shoot was never created; deletion treats NotFound as done
    assert_eq!(fx.world.shoots.delete_calls(), 1);
}

#[tokio::test]
async fn test_duplicate_deprovision_is_rejected() {
    let fx = fixture().await;
    fx.service
        .start(OperationKind::Deprovision, CLUSTER_ID)
        .await
        .unwrap();

    let result = fx.service.start(OperationKind::Deprovision, CLUSTER_ID).await;

    assert!(matches!(
        result,
        Err(ProvisionerError::ClusterBusy { kind: OperationKind::Deprovision, .. })
    ));
}

#[tokio::test]
async fn test_new_operation_allowed_after_previous_finished() {
    let fx = fixture().await;
    fx.world.shoots.set_ready(SHOOT_NAME);
    let hibernate = fx
        .service
        .start(OperationKind::Hibernate, CLUSTER_ID)
        .await
        .unwrap();
    fx.world.shoots.mark_hibernated(SHOOT_NAME);
    let finished = fx.harness.drive_to_completion(hibernate.id, 5).await;
    assert_eq!(finished.status, OperationStatus::Succeeded);

    let upgrade = fx.service.start(OperationKind::Upgrade, CLUSTER_ID).await;

    assert!(upgrade.is_ok());
}

#[tokio::test]
async fn test_status_reports_time_in_stage() {
    let fx = fixture().await;
    let op = fx
        .service
        .start(OperationKind::Provision, CLUSTER_ID)
        .await
        .unwrap();
    fx.harness.execute(op.id).await;
    fx.harness.clock.advance(Duration::from_secs(90));

    let status = fx.service.status(op.id).await.unwrap();

    assert_eq!(status.stage.as_str(), WAITING_FOR_CLUSTER_CREATION);
    assert_eq!(status.status, OperationStatus::InProgress);
    assert_eq!(status.time_in_stage, Duration::from_secs(90));
    assert_eq!(status.attempts, 0);
}

#[tokio::test]
async fn test_stuck_operations_exceed_threshold() {
    let fx = fixture().await;
    fx.service
        .register_cluster(&Cluster::new("runtime-2", "c-77aa01"))
        .await
        .unwrap();
    let old = fx
        .service
        .start(OperationKind::Provision, CLUSTER_ID)
        .await
        .unwrap();
    fx.harness.clock.advance(Duration::from_secs(3 * 3600));
    let recent = fx
        .service
        .start(OperationKind::Provision, "runtime-2")
        .await
        .unwrap();
    fx.harness.clock.advance(Duration::from_secs(2 * 3600));

    let stuck = fx.service.stuck_operations().await.unwrap();

    let ids: Vec<_> = stuck.iter().map(|view| view.id).collect();
    assert_eq!(ids, vec![old.id]);
    assert!(!ids.contains(&recent.id));
    assert_eq!(stuck[0].time_in_stage, Duration::from_secs(5 * 3600));
}

#[tokio::test]
async fn test_stuck_threshold_comes_from_monitoring_config() {
    let fx = fixture().await;
    let service = fx.service.with_monitoring(&MonitoringConfig {
        stuck_operation_threshold_seconds: 600,
    });
    let op = service
        .start(OperationKind::Provision, CLUSTER_ID)
        .await
        .unwrap();

    fx.harness.clock.advance(Duration::from_secs(300));
    assert!(service.stuck_operations().await.unwrap().is_empty());

    fx.harness.clock.advance(Duration::from_secs(301));
    let stuck = service.stuck_operations().await.unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].id, op.id);
}
