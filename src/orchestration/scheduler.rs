//! # Scheduler Loop
//!
//! Repeatedly asks the store for due operations and hands each one to the
//! [`StageExecutor`].
//!
//! - A [`Semaphore`] bounds how many operations execute at once.
//! - An in-process set keyed by operation id keeps two workers off the same
//!   operation; the store's compare-and-swap backs this up across processes.
//! - The running loop dispatches continuously: workers live in a [`JoinSet`]
//!   and the store is asked for more due work whenever a permit frees up, so
//!   one slow stage never holds back unrelated operations.
//!
//! `tick` runs one pass and waits for the work it dispatched; tests call it
//! directly.

use crate::config::SchedulerConfig;
use crate::error::{ProvisionerError, Result};
use crate::orchestration::stage_executor::{Decision, ExecutionReport, StageExecutor};
use dashmap::DashSet;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type Workers = JoinSet<Result<ExecutionReport>>;

/// Outcome counts for one scheduler pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Due operations returned by the store
    pub due: usize,
    pub dispatched: usize,
    /// Due but already being executed by another worker
    pub already_running: usize,
    pub advanced: usize,
    pub polled: usize,
    pub retried: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Store errors and panicked executions
    pub errors: usize,
}

impl TickReport {
    fn record(&mut self, report: &ExecutionReport) {
        match report.decision {
            Decision::Advanced { .. } => self.advanced += 1,
            Decision::Polled { .. } => self.polled += 1,
            Decision::Retried { .. } => self.retried += 1,
            Decision::Succeeded => self.succeeded += 1,
            Decision::Failed { .. } => self.failed += 1,
            Decision::Skipped(_) => self.skipped += 1,
        }
    }
}

/// Report of a finished worker; failures are logged and yield `None`
fn completed(joined: std::result::Result<Result<ExecutionReport>, JoinError>) -> Option<ExecutionReport> {
    match joined {
        Ok(Ok(execution)) => Some(execution),
        Ok(Err(e)) => {
            error!(error = %e, "Operation execution failed");
            None
        }
        Err(e) => {
            error!(error = %e, "Operation execution task panicked");
            None
        }
    }
}

fn semaphore_closed(error: &dyn std::fmt::Display) -> ProvisionerError {
    ProvisionerError::Internal(format!("Scheduler semaphore closed: {error}"))
}

/// Removes the operation from the in-flight set when the worker finishes,
/// including when it panics
struct InFlightGuard {
    in_flight: Arc<DashSet<Uuid>>,
    operation_id: Uuid,
}

impl InFlightGuard {
    /// `None` when another worker already holds the operation
    fn claim(in_flight: &Arc<DashSet<Uuid>>, operation_id: Uuid) -> Option<Self> {
        in_flight.insert(operation_id).then(|| Self {
            in_flight: Arc::clone(in_flight),
            operation_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.operation_id);
    }
}

#[derive(Debug)]
struct LoopState {
    running: AtomicBool,
    shutdown_notify: Notify,
}

pub struct SchedulerLoop {
    executor: Arc<StageExecutor>,
    config: SchedulerConfig,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<DashSet<Uuid>>,
    state: Arc<LoopState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SchedulerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerLoop")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl SchedulerLoop {
    pub fn new(executor: Arc<StageExecutor>, config: SchedulerConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_operations.max(1))),
            executor,
            config,
            in_flight: Arc::new(DashSet::new()),
            state: Arc::new(LoopState {
                running: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// One pass: fetch due operations, execute them concurrently up to the
    /// configured limit and wait for all of them.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut workers = Workers::new();
        let mut report = self
            .dispatch_due(&mut workers, self.config.batch_size, true)
            .await?;

        while let Some(joined) = workers.join_next().await {
            match completed(joined) {
                Some(execution) => report.record(&execution),
                None => report.errors += 1,
            }
        }
        Ok(report)
    }

    /// Spawn a worker per due operation that is not already in flight.
    ///
    /// With `wait_for_permit` the pass blocks until every claimed operation
    /// has a permit; otherwise it stops at the first missing permit and
    /// leaves the rest for a later pass.
    async fn dispatch_due(
        &self,
        workers: &mut Workers,
        limit: usize,
        wait_for_permit: bool,
    ) -> Result<TickReport> {
        let now = self.executor.clock().now();
        let due = self.executor.store().list_due(now, limit).await?;

        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        for operation_id in due {
            let Some(guard) = InFlightGuard::claim(&self.in_flight, operation_id) else {
                debug!(operation_id = %operation_id, "Operation already in flight, skipping");
                report.already_running += 1;
                continue;
            };

            let Some(permit) = self.acquire_permit(wait_for_permit).await? else {
                break;
            };

            let executor = Arc::clone(&self.executor);
            workers.spawn(async move {
                let _permit = permit;
                let _guard = guard;
                executor.execute(operation_id).await
            });
            report.dispatched += 1;
        }

        Ok(report)
    }

    async fn acquire_permit(&self, wait: bool) -> Result<Option<OwnedSemaphorePermit>> {
        let semaphore = Arc::clone(&self.semaphore);
        if wait {
            return semaphore
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|e| semaphore_closed(&e));
        }
        match semaphore.try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(e) => Err(semaphore_closed(&e)),
        }
    }

    /// Spawn the polling loop
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.state.running.swap(true, Ordering::AcqRel) {
            return Err(ProvisionerError::Internal(
                "Scheduler loop is already running".to_string(),
            ));
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    async fn run(&self) {
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent_operations = self.config.max_concurrent_operations,
            "Scheduler loop started"
        );

        let mut workers = Workers::new();
        while self.is_running() {
            let free = self.semaphore.available_permits();
            if free > 0 {
                // In-flight operations stay due until saved, so ask for enough
                // rows to see past them
                let limit = self.config.batch_size.min(free) + self.in_flight.len();
                match self.dispatch_due(&mut workers, limit, false).await {
                    Ok(report) if report.dispatched > 0 => debug!(
                        dispatched = report.dispatched,
                        already_running = report.already_running,
                        in_flight = self.in_flight.len(),
                        "Dispatched due operations"
                    ),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Scheduler dispatch failed"),
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {},
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    completed(joined);
                }
                _ = self.state.shutdown_notify.notified() => {
                    debug!("Shutdown notification received");
                    break;
                }
            }
        }

        if !workers.is_empty() {
            info!(in_flight = workers.len(), "Waiting for running stage invocations");
        }
        while let Some(joined) = workers.join_next().await {
            completed(joined);
        }

        self.state.running.store(false, Ordering::Release);
        info!("Scheduler loop stopped");
    }

    /// Stop polling and wait for dispatched workers to finish.
    ///
    /// Running stage invocations are not interrupted; they complete or hit
    /// their own timeouts.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        if !self.state.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        // notify_one keeps a permit if the loop is mid-tick and not yet waiting
        self.state.shutdown_notify.notify_one();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!("Scheduler loop shut down gracefully"),
                Ok(Err(e)) => warn!(error = %e, "Scheduler loop task ended abnormally"),
                Err(_) => {
                    return Err(ProvisionerError::Timeout(
                        "Scheduler loop stop timeout exceeded".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }
}
