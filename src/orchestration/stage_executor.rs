//! # Stage Executor
//!
//! Advances one due operation by exactly one stage invocation.
//!
//! ## Transition algorithm
//!
//! Given an operation `InProgress(S)`:
//!
//! 1. Cancellation requested: `Failed`, stage not invoked.
//! 2. `(kind, S)` not in the registry: `Failed` with a structural error.
//! 3. Time spent on `S` exceeds the stage's time limit: `Failed`.
//! 4. Invoke `S` under its timeout. An elapsed timeout is a recoverable
//!    failure.
//! 5. Success `(next, delay)`:
//!    - `next == S`: stay, due again after `delay`
//!    - `next` is not among the stages `S` declared with `then`: `Failed`
//!      (structural)
//!    - `next` is the terminal marker: `Succeeded`
//!    - otherwise move to `next`, reset the stage clock, due after `delay`
//! 6. Failure: the [`ErrorClassifier`] decides between retrying `S` after a
//!    delay and `Failed`.
//! 7. Persist with compare-and-swap on the version that was read. Losing the
//!    race discards the result; the stored state wins.
//!
//! A crash between 4 and 7 leaves the record untouched, so the same stage is
//! invoked again on a later tick. Stages are idempotent for this reason.
//!
//! A zero delay never continues synchronously; the next stage runs when the
//! scheduler picks the operation up again.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::constants::failure_reasons;
use crate::error::{ProvisionerError, Result};
use crate::logging::{log_operation_transition, StageLogger};
use crate::models::Operation;
use crate::orchestration::backoff_calculator::{BackoffCalculator, BackoffCalculatorConfig};
use crate::orchestration::error_classifier::{
    ErrorClassifier, ErrorContext, StageError, StandardErrorClassifier,
};
use crate::registry::{StageDefinition, StageRegistry};
use crate::stages::{StageName, StageOutcome};
use crate::state_machine::{OperationEvent, OperationStateMachine};
use crate::store::OperationStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// Why an operation was handed back without being invoked or persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Already `Succeeded` or `Failed`
    Terminal,
    /// Due time has not passed (duplicate or early delivery)
    NotDue,
    /// Another writer saved a newer version first
    ConcurrentModification,
}

/// What the executor did with an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Advanced {
        from: StageName,
        to: StageName,
        delay: Duration,
    },
    Polled {
        delay: Duration,
    },
    Retried {
        error: String,
        delay: Duration,
    },
    Succeeded,
    Failed {
        error: String,
    },
    Skipped(SkipReason),
}

impl Decision {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Decision::Succeeded | Decision::Failed { .. })
    }

    fn from_event(event: &OperationEvent, from: &StageName) -> Self {
        match event {
            OperationEvent::Advance { stage, delay } => Decision::Advanced {
                from: from.clone(),
                to: stage.clone(),
                delay: *delay,
            },
            OperationEvent::Poll { delay } => Decision::Polled { delay: *delay },
            OperationEvent::Retry { error, delay } => Decision::Retried {
                error: error.clone(),
                delay: *delay,
            },
            OperationEvent::Succeed => Decision::Succeeded,
            OperationEvent::Fail { error } => Decision::Failed {
                error: error.clone(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub operation_id: Uuid,
    pub decision: Decision,
    /// Record as persisted; `None` when skipped
    pub operation: Option<Operation>,
    pub duration: Duration,
}

impl ExecutionReport {
    fn skipped(operation_id: Uuid, reason: SkipReason, started: Instant) -> Self {
        Self {
            operation_id,
            decision: Decision::Skipped(reason),
            operation: None,
            duration: started.elapsed(),
        }
    }
}

pub struct StageExecutor {
    registry: Arc<StageRegistry>,
    store: Arc<dyn OperationStore>,
    classifier: Arc<dyn ErrorClassifier>,
    clock: Arc<dyn Clock>,
    state_machine: OperationStateMachine,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("registry", &self.registry.stats())
            .field("classifier", &self.classifier.classifier_name())
            .finish_non_exhaustive()
    }
}

impl StageExecutor {
    pub fn new(registry: Arc<StageRegistry>, store: Arc<dyn OperationStore>) -> Self {
        Self {
            registry,
            store,
            classifier: Arc::new(StandardErrorClassifier::default()),
            clock: Arc::new(SystemClock),
            state_machine: OperationStateMachine::new(),
        }
    }

    /// Executor whose retry policy comes from the engine configuration
    pub fn from_config(
        registry: Arc<StageRegistry>,
        store: Arc<dyn OperationStore>,
        config: &EngineConfig,
    ) -> Self {
        let backoff = BackoffCalculator::new(BackoffCalculatorConfig::from(&config.retry));
        Self::new(registry, store).with_classifier(Arc::new(StandardErrorClassifier::new(
            backoff,
            config.retry.max_consecutive_failures,
        )))
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &Arc<StageRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run one transition for `operation_id` and persist it.
    ///
    /// `Err` means the store could not be read or written; the operation is
    /// unchanged and will be picked up again.
    #[instrument(skip(self), fields(operation_id = %operation_id))]
    pub async fn execute(&self, operation_id: Uuid) -> Result<ExecutionReport> {
        let started = Instant::now();
        let operation = self.store.load(operation_id).await?;

        if operation.is_terminal() {
            debug!(status = %operation.status, "Operation already terminal, skipping");
            return Ok(ExecutionReport::skipped(operation_id, SkipReason::Terminal, started));
        }
        if !operation.is_due(self.clock.now()) {
            debug!(due_at = %operation.due_at, "Operation not due yet, skipping");
            return Ok(ExecutionReport::skipped(operation_id, SkipReason::NotDue, started));
        }

        let event = self.decide(&operation).await?;
        self.persist(operation, event, started).await
    }

    async fn decide(&self, operation: &Operation) -> Result<OperationEvent> {
        if self.store.is_cancellation_requested(operation.id).await? {
            warn!(stage = %operation.stage, "Operation cancelled at stage boundary");
            return Ok(OperationEvent::Fail {
                error: failure_reasons::CANCELLED.to_string(),
            });
        }

        let definition = match self.registry.lookup(operation.kind, &operation.stage) {
            Ok(definition) => definition,
            Err(e) => {
                error!(error = %e, "Structural error: current stage is not registered");
                return Ok(OperationEvent::Fail {
                    error: e.to_string(),
                });
            }
        };

        if let Some(limit) = definition.time_limit {
            let in_stage = operation.time_in_stage(self.clock.now());
            if in_stage > limit {
                warn!(
                    stage = %operation.stage,
                    time_in_stage_secs = in_stage.as_secs(),
                    time_limit_secs = limit.as_secs(),
                    "Stage time limit exceeded"
                );
                return Ok(OperationEvent::Fail {
                    error: format!(
                        "stage {} exceeded its time limit of {limit:?}; last error: {}",
                        operation.stage,
                        operation.last_error.as_deref().unwrap_or("none")
                    ),
                });
            }
        }

        let cluster = match self.store.load_cluster(&operation.cluster_id).await {
            Ok(cluster) => cluster,
            Err(ProvisionerError::ClusterNotFound(id)) => {
                error!(cluster_id = %id, "Operation references a missing cluster");
                return Ok(OperationEvent::Fail {
                    error: format!("cluster {id} not found"),
                });
            }
            Err(e) => return Err(e),
        };

        let logger = StageLogger::new(operation.id, &operation.cluster_id, operation.stage.clone());
        let outcome = self.invoke(definition, &cluster, operation, &logger).await;
        Ok(self.interpret(operation, definition, outcome))
    }

    async fn invoke(
        &self,
        definition: &StageDefinition,
        cluster: &crate::models::Cluster,
        operation: &Operation,
        logger: &StageLogger,
    ) -> StageOutcome {
        let invocation_started = Instant::now();
        let outcome = match timeout(
            definition.timeout,
            definition.stage.run(cluster, operation, logger),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    stage = %definition.name,
                    timeout_ms = definition.timeout.as_millis() as u64,
                    "Stage invocation timed out"
                );
                Err(StageError::timeout(definition.name.clone(), definition.timeout))
            }
        };
        debug!(
            stage = %definition.name,
            duration_ms = invocation_started.elapsed().as_millis() as u64,
            success = outcome.is_ok(),
            "Stage invocation finished"
        );
        outcome
    }

    fn interpret(
        &self,
        operation: &Operation,
        definition: &StageDefinition,
        outcome: StageOutcome,
    ) -> OperationEvent {
        match outcome {
            Ok(result) if result.next == operation.stage => OperationEvent::Poll {
                delay: result.delay,
            },
            Ok(result) if !definition.next_stages.contains(&result.next) => {
                error!(
                    stage = %operation.stage,
                    next_stage = %result.next,
                    declared = ?definition.next_stages,
                    "Structural error: stage returned an undeclared next stage"
                );
                OperationEvent::Fail {
                    error: format!(
                        "stage {} returned next stage {} for {}, which it does not declare",
                        operation.stage, result.next, operation.kind
                    ),
                }
            }
            Ok(result) if result.next.is_finished() => OperationEvent::Succeed,
            Ok(result) => OperationEvent::Advance {
                stage: result.next,
                delay: result.delay,
            },
            Err(stage_error) => {
                let context = ErrorContext {
                    operation_id: operation.id,
                    stage: operation.stage.clone(),
                    attempt_number: operation.attempts.saturating_add(1),
                    stage_retry_delay: definition.retry_delay,
                };
                let classification = self.classifier.classify_error(&stage_error, &context);
                match classification.retry_delay {
                    Some(delay) if classification.is_retryable => {
                        warn!(
                            stage = %operation.stage,
                            error_code = %classification.error_code,
                            attempt = context.attempt_number,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %classification.error_message,
                            "Recoverable stage failure, retrying"
                        );
                        OperationEvent::Retry {
                            error: classification.error_message,
                            delay,
                        }
                    }
                    _ => {
                        error!(
                            stage = %operation.stage,
                            error_code = %classification.error_code,
                            error = %classification.error_message,
                            "Stage failed permanently"
                        );
                        OperationEvent::Fail {
                            error: classification.error_message,
                        }
                    }
                }
            }
        }
    }

    async fn persist(
        &self,
        operation: Operation,
        event: OperationEvent,
        started: Instant,
    ) -> Result<ExecutionReport> {
        let next = self
            .state_machine
            .apply(&operation, &event, self.clock.now())?;

        let saved = match self.store.save(&next, operation.version).await {
            Ok(saved) => saved,
            Err(e) if e.is_conflict() => {
                warn!(
                    stage = %operation.stage,
                    version = operation.version,
                    "Operation modified concurrently, discarding result"
                );
                return Ok(ExecutionReport::skipped(
                    operation.id,
                    SkipReason::ConcurrentModification,
                    started,
                ));
            }
            Err(e) => return Err(e),
        };

        log_operation_transition(
            saved.id,
            saved.kind,
            &operation.stage,
            &saved.stage,
            saved.status,
            event.delay(),
        );

        Ok(ExecutionReport {
            operation_id: saved.id,
            decision: Decision::from_event(&event, &operation.stage),
            operation: Some(saved),
            duration: started.elapsed(),
        })
    }
}
