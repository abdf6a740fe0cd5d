use super::{
    errors::{StateMachineError, StateMachineResult},
    events::OperationEvent,
    states::OperationStatus,
};
use crate::models::Operation;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Pure transition function over [`Operation`] records.
///
/// Produces the next record without touching storage; the caller persists it
/// with a version check.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationStateMachine;

impl OperationStateMachine {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(
        &self,
        operation: &Operation,
        event: &OperationEvent,
        now: DateTime<Utc>,
    ) -> StateMachineResult<Operation> {
        if operation.is_terminal() {
            return Err(StateMachineError::AlreadyTerminal {
                operation_id: operation.id,
                status: operation.status,
                event: event.event_type(),
            });
        }

        let mut next = operation.clone();
        next.updated_at = now;

        match event {
            OperationEvent::Advance { stage, delay } => {
                if *stage == operation.stage {
                    return Err(StateMachineError::AdvanceToCurrentStage {
                        operation_id: operation.id,
                        stage: stage.to_string(),
                    });
                }
                next.stage = stage.clone();
                next.entered_stage_at = strictly_after(operation.entered_stage_at, now);
                next.attempts = 0;
                next.last_error = None;
                next.due_at = due_after(now, *delay);
            }
            OperationEvent::Poll { delay } => {
                next.attempts = 0;
                next.due_at = due_after(now, *delay);
            }
            OperationEvent::Retry { error, delay } => {
                next.attempts = operation.attempts.saturating_add(1);
                next.last_error = Some(error.clone());
                next.due_at = due_after(now, *delay);
            }
            OperationEvent::Succeed => {
                next.status = OperationStatus::Succeeded;
                next.last_error = None;
                next.finished_at = Some(now);
            }
            OperationEvent::Fail { error } => {
                next.status = OperationStatus::Failed;
                next.last_error = Some(error.clone());
                next.finished_at = Some(now);
            }
        }

        Ok(next)
    }
}

fn due_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// Clocks can repeat a reading; stage entry times must still move forward.
fn strictly_after(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}
