use crate::error::ProvisionerError;
use crate::state_machine::OperationStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Operation {operation_id} is already {status}; {event} rejected")]
    AlreadyTerminal {
        operation_id: Uuid,
        status: OperationStatus,
        event: &'static str,
    },

    #[error("Advance of operation {operation_id} must name a different stage, got {stage}")]
    AdvanceToCurrentStage { operation_id: Uuid, stage: String },
}

impl From<StateMachineError> for ProvisionerError {
    fn from(err: StateMachineError) -> Self {
        ProvisionerError::InvalidTransition(err.to_string())
    }
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
