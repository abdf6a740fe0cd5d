// State machine module for operation lifecycle management
//
// Operations move InProgress(stage) -> InProgress(stage') -> ... -> Succeeded | Failed.
// Transitions are pure; persistence happens in the store with a version check.

pub mod errors;
pub mod events;
pub mod operation_state_machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::OperationEvent;
pub use operation_state_machine::OperationStateMachine;
pub use states::OperationStatus;
