pub mod cluster;
pub mod operation;

// Re-export core models for easy access
pub use crate::state_machine::OperationStatus;
pub use cluster::Cluster;
pub use operation::{NewOperation, Operation, OperationKind};
