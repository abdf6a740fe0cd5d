//! # Operation
//!
//! Durable record of one long-running lifecycle action against a cluster.
//! Mutated only by the executor (through
//! [`OperationStateMachine`](crate::state_machine::OperationStateMachine));
//! immutable once its status is terminal.

use crate::stages::StageName;
use crate::state_machine::OperationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle action an operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Provision,
    Deprovision,
    Upgrade,
    Hibernate,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Provision,
        OperationKind::Deprovision,
        OperationKind::Upgrade,
        OperationKind::Hibernate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Deprovision => "deprovision",
            Self::Upgrade => "upgrade",
            Self::Hibernate => "hibernate",
        }
    }

    /// Whether a new operation of this kind may be accepted while `in_flight`
    /// is still running on the same cluster. Only deprovisioning is admitted,
    /// and it cancels the operation it supersedes.
    pub fn supersedes(self, in_flight: OperationKind) -> bool {
        self == Self::Deprovision && in_flight != Self::Deprovision
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provision" => Ok(Self::Provision),
            "deprovision" => Ok(Self::Deprovision),
            "upgrade" => Ok(Self::Upgrade),
            "hibernate" => Ok(Self::Hibernate),
            _ => Err(format!("Invalid operation kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub cluster_id: String,
    pub kind: OperationKind,
    /// Current stage; for terminal operations, the last stage that ran
    pub stage: StageName,
    pub status: OperationStatus,
    /// When the operation entered `stage`. Re-polling the same stage keeps it.
    pub entered_stage_at: DateTime<Utc>,
    /// Earliest time the scheduler may invoke the operation again
    pub due_at: DateTime<Utc>,
    /// Consecutive recoverable failures on the current stage
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Optimistic concurrency counter, bumped on every save
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Operation {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::InProgress && self.due_at <= now
    }

    /// Time spent on the current stage; drives stuck-operation detection
    pub fn time_in_stage(&self, now: DateTime<Utc>) -> Duration {
        (now - self.entered_stage_at).to_std().unwrap_or_default()
    }
}

/// Request to create an operation at the first stage of its kind
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub cluster_id: String,
    pub kind: OperationKind,
    pub first_stage: StageName,
}

impl NewOperation {
    pub fn new(cluster_id: impl Into<String>, kind: OperationKind, first_stage: StageName) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            kind,
            first_stage,
        }
    }

    /// Build the initial record: in progress, due immediately
    pub fn into_operation(self, now: DateTime<Utc>) -> Operation {
        Operation {
            id: Uuid::new_v4(),
            cluster_id: self.cluster_id,
            kind: self.kind,
            stage: self.first_stage,
            status: OperationStatus::InProgress,
            entered_stage_at: now,
            due_at: now,
            attempts: 0,
            last_error: None,
            version: 0,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }
}
