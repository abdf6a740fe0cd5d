use crate::stages::StageName;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Executor decisions that drive operation state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OperationEvent {
    /// Move to a different stage, invoking it after `delay`
    Advance { stage: StageName, delay: Duration },
    /// Stay on the current stage; the stage asked to be polled again
    Poll { delay: Duration },
    /// Stay on the current stage after a recoverable failure
    Retry { error: String, delay: Duration },
    /// The terminal-success marker was reached
    Succeed,
    /// The operation is abandoned
    Fail { error: String },
}

impl OperationEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Advance { .. } => "advance",
            Self::Poll { .. } => "poll",
            Self::Retry { .. } => "retry",
            Self::Succeed => "succeed",
            Self::Fail { .. } => "fail",
        }
    }

    /// Delay before the next invocation, if the operation stays schedulable
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Advance { delay, .. } | Self::Poll { delay } | Self::Retry { delay, .. } => {
                Some(*delay)
            }
            Self::Succeed | Self::Fail { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeed | Self::Fail { .. })
    }
}
