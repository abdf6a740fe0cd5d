use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Operation is parked on a stage and will be invoked again when due
    #[default]
    InProgress,
    /// Operation reached the terminal-success marker
    Succeeded,
    /// Operation was abandoned; `last_error` explains why
    Failed,
}

impl OperationStatus {
    /// Terminal operations are never invoked again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid operation status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!OperationStatus::InProgress.is_terminal());
        assert!(OperationStatus::Succeeded.is_terminal());
        assert!(OperationStatus::Failed.is_terminal());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(OperationStatus::InProgress.to_string(), "in_progress");
        assert_eq!(
            "failed".parse::<OperationStatus>().unwrap(),
            OperationStatus::Failed
        );
        assert!("complete".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&OperationStatus::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
        let parsed: OperationStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, OperationStatus::Succeeded);
    }
}
