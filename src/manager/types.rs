//! Manager Types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A command posted to the command queue on behalf of a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub action: String,
    pub channel_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

/// Outcome label for processed alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    Processed,
    Malformed,
    LockContended,
    Failed,
}

impl AlertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertOutcome::Processed => "processed",
            AlertOutcome::Malformed => "malformed",
            AlertOutcome::LockContended => "lock_contended",
            AlertOutcome::Failed => "failed",
        }
    }

    /// Whether the message should be acknowledged.
    pub fn acknowledge(&self) -> bool {
        matches!(self, AlertOutcome::Processed | AlertOutcome::Malformed)
    }
}

/// Outcome label for processed commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Executed,
    Rejected,
    Malformed,
}

impl CommandOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandOutcome::Executed => "executed",
            CommandOutcome::Rejected => "rejected",
            CommandOutcome::Malformed => "malformed",
        }
    }
}
