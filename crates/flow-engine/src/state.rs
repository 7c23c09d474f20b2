//! Run-level execution state
//!
//! One `ExecutionState` lives inside each coordinator. Only the coordinator
//! mutates it; hosts read snapshots through `get_state()` or subscriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Lifecycle of a workflow run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    /// Cancelled between nodes; not an error
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

/// An error recorded during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// Failing node; `None` for workflow-level (validation) errors
    pub node_id: Option<NodeId>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn workflow(message: impl Into<String>) -> Self {
        Self {
            node_id: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn node(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Snapshot of a coordinator's run state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub status: RunStatus,
    /// Identifier of the current or last run
    pub execution_id: Option<String>,
    pub current_node_id: Option<NodeId>,
    pub completed_nodes: Vec<NodeId>,
    pub failed_nodes: Vec<NodeId>,
    /// Percentage of nodes started, 0 to 100
    pub progress: f64,
    pub errors: Vec<ErrorRecord>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Most recent error, if any
    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.errors.last()
    }

    /// Clear run data and return to `Idle`
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    /// Start a fresh run
    pub(crate) fn begin(&mut self, execution_id: String) {
        *self = Self {
            status: RunStatus::Running,
            execution_id: Some(execution_id),
            start_time: Some(Utc::now()),
            ..Self::default()
        };
    }

    pub(crate) fn mark_completed(&mut self, node_id: &str) {
        if !self.completed_nodes.iter().any(|id| id == node_id) {
            self.completed_nodes.push(node_id.to_string());
        }
    }

    pub(crate) fn mark_failed(&mut self, node_id: &str, message: impl Into<String>) {
        if !self.failed_nodes.iter().any(|id| id == node_id) {
            self.failed_nodes.push(node_id.to_string());
        }
        self.errors.push(ErrorRecord::node(node_id, message));
    }

    /// Move to a terminal status and stamp the end time
    pub(crate) fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.current_node_id = None;
        self.end_time = Some(Utc::now());
    }
}
