//! Event types for streaming workflow progress
//!
//! Events are sent from the coordinator to the host (an editor, a CLI, a
//! test) to report run lifecycle and per-node status/result changes.

use serde::{Deserialize, Serialize};

use crate::types::NodeStatus;

/// Trait for receiving workflow events
///
/// This abstracts over the transport mechanism (channel, callback, log)
/// so the engine can be embedded in different hosts. `send` is called
/// synchronously from the run loop.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone, thiserror::Error)]
#[error("Event error: {message}")]
pub struct EventError {
    pub message: String,
}

/// Partial update of a node's execution fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeUpdate {
    pub fn status(status: NodeStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn completed(result: serde_json::Value) -> Self {
        Self {
            status: Some(NodeStatus::Completed),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(NodeStatus::Error),
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Events emitted during workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkflowEvent {
    /// Workflow run started
    #[serde(rename_all = "camelCase")]
    WorkflowStarted {
        workflow_id: String,
        execution_id: String,
        node_count: usize,
    },

    /// A node's status or result changed
    #[serde(rename_all = "camelCase")]
    NodeUpdated {
        execution_id: String,
        node_id: String,
        update: NodeUpdate,
    },

    /// Every node completed
    #[serde(rename_all = "camelCase")]
    WorkflowCompleted {
        workflow_id: String,
        execution_id: String,
        outputs: serde_json::Map<String, serde_json::Value>,
    },

    /// The run halted on an error
    #[serde(rename_all = "camelCase")]
    WorkflowFailed {
        workflow_id: String,
        execution_id: String,
        error: String,
    },

    /// The run was stopped between nodes
    #[serde(rename_all = "camelCase")]
    WorkflowStopped {
        workflow_id: String,
        execution_id: String,
    },
}

impl WorkflowEvent {
    /// Create a node update event
    pub fn node_updated(execution_id: &str, node_id: &str, update: NodeUpdate) -> Self {
        Self::NodeUpdated {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            update,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: WorkflowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<WorkflowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().clone()
    }

    /// Node updates for one node, in emission order
    pub fn node_updates(&self, node_id: &str) -> Vec<NodeUpdate> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                WorkflowEvent::NodeUpdated {
                    node_id: id,
                    update,
                    ..
                } if id == node_id => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Adapts a closure into an event sink
pub struct FnEventSink<F>(pub F);

impl<F> EventSink for FnEventSink<F>
where
    F: Fn(WorkflowEvent) + Send + Sync,
{
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        (self.0)(event);
        Ok(())
    }
}
