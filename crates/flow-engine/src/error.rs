//! Error types for the flow engine

use thiserror::Error;

use crate::types::NodeId;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Broad classification of execution failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The graph itself is unsound (missing node, dangling reference, cycle)
    Structural,
    /// A node was not ready to run (upstream incomplete, missing configuration)
    Readiness,
    /// The host has not registered a handler the graph needs
    Configuration,
    /// The node's handler ran and failed
    Handler,
}

/// Errors from executing a single node
///
/// Every failure path of node execution ends up here; nothing escapes the
/// executor as a panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Node '{0}' not found in graph")]
    NodeNotFound(NodeId),

    #[error("Node '{node_id}' depends on '{dependency_id}', which has not completed")]
    DependencyNotReady {
        node_id: NodeId,
        dependency_id: NodeId,
    },

    #[error("Node '{node_id}' has insufficient configuration: {reason}")]
    InsufficientConfiguration { node_id: NodeId, reason: String },

    #[error("Output node '{node_id}' has no connected inputs")]
    NoInput { node_id: NodeId },

    #[error("No handler registered for '{handler}' (node '{node_id}')")]
    HandlerNotRegistered { node_id: NodeId, handler: String },

    #[error("Workflow is already running")]
    AlreadyRunning,

    #[error("Node '{node_id}' failed: {message}")]
    Handler { node_id: NodeId, message: String },
}

impl ExecutionError {
    /// Create a handler failure for a node
    pub fn handler(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NodeNotFound(_) => ErrorKind::Structural,
            Self::DependencyNotReady { .. }
            | Self::InsufficientConfiguration { .. }
            | Self::NoInput { .. }
            | Self::AlreadyRunning => ErrorKind::Readiness,
            Self::HandlerNotRegistered { .. } => ErrorKind::Configuration,
            Self::Handler { .. } => ErrorKind::Handler,
        }
    }

    /// The node this error is reported against, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeNotFound(id) => Some(id),
            Self::DependencyNotReady { node_id, .. }
            | Self::InsufficientConfiguration { node_id, .. }
            | Self::NoInput { node_id }
            | Self::HandlerNotRegistered { node_id, .. }
            | Self::Handler { node_id, .. } => Some(node_id),
            Self::AlreadyRunning => None,
        }
    }
}

/// Error returned by a node handler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("Serialization error: {}", err))
    }
}

/// Errors surfaced by the engine's outer API
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
