//! Core types for workflow graphs
//!
//! These types define the structure of workflow graphs: nodes with their
//! kind-specific configuration and execution status, and the connections
//! between them.

use serde::{Deserialize, Serialize};

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for a connection
pub type ConnectionId = String;

/// Execution status of a single node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeStatus {
    /// Not executed in the current run (initial state)
    #[default]
    Idle,
    /// Handler is currently executing
    Running,
    /// Handler finished and the result is stored
    Completed,
    /// Readiness check or handler failed
    Error,
}

/// Configuration for a user input node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputConfig {
    /// The value entered by the user
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Configuration for a generate node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateConfig {
    /// Prompt template with `{{name}}` placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Model identifier passed through to the generation handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature passed through to the generation handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Token limit passed through to the generation handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerateConfig {
    /// Template text, treating an empty string as unset
    pub fn template(&self) -> Option<&str> {
        self.template.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// How an output node combines its inputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputFormat {
    /// Input texts joined by newlines
    #[default]
    Text,
    /// Pretty-printed JSON object of the named inputs
    Json,
    /// Numbered list, one input per line
    List,
}

/// Configuration for an output node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    /// Output format; the engine default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
}

/// A single asset attached by an add-assets node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
    pub name: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Configuration for an add-assets node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddAssetsConfig {
    #[serde(default)]
    pub assets: Vec<AssetRef>,
}

/// Configuration for a host-defined node kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomConfig {
    /// Registry key of the handler that executes this node
    pub handler: String,
    /// Opaque handler parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The kind of a node together with its kind-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "camelCase")]
pub enum NodeKind {
    UserInput(UserInputConfig),
    Generate(GenerateConfig),
    Output(OutputConfig),
    AddAssets(AddAssetsConfig),
    Custom(CustomConfig),
}

impl NodeKind {
    pub const USER_INPUT: &'static str = "userInput";
    pub const GENERATE: &'static str = "generate";
    pub const OUTPUT: &'static str = "output";
    pub const ADD_ASSETS: &'static str = "addAssets";

    /// Key under which the handler for this kind is registered
    pub fn handler_key(&self) -> &str {
        match self {
            NodeKind::UserInput(_) => Self::USER_INPUT,
            NodeKind::Generate(_) => Self::GENERATE,
            NodeKind::Output(_) => Self::OUTPUT,
            NodeKind::AddAssets(_) => Self::ADD_ASSETS,
            NodeKind::Custom(config) => &config.handler,
        }
    }

    pub fn is_output(&self) -> bool {
        matches!(self, NodeKind::Output(_))
    }
}

/// A node instance in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier for this node instance
    pub id: NodeId,
    /// Display title, also the variable name downstream nodes see
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Kind and configuration
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Execution status, written only by the coordinator during a run
    #[serde(default)]
    pub status: NodeStatus,
    /// Result of the last successful execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Node {
    /// Create an idle node with no result
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            title: None,
            kind,
            status: NodeStatus::Idle,
            result: None,
        }
    }

    /// Set the display title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Title if set and non-empty
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref().filter(|t| !t.is_empty())
    }

    /// Human-readable label for diagnostics: title, else id
    pub fn label(&self) -> &str {
        self.title().unwrap_or(&self.id)
    }
}

/// A directed connection from one node's output port to another's input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: ConnectionId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    #[serde(default)]
    pub source_port: String,
    #[serde(default)]
    pub target_port: String,
}

impl Connection {
    pub fn new(
        id: impl Into<String>,
        source_node_id: impl Into<String>,
        source_port: impl Into<String>,
        target_node_id: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_node_id: source_node_id.into(),
            target_node_id: target_node_id.into(),
            source_port: source_port.into(),
            target_port: target_port.into(),
        }
    }
}

/// A complete workflow graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Nodes in the graph, ids unique
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Connections between nodes
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl WorkflowGraph {
    /// Create a new empty graph
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find a node by ID (mutable)
    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Get connections coming into a node
    pub fn incoming_connections<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.target_node_id == node_id)
    }

    /// Get connections going out of a node
    pub fn outgoing_connections<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.source_node_id == node_id)
    }

    /// Upstream nodes feeding into this node
    ///
    /// Each source appears once, in the order of its first connection.
    /// Connections from unknown nodes are skipped.
    pub fn input_nodes(&self, node_id: &str) -> Vec<&Node> {
        let mut inputs: Vec<&Node> = Vec::new();
        for connection in self.incoming_connections(node_id) {
            if inputs.iter().any(|n| n.id == connection.source_node_id) {
                continue;
            }
            if let Some(source) = self.find_node(&connection.source_node_id) {
                inputs.push(source);
            }
        }
        inputs
    }

    /// Get the IDs of nodes that depend on this node (downstream nodes)
    pub fn dependents(&self, node_id: &str) -> Vec<NodeId> {
        self.outgoing_connections(node_id)
            .map(|c| c.target_node_id.clone())
            .collect()
    }

    /// Set every node back to idle and drop stored results
    pub fn reset_node_states(&mut self) {
        for node in &mut self.nodes {
            node.status = NodeStatus::Idle;
            node.result = None;
        }
    }
}
