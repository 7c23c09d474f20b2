//! Fluent builder for workflow graphs
//!
//! Provides a fluent API for constructing graphs programmatically.

use crate::types::{
    AddAssetsConfig, AssetRef, Connection, CustomConfig, GenerateConfig, Node, NodeKind,
    OutputConfig, OutputFormat, UserInputConfig, WorkflowGraph,
};

/// Fluent builder for constructing workflow graphs
///
/// # Example
///
/// ```
/// use flow_engine::WorkflowBuilder;
///
/// let graph = WorkflowBuilder::new("wf-1", "Greeting")
///     .add_user_input("in", "Ada")
///     .with_title("In")
///     .add_generate("gen", Some("Hello {{In}}"))
///     .add_output("out")
///     .connect("in", "gen")
///     .connect("gen", "out")
///     .build();
///
/// assert_eq!(graph.nodes.len(), 3);
/// ```
pub struct WorkflowBuilder {
    id: String,
    name: String,
    nodes: Vec<Node>,
    connections: Vec<Connection>,
    connection_counter: usize,
}

impl WorkflowBuilder {
    /// Create a new workflow builder
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
            connection_counter: 0,
        }
    }

    /// Add a node to the graph
    pub fn add_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn add_user_input(self, id: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.add_node(Node::new(
            id,
            NodeKind::UserInput(UserInputConfig {
                value: value.into(),
            }),
        ))
    }

    pub fn add_generate(self, id: impl Into<String>, template: Option<&str>) -> Self {
        self.add_node(Node::new(
            id,
            NodeKind::Generate(GenerateConfig {
                template: template.map(str::to_string),
                ..Default::default()
            }),
        ))
    }

    /// Add an output node that uses the engine's default format
    pub fn add_output(self, id: impl Into<String>) -> Self {
        self.add_node(Node::new(id, NodeKind::Output(OutputConfig::default())))
    }

    pub fn add_output_with_format(self, id: impl Into<String>, format: OutputFormat) -> Self {
        self.add_node(Node::new(
            id,
            NodeKind::Output(OutputConfig {
                format: Some(format),
            }),
        ))
    }

    pub fn add_assets(self, id: impl Into<String>, assets: Vec<AssetRef>) -> Self {
        self.add_node(Node::new(id, NodeKind::AddAssets(AddAssetsConfig { assets })))
    }

    /// Add a node executed by a host-registered handler
    pub fn add_custom(
        self,
        id: impl Into<String>,
        handler: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        self.add_node(Node::new(
            id,
            NodeKind::Custom(CustomConfig {
                handler: handler.into(),
                params,
            }),
        ))
    }

    /// Set the title of the most recently added node
    ///
    /// Must be called immediately after one of the `add_*` node methods.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.title = Some(title.into());
        }
        self
    }

    /// Connect two nodes using the default `output` and `input` ports
    pub fn connect(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.add_connection(source, "output", target, "input")
    }

    /// Add a connection between two ports (auto-generates the connection ID)
    pub fn add_connection(
        mut self,
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        self.connection_counter += 1;
        self.connections.push(Connection::new(
            format!("connection-{}", self.connection_counter),
            source,
            source_port,
            target,
            target_port,
        ));
        self
    }

    /// Build the graph without validation
    pub fn build(self) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new(self.id, self.name);
        graph.nodes = self.nodes;
        graph.connections = self.connections;
        graph
    }
}
