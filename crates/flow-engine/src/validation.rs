//! Graph validation for workflow graphs
//!
//! Checks node id uniqueness and referential integrity of connections,
//! rejects self-loops, detects
//! cycles, and flags isolated nodes. Validation is a pure function of the
//! graph snapshot; running it twice yields the same report.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Connection, Node, WorkflowGraph};

/// Structural problem that blocks execution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Workflow has no nodes")]
    EmptyGraph,

    #[error("Node id '{node_id}' is used by more than one node")]
    DuplicateNodeId { node_id: String },

    #[error("Connection '{connection_id}' references unknown node '{node_id}'")]
    DanglingReference {
        connection_id: String,
        node_id: String,
    },

    #[error("Connection '{connection_id}' connects node '{node_id}' to itself")]
    SelfLoop {
        connection_id: String,
        node_id: String,
    },

    #[error("Cycle detected: {}", .path.join(" -> "))]
    CycleDetected {
        /// Node labels around the cycle, first label repeated at the end
        path: Vec<String>,
    },

    #[error("Node '{node_id}' has no connections")]
    IsolatedNode { node_id: String },
}

/// Non-fatal finding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationWarning {
    #[error("Node '{node_id}' has no connections")]
    IsolatedNode { node_id: String },
}

/// How isolated nodes are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolatedNodePolicy {
    /// Report as a warning; the run proceeds
    #[default]
    Warn,
    /// Report as an error; the run is rejected
    Reject,
}

/// Validation knobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationPolicy {
    #[serde(default)]
    pub isolated_nodes: IsolatedNodePolicy,
}

/// Outcome of validating a graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    /// True when no blocking error was found
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.to_string()).collect()
    }

    pub fn first_error(&self) -> Option<&ValidationError> {
        self.errors.first()
    }
}

/// Validate a workflow graph
///
/// Returns all problems found, not just the first.
pub fn validate_workflow(graph: &WorkflowGraph, policy: &ValidationPolicy) -> ValidationReport {
    let mut report = ValidationReport::default();

    if graph.nodes.is_empty() {
        report.errors.push(ValidationError::EmptyGraph);
        return report;
    }

    check_unique_ids(graph, &mut report.errors);
    validate_connections(graph, &mut report.errors);
    detect_cycles(graph, &mut report.errors);
    check_isolated_nodes(graph, policy, &mut report);

    report
}

/// Report each node id that appears more than once
fn check_unique_ids(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut reported: HashSet<&str> = HashSet::new();

    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) && reported.insert(node.id.as_str()) {
            errors.push(ValidationError::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }
}

/// Check that every connection references existing, distinct nodes
fn validate_connections(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    let node_ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

    for connection in &graph.connections {
        for endpoint in [&connection.source_node_id, &connection.target_node_id] {
            if !node_ids.contains(endpoint.as_str()) {
                errors.push(ValidationError::DanglingReference {
                    connection_id: connection.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
        if connection.source_node_id == connection.target_node_id {
            errors.push(ValidationError::SelfLoop {
                connection_id: connection.id.clone(),
                node_id: connection.source_node_id.clone(),
            });
        }
    }
}

/// Connections the cycle search walks: both endpoints known, not a self-loop
fn traversable<'a>(
    connection: &'a Connection,
    nodes: &HashMap<&str, &'a Node>,
) -> bool {
    connection.source_node_id != connection.target_node_id
        && nodes.contains_key(connection.source_node_id.as_str())
        && nodes.contains_key(connection.target_node_id.as_str())
}

/// Detect cycles with a depth-first search from every node
fn detect_cycles(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    let nodes: HashMap<&str, &Node> = graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for connection in graph.connections.iter().filter(|c| traversable(c, &nodes)) {
        adjacency
            .entry(connection.source_node_id.as_str())
            .or_default()
            .push(connection.target_node_id.as_str());
    }

    let mut search = CycleSearch {
        nodes: &nodes,
        adjacency: &adjacency,
        visited: HashSet::new(),
        recursion_stack: HashSet::new(),
        path: Vec::new(),
        cycles: Vec::new(),
    };

    // Disconnected graphs: every node is a potential root.
    for node in &graph.nodes {
        if !search.visited.contains(node.id.as_str()) {
            search.visit(&node.id);
        }
    }

    errors.extend(
        search
            .cycles
            .into_iter()
            .map(|path| ValidationError::CycleDetected { path }),
    );
}

struct CycleSearch<'a, 'g> {
    nodes: &'a HashMap<&'g str, &'g Node>,
    adjacency: &'a HashMap<&'g str, Vec<&'g str>>,
    visited: HashSet<&'g str>,
    recursion_stack: HashSet<&'g str>,
    path: Vec<&'g str>,
    cycles: Vec<Vec<String>>,
}

impl<'a, 'g> CycleSearch<'a, 'g> {
    fn visit(&mut self, node_id: &'g str) {
        self.visited.insert(node_id);
        self.recursion_stack.insert(node_id);
        self.path.push(node_id);

        let successors = self.adjacency.get(node_id).cloned().unwrap_or_default();
        for next in successors {
            if self.recursion_stack.contains(next) {
                self.record_cycle(next);
            } else if !self.visited.contains(next) {
                self.visit(next);
            }
        }

        self.path.pop();
        self.recursion_stack.remove(node_id);
    }

    /// Back edge into `entry`: the cycle is the path suffix starting there
    fn record_cycle(&mut self, entry: &'g str) {
        let Some(start) = self.path.iter().position(|id| *id == entry) else {
            return;
        };
        let mut labels: Vec<String> = self.path[start..]
            .iter()
            .map(|id| self.label(id))
            .collect();
        labels.push(self.label(entry));
        self.cycles.push(labels);
    }

    fn label(&self, node_id: &str) -> String {
        self.nodes
            .get(node_id)
            .map(|n| n.label().to_string())
            .unwrap_or_else(|| node_id.to_string())
    }
}

/// Flag nodes with no incident connection in multi-node graphs
fn check_isolated_nodes(
    graph: &WorkflowGraph,
    policy: &ValidationPolicy,
    report: &mut ValidationReport,
) {
    if graph.nodes.len() < 2 {
        return;
    }

    let connected: HashSet<&str> = graph
        .connections
        .iter()
        .flat_map(|c| [c.source_node_id.as_str(), c.target_node_id.as_str()])
        .collect();

    for node in graph.nodes.iter().filter(|n| !connected.contains(n.id.as_str())) {
        match policy.isolated_nodes {
            IsolatedNodePolicy::Warn => report.warnings.push(ValidationWarning::IsolatedNode {
                node_id: node.id.clone(),
            }),
            IsolatedNodePolicy::Reject => report.errors.push(ValidationError::IsolatedNode {
                node_id: node.id.clone(),
            }),
        }
    }
}
