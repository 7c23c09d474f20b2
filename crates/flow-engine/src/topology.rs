//! Topological ordering of workflow nodes
//!
//! Uses Kahn's algorithm with a FIFO queue seeded in node order, so nodes
//! that become ready at the same time run in the order they were
//! discovered. The same graph always yields the same sequence.

use std::collections::{HashMap, VecDeque};

use crate::types::{Connection, Node, NodeId};

/// Compute an execution order for `nodes`
///
/// A result shorter than `nodes` means the unresolved remainder contains a
/// cycle. Connections whose endpoints are not in `nodes` are ignored.
pub fn topological_order(nodes: &[Node], connections: &[Connection]) -> Vec<NodeId> {
    let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::with_capacity(nodes.len());

    for node in nodes {
        in_degree.insert(&node.id, 0);
        adjacency.insert(&node.id, Vec::new());
    }

    for connection in connections {
        let source = connection.source_node_id.as_str();
        let target = connection.target_node_id.as_str();
        if !in_degree.contains_key(source) || !in_degree.contains_key(target) {
            continue;
        }
        if let Some(successors) = adjacency.get_mut(source) {
            successors.push(target);
        }
        if let Some(degree) = in_degree.get_mut(target) {
            *degree += 1;
        }
    }

    // Seed in node order, not map order.
    let mut queue: VecDeque<&str> = nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());

    while let Some(node_id) = queue.pop_front() {
        order.push(node_id.to_string());

        if let Some(successors) = adjacency.get(node_id) {
            for &successor in successors {
                if let Some(degree) = in_degree.get_mut(successor) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(successor);
                    }
                }
            }
        }
    }

    order
}

/// True when the connections among `nodes` contain a cycle
pub fn has_cycle(nodes: &[Node], connections: &[Connection]) -> bool {
    topological_order(nodes, connections).len() < nodes.len()
}
