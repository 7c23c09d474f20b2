//! Single-node execution
//!
//! `NodeExecutor` checks that a node is ready to run, assembles its
//! execution context from upstream results, and dispatches to the handler
//! registered for its kind. It never mutates the graph; recording status and
//! results is the coordinator's job.

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde_json::{Map, Value};

use crate::error::ExecutionError;
use crate::registry::HandlerRegistry;
use crate::template::value_to_text;
use crate::types::{Node, NodeId, NodeKind, NodeStatus, WorkflowGraph};

/// Inputs handed to a node handler
///
/// `inputs` and `variables` hold the same entries: one per upstream node,
/// keyed by its title (or `input_<index>` when untitled), in connection
/// order. `inputs` is what a handler consumes; `variables` is what template
/// substitution reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    pub node_id: NodeId,
    pub inputs: Map<String, Value>,
    pub variables: Map<String, Value>,
}

impl ExecutionContext {
    /// Empty context for a node with no inputs
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            inputs: Map::new(),
            variables: Map::new(),
        }
    }

    /// Add a named input, visible to both handlers and templates
    pub fn with_input(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        self.inputs.insert(name.clone(), value.clone());
        self.variables.insert(name, value);
        self
    }

    pub fn has_inputs(&self) -> bool {
        !self.inputs.is_empty()
    }

    /// Text form of every input, in order
    pub fn input_texts(&self) -> Vec<String> {
        self.inputs.values().map(value_to_text).collect()
    }
}

/// Readiness check, context assembly and dispatch for one node
#[derive(Debug, Clone)]
pub struct NodeExecutor {
    registry: HandlerRegistry,
}

impl NodeExecutor {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Check that `node_id` may run now, without running it
    pub fn check_readiness(&self, node_id: &str, graph: &WorkflowGraph) -> Result<(), ExecutionError> {
        let node = graph
            .find_node(node_id)
            .ok_or_else(|| ExecutionError::NodeNotFound(node_id.to_string()))?;

        // A completed input, or one still holding an earlier result, counts as ready.
        if let Some(pending) = graph
            .input_nodes(node_id)
            .into_iter()
            .find(|input| input.status != NodeStatus::Completed && input.result.is_none())
        {
            return Err(ExecutionError::DependencyNotReady {
                node_id: node.id.clone(),
                dependency_id: pending.id.clone(),
            });
        }

        self.check_configuration(node, graph)
    }

    /// Kind-specific requirements that do not depend on run state
    pub fn check_configuration(&self, node: &Node, graph: &WorkflowGraph) -> Result<(), ExecutionError> {
        let has_inputs = !graph.input_nodes(&node.id).is_empty();

        match &node.kind {
            NodeKind::Generate(config) if !has_inputs && config.template().is_none() => {
                Err(ExecutionError::InsufficientConfiguration {
                    node_id: node.id.clone(),
                    reason: "no connected inputs and no prompt template".to_string(),
                })
            }
            NodeKind::Output(_) if !has_inputs => Err(ExecutionError::NoInput {
                node_id: node.id.clone(),
            }),
            NodeKind::UserInput(_)
            | NodeKind::Generate(_)
            | NodeKind::Output(_)
            | NodeKind::AddAssets(_)
            | NodeKind::Custom(_) => Ok(()),
        }
    }

    /// Build the handler context from upstream results
    pub fn build_context(&self, node_id: &str, graph: &WorkflowGraph) -> ExecutionContext {
        let mut context = ExecutionContext::new(node_id);
        for (index, input) in graph.input_nodes(node_id).into_iter().enumerate() {
            let name = input_name(input, index);
            let value = input.result.clone().unwrap_or(Value::Null);
            context = context.with_input(name, value);
        }
        context
    }

    /// Execute one node against the current graph state
    ///
    /// Readiness failures are returned before any handler is invoked.
    pub async fn execute_node(
        &self,
        node_id: &str,
        graph: &WorkflowGraph,
    ) -> Result<Value, ExecutionError> {
        self.check_readiness(node_id, graph)?;

        let node = graph
            .find_node(node_id)
            .ok_or_else(|| ExecutionError::NodeNotFound(node_id.to_string()))?;
        let context = self.build_context(node_id, graph);
        self.dispatch(node, &context).await
    }

    /// Invoke the registered handler, capturing errors and panics
    pub async fn dispatch(
        &self,
        node: &Node,
        context: &ExecutionContext,
    ) -> Result<Value, ExecutionError> {
        let key = node.kind.handler_key();
        let handler = self
            .registry
            .get(key)
            .ok_or_else(|| ExecutionError::HandlerNotRegistered {
                node_id: node.id.clone(),
                handler: key.to_string(),
            })?;

        log::debug!(
            "Dispatching node '{}' to handler '{}' with {} input(s)",
            node.id,
            key,
            context.inputs.len()
        );

        match AssertUnwindSafe(handler.execute(node, context))
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(ExecutionError::handler(&node.id, err.message)),
            Err(panic) => Err(ExecutionError::handler(
                &node.id,
                format!("handler panicked: {}", panic_message(panic.as_ref())),
            )),
        }
    }
}

/// Context key for an input node: its title, else `input_<index>`
fn input_name(node: &Node, index: usize) -> String {
    node.title()
        .map(str::to_string)
        .unwrap_or_else(|| format!("input_{}", index))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
