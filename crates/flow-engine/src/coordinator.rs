//! Workflow execution coordinator
//!
//! `ExecutionCoordinator` drives a whole run: it validates the graph, orders
//! it topologically and executes nodes one at a time, halting on the first
//! error. Run state lives behind the coordinator and is observable through
//! `get_state()` snapshots and subscriber callbacks; node status and result
//! changes are written into the graph and reported through an `EventSink`.
//!
//! Coordinators are independent of each other. Create one per editor, test
//! or job.
//!
//! # Usage
//!
//! ```
//! use flow_engine::{ExecutionCoordinator, NullEventSink, RunStatus, WorkflowBuilder};
//!
//! # tokio_test::block_on(async {
//! let mut graph = WorkflowBuilder::new("wf", "Greeting")
//!     .add_user_input("in", "Ada").with_title("name")
//!     .add_generate("gen", Some("Hello {{name}}"))
//!     .add_output("out")
//!     .connect("in", "gen")
//!     .connect("gen", "out")
//!     .build();
//!
//! let coordinator = ExecutionCoordinator::default();
//! let result = coordinator.run(&mut graph, &NullEventSink).await.unwrap();
//! assert_eq!(result.status, RunStatus::Completed);
//! assert_eq!(result.final_outputs["out"], "Hello Ada");
//! # });
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::error::ExecutionError;
use crate::events::{EventSink, NodeUpdate, WorkflowEvent};
use crate::executor::NodeExecutor;
use crate::registry::HandlerRegistry;
use crate::state::{ErrorRecord, ExecutionState, RunStatus};
use crate::topology::topological_order;
use crate::types::{NodeStatus, WorkflowGraph};
use crate::validation::validate_workflow;

/// Handle returned by `subscribe`
pub type SubscriberId = u64;

type Subscriber = Arc<dyn Fn(&ExecutionState) + Send + Sync>;

/// Answer to "may this graph be run now?"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanExecute {
    pub can_execute: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CanExecute {
    fn yes() -> Self {
        Self {
            can_execute: true,
            reason: None,
        }
    }

    fn no(reason: impl Into<String>) -> Self {
        Self {
            can_execute: false,
            reason: Some(reason.into()),
        }
    }
}

/// Outcome of a full workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunResult {
    /// True only when every node completed
    pub success: bool,
    pub status: RunStatus,
    /// Results keyed by node id, plus output node titles
    pub final_outputs: Map<String, Value>,
    pub errors: Vec<ErrorRecord>,
}

/// Runs workflow graphs and tracks run state
pub struct ExecutionCoordinator {
    executor: NodeExecutor,
    config: EngineConfig,
    state: RwLock<ExecutionState>,
    stop_requested: AtomicBool,
    subscribers: Mutex<Vec<(SubscriberId, Subscriber)>>,
    next_subscriber_id: AtomicU64,
}

impl ExecutionCoordinator {
    /// Coordinator dispatching to `registry`, with default configuration
    pub fn new(registry: HandlerRegistry) -> Self {
        Self::with_registry_and_config(registry, EngineConfig::default())
    }

    /// Coordinator with the built-in handlers, configured by `config`
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_registry_and_config(
            HandlerRegistry::with_builtins_and_format(config.output.format),
            config,
        )
    }

    pub fn with_registry_and_config(registry: HandlerRegistry, config: EngineConfig) -> Self {
        Self {
            executor: NodeExecutor::new(registry),
            config,
            state: RwLock::new(ExecutionState::default()),
            stop_requested: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    pub fn executor(&self) -> &NodeExecutor {
        &self.executor
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot of the current run state
    pub fn get_state(&self) -> ExecutionState {
        self.state.read().clone()
    }

    /// Register a callback invoked with a state snapshot on every change
    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&ExecutionState) + Send + Sync + 'static,
    {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback; returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    /// Request cancellation of the current run
    ///
    /// Takes effect before the next node starts; the running node is never
    /// interrupted. Returns false when no run is in progress.
    pub fn stop(&self) -> bool {
        let state = self.state.read();
        if !state.is_running() {
            return false;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        log::info!(
            "Stop requested for execution {}",
            state.execution_id.as_deref().unwrap_or("?")
        );
        true
    }

    /// Return to `Idle`, clearing run data
    ///
    /// Node statuses in the graph are left alone. Returns false while a run
    /// is in progress.
    pub fn reset(&self) -> bool {
        let snapshot = {
            let mut state = self.state.write();
            if state.is_running() {
                log::warn!("Ignoring reset while a workflow is running");
                return false;
            }
            state.clear();
            state.clone()
        };
        self.stop_requested.store(false, Ordering::SeqCst);
        self.notify(&snapshot);
        true
    }

    /// Check whether `graph` could be run now
    pub fn can_execute(&self, graph: &WorkflowGraph) -> CanExecute {
        if self.state.read().is_running() {
            return CanExecute::no(ExecutionError::AlreadyRunning.to_string());
        }
        if graph.nodes.is_empty() {
            return CanExecute::no("Workflow has no nodes");
        }

        let report = validate_workflow(graph, &self.config.validation);
        if let Some(error) = report.first_error() {
            return CanExecute::no(error.to_string());
        }

        for node in &graph.nodes {
            if let Err(err) = self.executor.check_configuration(node, graph) {
                return CanExecute::no(err.to_string());
            }
        }

        CanExecute::yes()
    }

    /// Run every node of `graph` in dependency order
    ///
    /// Validation failures, node failures and cancellation are reported in
    /// the returned result and in `get_state()`. The only error returned
    /// directly is `AlreadyRunning`.
    pub async fn run(
        &self,
        graph: &mut WorkflowGraph,
        sink: &dyn EventSink,
    ) -> Result<WorkflowRunResult, ExecutionError> {
        let execution_id = format!("exec-{}", uuid::Uuid::new_v4());
        self.begin(&execution_id)?;
        let _guard = RunGuard {
            coordinator: self,
            execution_id: execution_id.clone(),
        };

        log::info!(
            "Starting workflow '{}' ({} nodes), execution {}",
            graph.id,
            graph.nodes.len(),
            execution_id
        );
        self.emit(
            sink,
            WorkflowEvent::WorkflowStarted {
                workflow_id: graph.id.clone(),
                execution_id: execution_id.clone(),
                node_count: graph.nodes.len(),
            },
        );

        let report = validate_workflow(graph, &self.config.validation);
        for warning in report.warning_messages() {
            log::warn!("Workflow '{}': {}", graph.id, warning);
        }
        if !report.is_ok() {
            let messages = report.error_messages();
            return Ok(self.fail_workflow(graph, &execution_id, messages, sink));
        }

        let order = topological_order(&graph.nodes, &graph.connections);
        if order.len() < graph.nodes.len() {
            let message = format!(
                "Cycle detected: only {} of {} nodes could be ordered",
                order.len(),
                graph.nodes.len()
            );
            return Ok(self.fail_workflow(graph, &execution_id, vec![message], sink));
        }

        let total = order.len();
        let mut final_outputs = Map::new();

        for (index, node_id) in order.iter().enumerate() {
            if self.stop_requested.load(Ordering::SeqCst) {
                log::info!("Workflow '{}' stopped before node '{}'", graph.id, node_id);
                self.update_state(|state| state.finish(RunStatus::Stopped));
                self.emit(
                    sink,
                    WorkflowEvent::WorkflowStopped {
                        workflow_id: graph.id.clone(),
                        execution_id: execution_id.clone(),
                    },
                );
                return Ok(self.run_result(final_outputs));
            }

            self.update_state(|state| {
                state.current_node_id = Some(node_id.clone());
                state.progress = index as f64 / total as f64 * 100.0;
            });
            self.update_node(
                graph,
                &execution_id,
                node_id,
                NodeUpdate::status(NodeStatus::Running),
                sink,
            );

            match self.executor.execute_node(node_id, graph).await {
                Ok(value) => {
                    self.update_node(
                        graph,
                        &execution_id,
                        node_id,
                        NodeUpdate::completed(value.clone()),
                        sink,
                    );
                    if let Some(title) = graph
                        .find_node(node_id)
                        .filter(|node| node.kind.is_output())
                        .and_then(|node| node.title())
                    {
                        final_outputs.insert(title.to_string(), value.clone());
                    }
                    final_outputs.insert(node_id.clone(), value);
                    self.update_state(|state| state.mark_completed(node_id));
                }
                Err(err) => {
                    let message = err.to_string();
                    log::warn!("Workflow '{}' halted: {}", graph.id, message);
                    self.update_node(
                        graph,
                        &execution_id,
                        node_id,
                        NodeUpdate::failed(message.clone()),
                        sink,
                    );
                    self.update_state(|state| {
                        state.mark_failed(node_id, message.clone());
                        state.finish(RunStatus::Failed);
                    });
                    self.emit(
                        sink,
                        WorkflowEvent::WorkflowFailed {
                            workflow_id: graph.id.clone(),
                            execution_id: execution_id.clone(),
                            error: message,
                        },
                    );
                    return Ok(self.run_result(final_outputs));
                }
            }
        }

        self.update_state(|state| {
            state.progress = 100.0;
            state.finish(RunStatus::Completed);
        });
        log::info!("Workflow '{}' completed ({} nodes)", graph.id, total);
        self.emit(
            sink,
            WorkflowEvent::WorkflowCompleted {
                workflow_id: graph.id.clone(),
                execution_id,
                outputs: final_outputs.clone(),
            },
        );

        Ok(self.run_result(final_outputs))
    }

    /// Execute a single node outside a full run
    ///
    /// The node is only marked `Running` once it has passed the readiness
    /// check. Run-level state is not touched.
    pub async fn execute_node(
        &self,
        node_id: &str,
        graph: &mut WorkflowGraph,
        sink: &dyn EventSink,
    ) -> Result<Value, ExecutionError> {
        if self.state.read().is_running() {
            return Err(ExecutionError::AlreadyRunning);
        }
        self.executor.check_readiness(node_id, graph)?;

        let execution_id = format!("manual-{}", uuid::Uuid::new_v4());
        self.update_node(
            graph,
            &execution_id,
            node_id,
            NodeUpdate::status(NodeStatus::Running),
            sink,
        );

        match self.executor.execute_node(node_id, graph).await {
            Ok(value) => {
                self.update_node(
                    graph,
                    &execution_id,
                    node_id,
                    NodeUpdate::completed(value.clone()),
                    sink,
                );
                Ok(value)
            }
            Err(err) => {
                log::warn!("{}", err);
                self.update_node(
                    graph,
                    &execution_id,
                    node_id,
                    NodeUpdate::failed(err.to_string()),
                    sink,
                );
                Err(err)
            }
        }
    }

    /// Claim the coordinator for a new run
    fn begin(&self, execution_id: &str) -> Result<(), ExecutionError> {
        let snapshot = {
            let mut state = self.state.write();
            if state.is_running() {
                return Err(ExecutionError::AlreadyRunning);
            }
            self.stop_requested.store(false, Ordering::SeqCst);
            state.begin(execution_id.to_string());
            state.clone()
        };
        self.notify(&snapshot);
        Ok(())
    }

    /// Record workflow-level errors and end the run as `Failed`
    fn fail_workflow(
        &self,
        graph: &WorkflowGraph,
        execution_id: &str,
        messages: Vec<String>,
        sink: &dyn EventSink,
    ) -> WorkflowRunResult {
        for message in &messages {
            log::warn!("Workflow '{}' rejected: {}", graph.id, message);
        }
        self.update_state(|state| {
            state
                .errors
                .extend(messages.iter().map(ErrorRecord::workflow));
            state.finish(RunStatus::Failed);
        });
        self.emit(
            sink,
            WorkflowEvent::WorkflowFailed {
                workflow_id: graph.id.clone(),
                execution_id: execution_id.to_string(),
                error: messages.join("; "),
            },
        );
        self.run_result(Map::new())
    }

    fn run_result(&self, final_outputs: Map<String, Value>) -> WorkflowRunResult {
        let state = self.state.read();
        WorkflowRunResult {
            success: state.status == RunStatus::Completed,
            status: state.status,
            final_outputs,
            errors: state.errors.clone(),
        }
    }

    /// Apply a node update to the graph and report it
    fn update_node(
        &self,
        graph: &mut WorkflowGraph,
        execution_id: &str,
        node_id: &str,
        update: NodeUpdate,
        sink: &dyn EventSink,
    ) {
        if let Some(node) = graph.find_node_mut(node_id) {
            if let Some(status) = update.status {
                node.status = status;
            }
            if let Some(result) = &update.result {
                node.result = Some(result.clone());
            }
        }
        self.emit(sink, WorkflowEvent::node_updated(execution_id, node_id, update));
    }

    fn emit(&self, sink: &dyn EventSink, event: WorkflowEvent) {
        if let Err(e) = sink.send(event) {
            log::warn!("Failed to deliver workflow event: {}", e);
        }
    }

    /// Mutate state under the lock, then notify subscribers outside it
    fn update_state(&self, f: impl FnOnce(&mut ExecutionState)) {
        let snapshot = {
            let mut state = self.state.write();
            f(&mut state);
            state.clone()
        };
        self.notify(&snapshot);
    }

    fn notify(&self, snapshot: &ExecutionState) {
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in subscribers {
            callback(snapshot);
        }
    }
}

/// Ends a run whose future was dropped before it reached a terminal status
///
/// Covers callers that time out, select away from or abort a run, and sinks
/// or subscribers that panic mid-run. The run is recorded as `Stopped`.
struct RunGuard<'a> {
    coordinator: &'a ExecutionCoordinator,
    execution_id: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let snapshot = {
            let mut state = self.coordinator.state.write();
            let ours = state.execution_id.as_deref() == Some(self.execution_id.as_str());
            if !state.is_running() || !ours {
                return;
            }
            state.finish(RunStatus::Stopped);
            state.clone()
        };
        log::warn!(
            "Execution {} was dropped before finishing; marked as stopped",
            self.execution_id
        );

        // Calling back into a subscriber while unwinding risks a double panic.
        if !std::thread::panicking() {
            self.coordinator.notify(&snapshot);
        }
    }
}

impl Default for ExecutionCoordinator {
    fn default() -> Self {
        Self::with_config(EngineConfig::default())
    }
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("executor", &self.executor)
            .field("config", &self.config)
            .field("state", &*self.state.read())
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::error::HandlerError;
    use crate::events::{FnEventSink, NullEventSink, VecEventSink};
    use crate::registry::NodeHandler;
    use crate::validation::{IsolatedNodePolicy, ValidationPolicy};
    use crate::executor::ExecutionContext;
    use crate::types::Node;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Weak;
    use tokio::sync::Notify;

    fn greeting_graph() -> WorkflowGraph {
        WorkflowBuilder::new("wf", "Greeting")
            .add_user_input("in", "Ada")
            .with_title("In")
            .add_generate("gen", Some("Hello {{In}}"))
            .with_title("Gen")
            .add_output("out")
            .with_title("Out")
            .connect("in", "gen")
            .connect("gen", "out")
            .build()
    }

    /// Registry with a `fail` handler and a `count` handler that tallies calls
    fn registry_with_counter(calls: Arc<AtomicUsize>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::with_builtins();
        registry.register_fn("fail", |_, _| Err(HandlerError::new("model unavailable")));
        registry.register_fn("count", move |node, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!(node.id.clone()))
        });
        registry
    }

    fn running_order(sink: &VecEventSink) -> Vec<String> {
        sink.events()
            .into_iter()
            .filter_map(|event| match event {
                WorkflowEvent::NodeUpdated {
                    node_id, update, ..
                } if update.status == Some(NodeStatus::Running) => Some(node_id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_linear_run_produces_greeting() {
        let mut graph = greeting_graph();
        let coordinator = ExecutionCoordinator::default();
        let sink = VecEventSink::new();

        let result = coordinator.run(&mut graph, &sink).await.unwrap();

        assert!(result.success);
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(graph.find_node("gen").unwrap().result, Some(json!("Hello Ada")));
        assert_eq!(graph.find_node("out").unwrap().result, Some(json!("Hello Ada")));
        assert!(graph.nodes.iter().all(|n| n.status == NodeStatus::Completed));

        assert_eq!(result.final_outputs["in"], "Ada");
        assert_eq!(result.final_outputs["out"], "Hello Ada");
        assert_eq!(result.final_outputs["Out"], "Hello Ada");
        assert!(!result.final_outputs.contains_key("Gen"));

        let state = coordinator.get_state();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.completed_nodes, vec!["in", "gen", "out"]);
        assert_eq!(state.progress, 100.0);
        assert!(state.current_node_id.is_none());
        assert!(state.start_time.is_some());
        assert!(state.end_time.is_some());

        assert!(matches!(
            sink.events().first(),
            Some(WorkflowEvent::WorkflowStarted { node_count: 3, .. })
        ));
        assert!(matches!(
            sink.events().last(),
            Some(WorkflowEvent::WorkflowCompleted { .. })
        ));
        assert_eq!(
            sink.node_updates("gen"),
            vec![
                NodeUpdate::status(NodeStatus::Running),
                NodeUpdate::completed(json!("Hello Ada")),
            ]
        );
    }

    #[tokio::test]
    async fn test_cycle_fails_without_touching_nodes() {
        let mut graph = WorkflowBuilder::new("wf", "Cycle")
            .add_custom("a", "count", Value::Null)
            .with_title("A")
            .add_custom("b", "count", Value::Null)
            .with_title("B")
            .add_custom("c", "count", Value::Null)
            .with_title("C")
            .connect("a", "b")
            .connect("b", "c")
            .connect("c", "a")
            .build();
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = ExecutionCoordinator::new(registry_with_counter(calls.clone()));

        let result = coordinator.run(&mut graph, &NullEventSink).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].node_id, None);
        assert!(result.errors[0].message.contains("A -> B -> C -> A"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(graph.nodes.iter().all(|n| n.status == NodeStatus::Idle));
        assert!(coordinator.get_state().end_time.is_some());
    }

    #[tokio::test]
    async fn test_independent_chains_run_in_queue_order() {
        let mut graph = WorkflowBuilder::new("wf", "Chains")
            .add_user_input("a1", "x")
            .add_user_input("b1", "y")
            .add_output("a2")
            .add_output("b2")
            .connect("a1", "a2")
            .connect("b1", "b2")
            .build();
        let coordinator = ExecutionCoordinator::default();
        let sink = VecEventSink::new();

        let result = coordinator.run(&mut graph, &sink).await.unwrap();

        assert!(result.success);
        assert_eq!(running_order(&sink), vec!["a1", "b1", "a2", "b2"]);
        assert_eq!(result.final_outputs["a2"], "x");
        assert_eq!(result.final_outputs["b2"], "y");
    }

    #[tokio::test]
    async fn test_run_halts_on_first_error() {
        let mut graph = WorkflowBuilder::new("wf", "Halt")
            .add_user_input("a", "seed")
            .add_custom("b", "fail", Value::Null)
            .add_custom("c", "count", Value::Null)
            .connect("a", "b")
            .connect("b", "c")
            .build();
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = ExecutionCoordinator::new(registry_with_counter(calls.clone()));
        let sink = VecEventSink::new();

        let result = coordinator.run(&mut graph, &sink).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(graph.find_node("a").unwrap().status, NodeStatus::Completed);
        assert_eq!(graph.find_node("b").unwrap().status, NodeStatus::Error);
        assert_eq!(graph.find_node("c").unwrap().status, NodeStatus::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(sink.node_updates("c").is_empty());

        let state = coordinator.get_state();
        assert_eq!(state.completed_nodes, vec!["a"]);
        assert_eq!(state.failed_nodes, vec!["b"]);
        let error = state.last_error().unwrap();
        assert_eq!(error.node_id.as_deref(), Some("b"));
        assert!(error.message.contains("model unavailable"));
        assert!(result.final_outputs.contains_key("a"));
        assert!(matches!(
            sink.events().last(),
            Some(WorkflowEvent::WorkflowFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_after_first_node() {
        let mut graph = WorkflowBuilder::new("wf", "Stop")
            .add_user_input("n1", "hello")
            .add_output("n2")
            .add_output("n3")
            .connect("n1", "n2")
            .connect("n2", "n3")
            .build();
        let coordinator = Arc::new(ExecutionCoordinator::default());

        let stopper = Arc::clone(&coordinator);
        let sink = FnEventSink(move |event: WorkflowEvent| {
            if let WorkflowEvent::NodeUpdated { node_id, update, .. } = event {
                if node_id == "n1" && update.status == Some(NodeStatus::Completed) {
                    assert!(stopper.stop());
                }
            }
        });

        let result = coordinator.run(&mut graph, &sink).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.status, RunStatus::Stopped);
        assert!(result.errors.is_empty());
        assert_eq!(graph.find_node("n1").unwrap().status, NodeStatus::Completed);
        assert_eq!(graph.find_node("n2").unwrap().status, NodeStatus::Idle);
        assert_eq!(graph.find_node("n3").unwrap().status, NodeStatus::Idle);

        let state = coordinator.get_state();
        assert_eq!(state.completed_nodes, vec!["n1"]);
        assert!(state.current_node_id.is_none());
        assert!(state.end_time.is_some());
    }

    struct GatedHandler {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl NodeHandler for GatedHandler {
        async fn execute(
            &self,
            node: &Node,
            _context: &ExecutionContext,
        ) -> Result<Value, HandlerError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(json!(format!("{} done", node.id)))
        }
    }

    #[tokio::test]
    async fn test_stop_does_not_preempt_running_node() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut registry = HandlerRegistry::with_builtins();
        registry.register(
            "gated",
            Arc::new(GatedHandler {
                started: started.clone(),
                release: release.clone(),
            }),
        );
        let coordinator = Arc::new(ExecutionCoordinator::new(registry));
        let mut graph = WorkflowBuilder::new("wf", "Gated")
            .add_custom("slow", "gated", Value::Null)
            .add_output("out")
            .connect("slow", "out")
            .build();

        let runner = Arc::clone(&coordinator);
        let handle = tokio::spawn(async move {
            let result = runner.run(&mut graph, &NullEventSink).await;
            (result, graph)
        });

        started.notified().await;
        let state = coordinator.get_state();
        assert!(state.is_running());
        assert_eq!(state.current_node_id.as_deref(), Some("slow"));

        let mut other = greeting_graph();
        assert_eq!(
            coordinator.run(&mut other, &NullEventSink).await,
            Err(ExecutionError::AlreadyRunning)
        );
        assert!(!coordinator.can_execute(&other).can_execute);
        assert!(!coordinator.reset());

        assert!(coordinator.stop());
        assert!(coordinator.get_state().is_running());
        release.notify_one();

        let (result, graph) = handle.await.unwrap();
        let result = result.unwrap();
        assert_eq!(result.status, RunStatus::Stopped);
        assert_eq!(result.final_outputs["slow"], "slow done");
        assert_eq!(graph.find_node("slow").unwrap().status, NodeStatus::Completed);
        assert_eq!(graph.find_node("out").unwrap().status, NodeStatus::Idle);
    }

    struct NeverFinishes;

    #[async_trait]
    impl NodeHandler for NeverFinishes {
        async fn execute(
            &self,
            _node: &Node,
            _context: &ExecutionContext,
        ) -> Result<Value, HandlerError> {
            std::future::pending::<()>().await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_dropped_run_returns_to_terminal_state() {
        let mut registry = HandlerRegistry::with_builtins();
        registry.register("hang", Arc::new(NeverFinishes));
        let coordinator = ExecutionCoordinator::new(registry);
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&statuses);
        coordinator.subscribe(move |state| seen.lock().push(state.status));

        let mut graph = WorkflowBuilder::new("wf", "Hang")
            .add_custom("stuck", "hang", Value::Null)
            .build();
        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            coordinator.run(&mut graph, &NullEventSink),
        )
        .await;
        assert!(outcome.is_err());

        let state = coordinator.get_state();
        assert_eq!(state.status, RunStatus::Stopped);
        assert!(state.current_node_id.is_none());
        assert!(state.end_time.is_some());
        assert!(state.errors.is_empty());
        assert_eq!(statuses.lock().last(), Some(&RunStatus::Stopped));

        assert!(coordinator.can_execute(&greeting_graph()).can_execute);
        let result = coordinator
            .run(&mut greeting_graph(), &NullEventSink)
            .await
            .unwrap();
        assert!(result.success);
        assert!(coordinator.reset());
    }

    #[tokio::test]
    async fn test_panicking_sink_does_not_wedge_coordinator() {
        let coordinator = Arc::new(ExecutionCoordinator::default());

        let runner = Arc::clone(&coordinator);
        let handle = tokio::spawn(async move {
            let mut graph = greeting_graph();
            let sink = FnEventSink(|event: WorkflowEvent| {
                if matches!(event, WorkflowEvent::WorkflowStarted { .. }) {
                    panic!("sink failed");
                }
            });
            runner.run(&mut graph, &sink).await.map(|result| result.status)
        });
        assert!(handle.await.unwrap_err().is_panic());

        assert_eq!(coordinator.get_state().status, RunStatus::Stopped);
        assert!(coordinator.reset());
        assert_eq!(coordinator.get_state().status, RunStatus::Idle);
    }

    struct ClosedSink;

    impl EventSink for ClosedSink {
        fn send(&self, _event: WorkflowEvent) -> Result<(), crate::events::EventError> {
            Err(crate::events::EventError {
                message: "receiver dropped".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_undeliverable_events_do_not_fail_run() {
        let coordinator = ExecutionCoordinator::default();
        let mut graph = greeting_graph();

        let result = coordinator.run(&mut graph, &ClosedSink).await.unwrap();
        assert!(result.success);
        assert_eq!(result.final_outputs["out"], "Hello Ada");
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_ignored() {
        let coordinator = ExecutionCoordinator::default();
        assert!(!coordinator.stop());

        let mut graph = greeting_graph();
        let result = coordinator.run(&mut graph, &NullEventSink).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_execute_node_rejects_output_without_input() {
        let mut graph = WorkflowBuilder::new("wf", "Lonely")
            .add_output("out")
            .build();
        let coordinator = ExecutionCoordinator::default();
        let sink = VecEventSink::new();

        let check = coordinator.can_execute(&graph);
        assert!(!check.can_execute);
        assert_eq!(
            check.reason.as_deref(),
            Some("Output node 'out' has no connected inputs")
        );

        let err = coordinator
            .execute_node("out", &mut graph, &sink)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExecutionError::NoInput {
                node_id: "out".into()
            }
        );
        assert_eq!(graph.find_node("out").unwrap().status, NodeStatus::Idle);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_execute_node_gates_on_dependencies() {
        let mut graph = greeting_graph();
        let coordinator = ExecutionCoordinator::default();
        let sink = VecEventSink::new();

        let err = coordinator
            .execute_node("out", &mut graph, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::DependencyNotReady { .. }));
        assert!(sink.node_updates("out").is_empty());

        coordinator.execute_node("in", &mut graph, &sink).await.unwrap();
        let value = coordinator.execute_node("gen", &mut graph, &sink).await.unwrap();
        assert_eq!(value, json!("Hello Ada"));
        assert_eq!(graph.find_node("gen").unwrap().status, NodeStatus::Completed);

        // Manual runs leave run-level state alone
        assert_eq!(coordinator.get_state().status, RunStatus::Idle);
    }

    #[tokio::test]
    async fn test_execute_node_records_handler_failure() {
        let mut graph = WorkflowBuilder::new("wf", "Fail")
            .add_custom("bad", "fail", Value::Null)
            .build();
        let coordinator =
            ExecutionCoordinator::new(registry_with_counter(Arc::new(AtomicUsize::new(0))));
        let sink = VecEventSink::new();

        let err = coordinator
            .execute_node("bad", &mut graph, &sink)
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::handler("bad", "model unavailable"));
        assert_eq!(graph.find_node("bad").unwrap().status, NodeStatus::Error);
        assert_eq!(
            sink.node_updates("bad").last(),
            Some(&NodeUpdate::failed(err.to_string()))
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_progress_in_order() {
        let coordinator = ExecutionCoordinator::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let order = Arc::new(Mutex::new(Vec::new()));

        let progress = Arc::clone(&seen);
        let first = Arc::clone(&order);
        coordinator.subscribe(move |state| {
            progress.lock().push((state.status, state.progress));
            first.lock().push(1);
        });
        let second = Arc::clone(&order);
        coordinator.subscribe(move |_| second.lock().push(2));

        let mut graph = greeting_graph();
        coordinator.run(&mut graph, &NullEventSink).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.first(), Some(&(RunStatus::Running, 0.0)));
        assert_eq!(seen.last(), Some(&(RunStatus::Completed, 100.0)));
        assert!(seen.windows(2).all(|pair| pair[0].1 <= pair[1].1));
        assert!(seen
            .iter()
            .any(|(_, progress)| (*progress - 100.0 / 3.0).abs() < 1e-9));

        let order = order.lock();
        assert!(order.chunks(2).all(|pair| pair == [1, 2]));
    }

    #[tokio::test]
    async fn test_unsubscribe_during_notification() {
        let coordinator = Arc::new(ExecutionCoordinator::default());
        let second_calls = Arc::new(AtomicUsize::new(0));
        let second_id = Arc::new(AtomicU64::new(0));

        let weak: Weak<ExecutionCoordinator> = Arc::downgrade(&coordinator);
        let target = Arc::clone(&second_id);
        coordinator.subscribe(move |_| {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.unsubscribe(target.load(Ordering::SeqCst));
            }
        });
        let counter = Arc::clone(&second_calls);
        let id = coordinator.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        second_id.store(id, Ordering::SeqCst);

        let mut graph = greeting_graph();
        coordinator.run(&mut graph, &NullEventSink).await.unwrap();

        // The in-flight notification still reaches the removed subscriber
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.unsubscribe(id));
    }

    #[tokio::test]
    async fn test_reset_clears_run_state_only() {
        let mut graph = WorkflowBuilder::new("wf", "Reset")
            .add_user_input("a", "seed")
            .add_custom("b", "fail", Value::Null)
            .connect("a", "b")
            .build();
        let coordinator =
            ExecutionCoordinator::new(registry_with_counter(Arc::new(AtomicUsize::new(0))));
        let notified = Arc::new(AtomicUsize::new(0));

        coordinator.run(&mut graph, &NullEventSink).await.unwrap();
        assert_eq!(coordinator.get_state().status, RunStatus::Failed);

        let counter = Arc::clone(&notified);
        coordinator.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(coordinator.reset());

        assert_eq!(coordinator.get_state(), ExecutionState::default());
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(graph.find_node("a").unwrap().status, NodeStatus::Completed);
        assert_eq!(graph.find_node("b").unwrap().status, NodeStatus::Error);
    }

    #[test]
    fn test_can_execute_reasons() {
        let coordinator = ExecutionCoordinator::default();

        let empty = WorkflowGraph::new("wf", "Empty");
        assert_eq!(
            coordinator.can_execute(&empty),
            CanExecute {
                can_execute: false,
                reason: Some("Workflow has no nodes".into()),
            }
        );

        let cycle = WorkflowBuilder::new("wf", "Cycle")
            .add_user_input("a", 1)
            .add_output("b")
            .connect("a", "b")
            .connect("b", "a")
            .build();
        let check = coordinator.can_execute(&cycle);
        assert!(!check.can_execute);
        assert!(check.reason.unwrap().starts_with("Cycle detected"));

        let generate = WorkflowBuilder::new("wf", "Bare")
            .add_generate("gen", None)
            .build();
        assert!(!coordinator.can_execute(&generate).can_execute);

        assert_eq!(coordinator.can_execute(&greeting_graph()), CanExecute::yes());
    }

    #[tokio::test]
    async fn test_isolated_node_policy() {
        let build = || {
            WorkflowBuilder::new("wf", "Isolated")
                .add_user_input("in", "x")
                .add_output("out")
                .add_user_input("stray", "y")
                .connect("in", "out")
                .build()
        };

        let lenient = ExecutionCoordinator::default();
        let mut graph = build();
        let result = lenient.run(&mut graph, &NullEventSink).await.unwrap();
        assert!(result.success);
        assert_eq!(result.final_outputs["stray"], "y");

        let strict = ExecutionCoordinator::with_config(EngineConfig {
            validation: ValidationPolicy {
                isolated_nodes: IsolatedNodePolicy::Reject,
            },
            ..EngineConfig::default()
        });
        let mut graph = build();
        let result = strict.run(&mut graph, &NullEventSink).await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.errors[0].node_id, None);
        assert!(graph.nodes.iter().all(|n| n.status == NodeStatus::Idle));
    }

    #[tokio::test]
    async fn test_configured_output_format() {
        let coordinator = ExecutionCoordinator::with_config(EngineConfig {
            output: crate::config::OutputDefaults {
                format: crate::types::OutputFormat::List,
            },
            ..EngineConfig::default()
        });
        let mut graph = WorkflowBuilder::new("wf", "List")
            .add_user_input("a", "first")
            .add_user_input("b", "second")
            .add_output("out")
            .connect("a", "out")
            .connect("b", "out")
            .build();

        let result = coordinator.run(&mut graph, &NullEventSink).await.unwrap();
        assert_eq!(result.final_outputs["out"], "1. first\n2. second");
    }

    #[tokio::test]
    async fn test_node_format_overrides_configured_default() {
        let coordinator = ExecutionCoordinator::with_config(EngineConfig {
            output: crate::config::OutputDefaults {
                format: crate::types::OutputFormat::List,
            },
            ..EngineConfig::default()
        });
        let mut graph = WorkflowBuilder::new("wf", "Json")
            .add_user_input("a", "first")
            .with_title("A")
            .add_output_with_format("out", crate::types::OutputFormat::Json)
            .connect("a", "out")
            .build();

        let result = coordinator.run(&mut graph, &NullEventSink).await.unwrap();
        assert_eq!(result.final_outputs["out"], "{\n  \"A\": \"first\"\n}");
    }

    #[tokio::test]
    async fn test_duplicate_node_ids_rejected_before_ordering() {
        let mut graph = WorkflowBuilder::new("wf", "Duplicates")
            .add_user_input("a", "x")
            .add_output("b")
            .add_user_input("b", "y")
            .connect("a", "b")
            .build();
        let coordinator = ExecutionCoordinator::default();

        let check = coordinator.can_execute(&graph);
        assert!(!check.can_execute);
        assert_eq!(
            check.reason.as_deref(),
            Some("Node id 'b' is used by more than one node")
        );

        let result = coordinator.run(&mut graph, &NullEventSink).await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].node_id, None);
        assert_eq!(
            result.errors[0].message,
            "Node id 'b' is used by more than one node"
        );
        assert!(graph.nodes.iter().all(|n| n.status == NodeStatus::Idle));
    }

    #[tokio::test]
    async fn test_coordinators_are_independent() {
        let first = ExecutionCoordinator::default();
        let second = ExecutionCoordinator::default();

        let mut graph = greeting_graph();
        first.run(&mut graph, &NullEventSink).await.unwrap();

        assert_eq!(first.get_state().status, RunStatus::Completed);
        assert_eq!(second.get_state().status, RunStatus::Idle);
    }

    #[tokio::test]
    async fn test_rerun_starts_fresh() {
        let coordinator = ExecutionCoordinator::default();
        let mut graph = greeting_graph();

        coordinator.run(&mut graph, &NullEventSink).await.unwrap();
        let first_id = coordinator.get_state().execution_id;
        coordinator.run(&mut graph, &NullEventSink).await.unwrap();

        let state = coordinator.get_state();
        assert_ne!(state.execution_id, first_id);
        assert_eq!(state.completed_nodes.len(), 3);
    }
}
