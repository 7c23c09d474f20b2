//! Flow Engine - Sequential workflow execution for node graphs
//!
//! This crate runs directed graphs of typed nodes (user input, prompt
//! generation, output formatting, asset attachment and host-defined custom
//! nodes) one node at a time in dependency order. It provides:
//!
//! - Structural validation (dangling references, self-loops, cycles with
//!   readable paths, isolated nodes)
//! - Deterministic topological ordering
//! - Per-kind handler dispatch through a registry hosts can extend
//! - Run state with subscriptions, cooperative stop and halt-on-first-error
//!
//! # Architecture
//!
//! - `ExecutionCoordinator`: Owns run state and drives a whole run
//! - `NodeExecutor`: Readiness checks, context assembly, handler dispatch
//! - `HandlerRegistry`: Handler lookup by node kind
//! - `EventSink`: Generic event streaming (not tied to any host)
//!
//! # Example
//!
//! ```
//! use flow_engine::{ExecutionCoordinator, VecEventSink, WorkflowBuilder};
//!
//! # tokio_test::block_on(async {
//! let mut graph = WorkflowBuilder::new("wf", "Summary")
//!     .add_user_input("topic", "rust").with_title("Topic")
//!     .add_generate("prompt", Some("Write about {{Topic}}"))
//!     .add_output("out")
//!     .connect("topic", "prompt")
//!     .connect("prompt", "out")
//!     .build();
//!
//! let sink = VecEventSink::new();
//! let result = ExecutionCoordinator::default().run(&mut graph, &sink).await.unwrap();
//! assert!(result.success);
//! assert_eq!(result.final_outputs["out"], "Write about rust");
//! # });
//! ```

pub mod builder;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod executor;
pub mod handlers;
pub mod registry;
pub mod state;
pub mod template;
pub mod topology;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::WorkflowBuilder;
pub use config::{ConfigError, EngineConfig, OutputDefaults};
pub use coordinator::{CanExecute, ExecutionCoordinator, SubscriberId, WorkflowRunResult};
pub use error::{EngineError, ErrorKind, ExecutionError, HandlerError, Result};
pub use events::{EventError, EventSink, FnEventSink, NodeUpdate, NullEventSink, VecEventSink, WorkflowEvent};
pub use executor::{ExecutionContext, NodeExecutor};
pub use registry::{HandlerRegistry, NodeHandler};
pub use state::{ErrorRecord, ExecutionState, RunStatus};
pub use topology::topological_order;
pub use types::{
    AddAssetsConfig, AssetRef, Connection, ConnectionId, CustomConfig, GenerateConfig, Node,
    NodeId, NodeKind, NodeStatus, OutputConfig, OutputFormat, UserInputConfig, WorkflowGraph,
};
pub use validation::{
    validate_workflow, IsolatedNodePolicy, ValidationError, ValidationPolicy, ValidationReport,
    ValidationWarning,
};
