//! Handler registry for per-kind node dispatch
//!
//! Maps handler keys (`userInput`, `generate`, `output`, `addAssets`, or a
//! custom key) to the handler that executes nodes of that kind. Hosts
//! register their own handlers, typically for `generate`, on top of the
//! built-ins.
//!
//! # Usage
//!
//! ```
//! use flow_engine::{HandlerRegistry, HandlerError};
//!
//! let mut registry = HandlerRegistry::with_builtins();
//! registry.register_fn("shout", |_node, ctx| {
//!     let text = ctx.input_texts().join(" ");
//!     Ok::<_, HandlerError>(serde_json::json!(text.to_uppercase()))
//! });
//! assert!(registry.has_handler("shout"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HandlerError;
use crate::executor::ExecutionContext;
use crate::handlers::{AddAssetsHandler, GenerateHandler, OutputHandler, UserInputHandler};
use crate::types::{Node, NodeKind, OutputFormat};

/// Executes nodes of one kind
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Produce the node's result from its assembled context
    async fn execute(&self, node: &Node, context: &ExecutionContext) -> Result<Value, HandlerError>;
}

/// Adapts a synchronous closure into a `NodeHandler`
struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> NodeHandler for FnHandler<F>
where
    F: Fn(&Node, &ExecutionContext) -> Result<Value, HandlerError> + Send + Sync,
{
    async fn execute(&self, node: &Node, context: &ExecutionContext) -> Result<Value, HandlerError> {
        (self.f)(node, context)
    }
}

/// Registry of node handlers keyed by handler key
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers for every non-custom kind
    pub fn with_builtins() -> Self {
        Self::with_builtins_and_format(OutputFormat::default())
    }

    /// Built-ins, with `default_format` for output nodes that leave it unset
    pub fn with_builtins_and_format(default_format: OutputFormat) -> Self {
        let mut registry = Self::new();
        registry.register(NodeKind::USER_INPUT, Arc::new(UserInputHandler));
        registry.register(NodeKind::GENERATE, Arc::new(GenerateHandler));
        registry.register(
            NodeKind::OUTPUT,
            Arc::new(OutputHandler::with_default_format(default_format)),
        );
        registry.register(NodeKind::ADD_ASSETS, Arc::new(AddAssetsHandler));
        registry
    }

    /// Register a handler, replacing any existing one for the key
    pub fn register(&mut self, key: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        let key = key.into();
        if self.handlers.insert(key.clone(), handler).is_some() {
            log::debug!("Replaced handler for '{}'", key);
        }
    }

    /// Register a synchronous closure as a handler
    pub fn register_fn<F>(&mut self, key: impl Into<String>, f: F)
    where
        F: Fn(&Node, &ExecutionContext) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.register(key, Arc::new(FnHandler { f }));
    }

    /// Remove a handler
    pub fn unregister(&mut self, key: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(key).cloned()
    }

    pub fn has_handler(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Merge another registry into this one; its handlers win on conflict
    pub fn merge(&mut self, other: HandlerRegistry) {
        self.handlers.extend(other.handlers);
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.keys())
            .finish()
    }
}
