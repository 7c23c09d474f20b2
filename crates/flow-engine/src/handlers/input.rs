//! Source nodes: user input and asset lists

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HandlerError;
use crate::executor::ExecutionContext;
use crate::registry::NodeHandler;
use crate::types::{Node, NodeKind};

/// Returns the value the user entered
pub struct UserInputHandler;

#[async_trait]
impl NodeHandler for UserInputHandler {
    async fn execute(&self, node: &Node, _context: &ExecutionContext) -> Result<Value, HandlerError> {
        match &node.kind {
            NodeKind::UserInput(config) => Ok(config.value.clone()),
            _ => Err(HandlerError::new(format!(
                "node '{}' is not a user input node",
                node.id
            ))),
        }
    }
}

/// Returns the configured assets as a JSON array
pub struct AddAssetsHandler;

#[async_trait]
impl NodeHandler for AddAssetsHandler {
    async fn execute(&self, node: &Node, _context: &ExecutionContext) -> Result<Value, HandlerError> {
        match &node.kind {
            NodeKind::AddAssets(config) => Ok(serde_json::to_value(&config.assets)?),
            _ => Err(HandlerError::new(format!(
                "node '{}' is not an add-assets node",
                node.id
            ))),
        }
    }
}
