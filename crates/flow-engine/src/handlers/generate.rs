//! Prompt rendering for generate nodes
//!
//! The built-in handler only renders the prompt; the generation call itself
//! belongs to the host, whose handler can reuse [`render_prompt`].

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HandlerError;
use crate::executor::ExecutionContext;
use crate::registry::NodeHandler;
use crate::template::render_template;
use crate::types::{GenerateConfig, Node, NodeKind};

/// Render the prompt a generate node would send
///
/// With a template, placeholders are substituted from the context
/// variables. Without one, the input texts are joined by newlines.
pub fn render_prompt(config: &GenerateConfig, context: &ExecutionContext) -> String {
    match config.template() {
        Some(template) => render_template(template, &context.variables),
        None => context.input_texts().join("\n"),
    }
}

/// Default generate handler: returns the rendered prompt
pub struct GenerateHandler;

#[async_trait]
impl NodeHandler for GenerateHandler {
    async fn execute(&self, node: &Node, context: &ExecutionContext) -> Result<Value, HandlerError> {
        let NodeKind::Generate(config) = &node.kind else {
            return Err(HandlerError::new(format!(
                "node '{}' is not a generate node",
                node.id
            )));
        };
        Ok(Value::String(render_prompt(config, context)))
    }
}
