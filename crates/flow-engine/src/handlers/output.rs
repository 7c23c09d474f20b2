//! Output formatting
//!
//! An output node concatenates its inputs as newline-joined text, a
//! pretty-printed JSON object, or a numbered list.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::HandlerError;
use crate::executor::ExecutionContext;
use crate::registry::NodeHandler;
use crate::template::value_to_text;
use crate::types::{Node, NodeKind, OutputFormat};

/// Format named inputs according to `format`
pub fn format_output(inputs: &Map<String, Value>, format: OutputFormat) -> Result<String, HandlerError> {
    let text = match format {
        OutputFormat::Text => inputs
            .values()
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Json => serde_json::to_string_pretty(inputs)?,
        OutputFormat::List => inputs
            .values()
            .enumerate()
            .map(|(i, value)| format!("{}. {}", i + 1, value_to_text(value)))
            .collect::<Vec<_>>()
            .join("\n"),
    };
    Ok(text)
}

/// Output handler with a fallback format for nodes that leave it unset
pub struct OutputHandler {
    default_format: OutputFormat,
}

impl OutputHandler {
    pub fn with_default_format(default_format: OutputFormat) -> Self {
        Self { default_format }
    }
}

impl Default for OutputHandler {
    fn default() -> Self {
        Self::with_default_format(OutputFormat::default())
    }
}

#[async_trait]
impl NodeHandler for OutputHandler {
    async fn execute(&self, node: &Node, context: &ExecutionContext) -> Result<Value, HandlerError> {
        let NodeKind::Output(config) = &node.kind else {
            return Err(HandlerError::new(format!(
                "node '{}' is not an output node",
                node.id
            )));
        };
        let format = config.format.unwrap_or(self.default_format);
        Ok(Value::String(format_output(&context.inputs, format)?))
    }
}
