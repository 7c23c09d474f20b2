//! Built-in node handlers
//!
//! Handlers for every non-custom node kind. All of them are synchronous
//! transforms over the execution context; hosts replace `generate` with a
//! handler that calls a real generation backend.

pub mod generate;
pub mod input;
pub mod output;

pub use generate::{render_prompt, GenerateHandler};
pub use input::{AddAssetsHandler, UserInputHandler};
pub use output::{format_output, OutputHandler};
