//! `{{name}}` placeholder substitution
//!
//! Substitution is a literal, case-sensitive, global replace of each
//! `{{name}}` with the text form of the matching variable. Whitespace
//! inside the braces is not trimmed and unknown placeholders are left as-is.

use serde_json::{Map, Value};

/// Text form of a value: strings verbatim, `null` empty, anything else JSON
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Replace every `{{name}}` occurrence for each variable
pub fn render_template(template: &str, variables: &Map<String, Value>) -> String {
    let mut rendered = template.to_string();
    for (name, value) in variables {
        let placeholder = format!("{{{{{}}}}}", name);
        if rendered.contains(&placeholder) {
            rendered = rendered.replace(&placeholder, &value_to_text(value));
        }
    }
    rendered
}
