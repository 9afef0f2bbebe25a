//! Execution context helpers.
//!
//! The context is a plain JSON object seeded from the instance's input data.
//! Each completed step's output is shallow-merged into it, so later steps see
//! everything earlier steps produced. Key collisions overwrite: last write
//! wins, and nested objects are replaced wholesale, never deep-merged.

use lexflow_types::workflow::JsonMap;
use serde_json::Value;

/// Shallow-merge `output` into `context`, last write wins.
pub fn merge_output(context: &mut JsonMap, output: &JsonMap) {
    for (key, value) in output {
        context.insert(key.clone(), value.clone());
    }
}

/// Pull the document text out of the context: the `"text"` key, falling back
/// to `"content"`. Non-string values under those keys do not count, nor do
/// empty strings.
pub fn text_content(context: &JsonMap) -> Option<&str> {
    context
        .get("text")
        .and_then(Value::as_str)
        .or_else(|| context.get("content").and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

/// Display form of a JSON value for validation and transformation rules.
/// Strings come back verbatim (unquoted), null becomes the empty string, and
/// composites serialize compactly.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
