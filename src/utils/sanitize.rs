//! Neutralises caller-supplied strings before they are forwarded to the ERP.

use serde_json::Value;

use crate::models::Arguments;

/// Strips `;` and `\` and HTML-escapes a single string.
///
/// Stripping happens first so the entities produced by escaping stay intact.
pub fn sanitize_str(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            ';' | '\\' => {}
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

/// Sanitizes every string inside `value`, recursing through arrays and objects.
/// Object keys are left as they are; numbers, booleans and null pass through.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_str(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, sanitize_value(v))).collect()),
        other => other,
    }
}

pub fn sanitize_arguments(arguments: Arguments) -> Arguments {
    arguments
        .into_iter()
        .map(|(name, value)| (name, sanitize_value(value)))
        .collect()
}
