//! Structural JSON shape comparison
//!
//! The legacy API and its v2 successor must return shape-equivalent data:
//! same key sets, same container kinds, same scalar kinds — values are free
//! to differ. `null` acts as a wildcard so optional fields populated on one
//! side only don't fail the comparison.

use serde_json::Value;

/// True when `a` and `b` have the same structure.
pub fn equivalent(a: &Value, b: &Value) -> bool {
    diff(a, b).is_none()
}

/// First diverging path between the two documents, or `None`.
pub fn diff(a: &Value, b: &Value) -> Option<String> {
    walk("$", a, b)
}

fn walk(path: &str, a: &Value, b: &Value) -> Option<String> {
    match (a, b) {
        // Optional fields: a null on either side matches anything.
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Object(x), Value::Object(y)) => {
            for key in x.keys() {
                if !y.contains_key(key) {
                    return Some(format!("{path}.{key}: missing on right"));
                }
            }
            for key in y.keys() {
                if !x.contains_key(key) {
                    return Some(format!("{path}.{key}: missing on left"));
                }
            }
            for (key, left) in x {
                if let Some(found) = walk(&format!("{path}.{key}"), left, &y[key]) {
                    return Some(found);
                }
            }
            None
        }
        // Element shape is judged on the first pair; an empty list on either
        // side carries no shape information.
        (Value::Array(x), Value::Array(y)) => match (x.first(), y.first()) {
            (Some(left), Some(right)) => walk(&format!("{path}[0]"), left, right),
            _ => None,
        },
        (Value::String(_), Value::String(_)) => None,
        (Value::Number(_), Value::Number(_)) => None,
        (Value::Bool(_), Value::Bool(_)) => None,
        _ => Some(format!("{path}: {} vs {}", kind(a), kind(b))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
