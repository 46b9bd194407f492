//! Attribute merge for incremental object diffs
//!
//! Merge is field-level override: scalars replace, nested objects merge
//! recursively, arrays replace wholesale. Both functions are pure and never
//! touch their inputs.

use serde_json::{Map, Value};

/// Merge `diff` on top of `old` and return the result
pub fn merge_value(old: &Value, diff: &Value) -> Value {
    match (old, diff) {
        (Value::Object(old), Value::Object(diff)) => Value::Object(merge_map(old, diff)),
        _ => diff.clone(),
    }
}

/// Merge every field of `diff` into a copy of `old`
pub fn merge_map(old: &Map<String, Value>, diff: &Map<String, Value>) -> Map<String, Value> {
    let mut out = old.clone();
    for (key, value) in diff {
        let merged = match out.get(key) {
            Some(existing) => merge_value(existing, value),
            None => value.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}
