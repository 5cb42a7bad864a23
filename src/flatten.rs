//! Flattening of nested row values for formats that need flat rows (CSV)

use crate::records::Fields;
use serde_json::Value;

/// Flatten nested values of a row into dot-notation fields
///
/// Examples:
/// - `{"user": {"name": "Alice"}}` → `{"user.name": "Alice"}`
/// - `{"items": ["a", "b"]}` → `{"items.0": "a", "items.1": "b"}`
/// - `{"users": [{"name": "Alice"}]}` → `{"users.0.name": "Alice"}`
///
/// Empty objects and arrays become a null field so the column is not lost.
pub fn flatten_fields(fields: &Fields) -> Fields {
    let mut result = Fields::new();
    for (key, value) in fields {
        flatten_recursive(value, key.clone(), &mut result);
    }
    result
}

fn flatten_recursive(value: &Value, prefix: String, result: &mut Fields) {
    match value {
        Value::Object(obj) if !obj.is_empty() => {
            for (key, val) in obj {
                flatten_recursive(val, format!("{}.{}", prefix, key), result);
            }
        }
        Value::Array(arr) if !arr.is_empty() => {
            for (index, val) in arr.iter().enumerate() {
                flatten_recursive(val, format!("{}.{}", prefix, index), result);
            }
        }
        Value::Object(_) | Value::Array(_) => {
            result.insert(prefix, Value::Null);
        }
        _ => {
            result.insert(prefix, value.clone());
        }
    }
}

/// Check if a row holds nested values that need flattening
pub fn has_nested_data(fields: &Fields) -> bool {
    fields
        .values()
        .any(|v| matches!(v, Value::Object(_) | Value::Array(_)))
}
