use serde_json::{Map, Value};

/// Drop empty entries from a record before it is persisted.
///
/// `null` and empty strings are removed; `false`, `0`, empty arrays and
/// empty objects are kept because they carry meaning.
pub fn strip(record: Map<String, Value>) -> Map<String, Value> {
    record.into_iter().filter(|(_, v)| !is_empty(v)).collect()
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
