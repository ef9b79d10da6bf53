//! Masking of sensitive values before payloads reach the log.

use serde_json::{Map, Value};

pub const REDACTED: &str = "**REDACTED**";

/// Keys whose values identify the account or the hardware.
pub const REDACT_FIELDS: [&str; 4] = ["arn", "deviceId", "email", "userId"];

/// Return a copy of `data` with every sensitive value replaced by
/// [`REDACTED`]. Null and empty-string values are left alone.
pub fn redact(data: &Value) -> Value {
    match data {
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        Value::Object(map) => Value::Object(redact_map(map)),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => data.clone(),
    }
}

fn redact_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Null => Value::Null,
                Value::String(s) if s.is_empty() => value.clone(),
                _ if REDACT_FIELDS.contains(&key.as_str()) => Value::String(REDACTED.to_string()),
                _ => redact(value),
            };
            (key.clone(), value)
        })
        .collect()
}
