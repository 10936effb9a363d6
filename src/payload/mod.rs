//! Helpers for the opaque JSON payload fields.
//!
//! Request data, message content, and event data are carried as
//! `serde_json::Value` and never mapped to typed structs: the core has no
//! knowledge of per-channel content schema. The only writes it ever performs
//! are merge-on-error style — set a single key, keep the rest untouched.

use serde_json::{json, Map, Value};

/// Key merged into a payload when an operation records failure details.
pub const ERROR_DETAILS_KEY: &str = "errorDetails";

/// Key tagging a delivery failure as permanent (excluded from retry sweeps).
pub const PERMANENT_KEY: &str = "permanent";

/// Merge a single key into an opaque payload, preserving everything else.
///
/// Non-object payloads are rewrapped so the original content survives under
/// a `data` key rather than being overwritten.
pub fn merge_key(payload: &Value, key: &str, value: Value) -> Value {
    match payload {
        Value::Object(map) => {
            let mut merged = map.clone();
            merged.insert(key.to_string(), value);
            Value::Object(merged)
        }
        Value::Null => {
            let mut map = Map::new();
            map.insert(key.to_string(), value);
            Value::Object(map)
        }
        other => json!({ "data": other, key: value }),
    }
}

/// Merge error details into a payload.
pub fn with_error_details(payload: &Value, details: &str) -> Value {
    merge_key(payload, ERROR_DETAILS_KEY, Value::String(details.to_string()))
}

/// Read back error details previously merged into a payload.
pub fn error_details(payload: &Value) -> Option<&str> {
    payload.get(ERROR_DETAILS_KEY).and_then(Value::as_str)
}

/// Whether a payload carries the permanent-failure tag.
pub fn is_permanent(payload: &Value) -> bool {
    payload
        .get(PERMANENT_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_into_object_preserves_keys() {
        let payload = json!({"subject": "tag renewal", "herd": "H-42"});
        let merged = with_error_details(&payload, "provider rejected");

        assert_eq!(merged["subject"], "tag renewal");
        assert_eq!(merged["herd"], "H-42");
        assert_eq!(error_details(&merged), Some("provider rejected"));
    }

    #[test]
    fn test_merge_into_null() {
        let merged = merge_key(&Value::Null, PERMANENT_KEY, json!(true));
        assert!(is_permanent(&merged));
    }

    #[test]
    fn test_merge_into_non_object_keeps_original() {
        let payload = json!("plain text body");
        let merged = with_error_details(&payload, "boom");

        assert_eq!(merged["data"], json!("plain text body"));
        assert_eq!(error_details(&merged), Some("boom"));
    }

    #[test]
    fn test_merge_does_not_mutate_input() {
        let payload = json!({"a": 1});
        let _ = with_error_details(&payload, "x");
        assert!(payload.get(ERROR_DETAILS_KEY).is_none());
    }

    #[test]
    fn test_permanent_defaults_false() {
        assert!(!is_permanent(&json!({"errorDetails": "x"})));
        assert!(!is_permanent(&json!({"permanent": "yes"})));
        assert!(is_permanent(&json!({"permanent": true})));
    }
}
