//! Low-level helpers for the positional wire format.
//!
//! Bodies arrive with an anti-hijacking prefix, sometimes wrapped in an RPC
//! envelope whose payload is itself a JSON string. Everything past parsing
//! goes through [`value_at`], which never panics on missing depth.

use serde_json::Value;
use thiserror::Error;

use crate::domain::{identifier_from_path, Body};

/// Literal prefix the host prepends to JSON responses.
pub const SECURITY_PREFIX: &str = ")]}'";

/// Marker in the first slot of an RPC envelope entry.
const ENVELOPE_MARKER: &str = "wrb.fr";

/// Seconds values above this are assumed to be milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Failures that abort decoding of a whole exchange.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The body is not JSON at all.
    #[error("body is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// The body looked like an RPC envelope but its payload was unreadable.
    #[error("malformed envelope: {0}")]
    Envelope(String),
}

/// Removes the security prefix and surrounding whitespace.
///
/// Applying it to an already-stripped body returns the body unchanged.
#[must_use]
pub fn strip_security_prefix(body: &str) -> &str {
    let trimmed = body.trim_start();
    trimmed
        .strip_prefix(SECURITY_PREFIX)
        .map_or(trimmed, str::trim_start)
}

/// Parses a body into a JSON value, unwrapping an RPC envelope if present.
///
/// # Errors
/// Returns [`DecodeError`] if the text is not JSON or the envelope payload is broken.
pub fn parse_body(body: &Body) -> Result<Value, DecodeError> {
    let value = match body {
        Body::Text(text) => {
            let stripped = strip_security_prefix(text);
            // Batched responses put a byte count on the first line.
            let json = match stripped.split_once('\n') {
                Some((head, rest))
                    if !head.trim().is_empty()
                        && head.trim().chars().all(|c| c.is_ascii_digit()) =>
                {
                    rest
                }
                _ => stripped,
            };
            serde_json::from_str(json)?
        }
        Body::Structured(value) => value.clone(),
    };
    unwrap_envelope(value)
}

/// Returns the inner payload of `[["wrb.fr", rpc_id, "<json>", ...], ...]`,
/// or the value unchanged when it is not an envelope.
fn unwrap_envelope(value: Value) -> Result<Value, DecodeError> {
    let Some(entry) = value_at(&value, &[0]) else {
        return Ok(value);
    };
    if value_at(entry, &[0]).and_then(Value::as_str) != Some(ENVELOPE_MARKER) {
        return Ok(value);
    }
    match value_at(entry, &[2]) {
        Some(Value::String(inner)) => serde_json::from_str(inner).map_err(DecodeError::from),
        Some(Value::Null) | None => Err(DecodeError::Envelope("empty payload".into())),
        Some(other) => Ok(other.clone()),
    }
}

/// Follows `path` through nested arrays.
///
/// Every step checks the container is an array and the index exists.
/// A JSON `null` at the end of the path counts as absent.
#[must_use]
pub fn value_at<'a>(root: &'a Value, path: &[usize]) -> Option<&'a Value> {
    let found = path
        .iter()
        .try_fold(root, |node, &index| node.as_array()?.get(index))?;
    (!found.is_null()).then_some(found)
}

/// Reads a resource path and returns its final segment.
#[must_use]
pub fn resource_id(value: &Value) -> Option<String> {
    value
        .as_str()
        .and_then(identifier_from_path)
        .map(str::to_string)
}

/// Normalizes a timestamp slot to epoch seconds.
///
/// Accepts a bare number, a numeric string, or a `[seconds, nanos]` pair.
#[must_use]
pub fn epoch_seconds(value: &Value) -> Option<i64> {
    let raw = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Array(pair) => pair.first().and_then(epoch_seconds),
        _ => None,
    }?;
    Some(if raw > MILLIS_THRESHOLD { raw / 1000 } else { raw })
}

/// Reads a text slot, joining string parts when the slot is an array.
#[must_use]
pub fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let joined: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
            (!joined.is_empty()).then(|| joined.join("\n"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_prefix_is_idempotent() {
        let raw = ")]}'\n[1,2]";
        let once = strip_security_prefix(raw);
        assert_eq!(once, "[1,2]");
        assert_eq!(strip_security_prefix(once), once);
        assert_eq!(strip_security_prefix("[3]"), "[3]");
    }

    #[test]
    fn test_parse_body_with_length_line() {
        let body = Body::Text(")]}'\n\n42\n[[\"wrb.fr\",\"x\",\"[\\\"a/b\\\"]\"]]".into());
        let value = parse_body(&body).unwrap();
        assert_eq!(value, json!(["a/b"]));
    }

    #[test]
    fn test_parse_body_rejects_garbage() {
        let body = Body::Text("<html>".into());
        assert!(matches!(parse_body(&body), Err(DecodeError::Parse(_))));
    }

    #[test]
    fn test_empty_envelope_is_error() {
        let body = Body::Structured(json!([["wrb.fr", "x", null]]));
        assert!(matches!(parse_body(&body), Err(DecodeError::Envelope(_))));
    }

    #[test]
    fn test_value_at_handles_missing_depth() {
        let v = json!([1, [2, [3]], null]);
        assert_eq!(value_at(&v, &[1, 1, 0]), Some(&json!(3)));
        assert_eq!(value_at(&v, &[0, 0]), None);
        assert_eq!(value_at(&v, &[9]), None);
        assert_eq!(value_at(&v, &[2]), None);
    }

    #[test]
    fn test_epoch_seconds_forms() {
        assert_eq!(epoch_seconds(&json!([1_700_000_000, 5])), Some(1_700_000_000));
        assert_eq!(epoch_seconds(&json!(1_700_000_000_123_i64)), Some(1_700_000_000));
        assert_eq!(epoch_seconds(&json!("1700000000")), Some(1_700_000_000));
        assert_eq!(epoch_seconds(&json!({"s": 1})), None);
    }

    #[test]
    fn test_resource_id_requires_path() {
        assert_eq!(resource_id(&json!("prompts/abc")), Some("abc".into()));
        assert_eq!(resource_id(&json!("abc")), None);
        assert_eq!(resource_id(&json!(5)), None);
    }
}
