//! Dotted-path parameter resolution over the request's JSON-like trees.
//!
//! A path is a dot-separated sequence of segments. On a mapping node the
//! segment is a key; on a sequence node it must parse as a decimal index.
//! A mapping lookup also succeeds on the full dotted literal, so keys that
//! contain dots resolve without descent.

use serde_json::{Map, Value};

use super::error::HookError;

/// Resolve a dotted path against a value tree.
pub fn get_parameter<'a>(path: &str, params: &'a Value) -> Result<&'a Value, HookError> {
    match params {
        Value::Array(seq) => {
            if seq.is_empty() {
                return Err(HookError::parameter_node(path));
            }

            if let Some((head, rest)) = path.split_once('.') {
                let index = parse_index(head, seq.len())
                    .ok_or_else(|| HookError::parameter_node(path))?;
                return get_parameter(rest, &seq[index]);
            }

            let index =
                parse_index(path, seq.len()).ok_or_else(|| HookError::parameter_node(path))?;
            Ok(&seq[index])
        }

        Value::Object(map) => get_in_map(path, map),

        _ => Err(HookError::parameter_node(path)),
    }
}

/// Resolve a dotted path starting at a mapping, as used for the header and
/// query sources.
pub fn get_in_map<'a>(path: &str, map: &'a Map<String, Value>) -> Result<&'a Value, HookError> {
    // Full dotted literal as a key wins over descent.
    if let Some(v) = map.get(path) {
        return Ok(v);
    }

    if let Some((head, rest)) = path.split_once('.') {
        if let Some(v) = map.get(head) {
            return get_parameter(rest, v);
        }
    }

    Err(HookError::parameter_node(path))
}

/// Replace the leaf a dotted path points at, returning whether a
/// replacement happened. The final key must already exist.
pub fn replace_parameter(path: &str, params: &mut Value, value: Value) -> bool {
    match params {
        Value::Array(seq) => {
            if let Some((head, rest)) = path.split_once('.') {
                if let Some(index) = parse_index(head, seq.len()) {
                    return replace_parameter(rest, &mut seq[index], value);
                }
            }
            false
        }

        Value::Object(map) => replace_in_map(path, map, value),

        _ => false,
    }
}

/// Replace the leaf a dotted path points at inside a mapping.
pub fn replace_in_map(path: &str, map: &mut Map<String, Value>, value: Value) -> bool {
    if map.contains_key(path) {
        map.insert(path.to_string(), value);
        return true;
    }

    if let Some((head, rest)) = path.split_once('.') {
        if let Some(inner) = map.get_mut(head) {
            return replace_parameter(rest, inner, value);
        }
    }

    false
}

/// Resolve a dotted path and render the result as a string. Composite
/// values are JSON-encoded; scalars use their natural representation, with
/// JSON numbers keeping the exact token they had in the request body.
pub fn extract_parameter_as_string(path: &str, params: &Value) -> Result<String, HookError> {
    let value = get_parameter(path, params)?;
    value_to_string(value)
}

/// As [`extract_parameter_as_string`], starting at a mapping.
pub fn extract_from_map(path: &str, map: &Map<String, Value>) -> Result<String, HookError> {
    let value = get_in_map(path, map)?;
    value_to_string(value)
}

fn value_to_string(value: &Value) -> Result<String, HookError> {
    match value {
        Value::Object(_) | Value::Array(_) => serde_json::to_string(value)
            .map_err(|e| HookError::other(format!("JSON encode failed: {}", e))),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok("null".to_string()),
    }
}

fn parse_index(segment: &str, len: usize) -> Option<usize> {
    segment
        .parse::<usize>()
        .ok()
        .filter(|&index| index < len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dotted_path_over_json() {
        let payload = json!({"head_commit": {"id": "abc"}});
        assert_eq!(
            extract_parameter_as_string("head_commit.id", &payload).unwrap(),
            "abc"
        );
    }

    #[test]
    fn test_array_indexing() {
        let payload = json!({"commits": [{"branch": "master"}]});
        assert_eq!(
            extract_parameter_as_string("commits.0.branch", &payload).unwrap(),
            "master"
        );
    }

    #[test]
    fn test_dotted_literal_key() {
        let payload = json!({"a.b": "literal", "a": {"b": "nested"}});
        // The full dotted literal wins over descent.
        assert_eq!(
            extract_parameter_as_string("a.b", &payload).unwrap(),
            "literal"
        );
    }

    #[test]
    fn test_missing_node() {
        let payload = json!({"a": {"b": 1}});
        let err = get_parameter("a.c", &payload).unwrap_err();
        assert!(err.is_parameter_node());

        let err = get_parameter("commits.notanumber", &json!({"commits": [1, 2]})).unwrap_err();
        assert!(err.is_parameter_node());

        let err = get_parameter("commits.9", &json!({"commits": [1, 2]})).unwrap_err();
        assert!(err.is_parameter_node());
    }

    #[test]
    fn test_scalar_node_fails_descent() {
        let payload = json!({"a": "scalar"});
        assert!(get_parameter("a.b", &payload).is_err());
    }

    #[test]
    fn test_number_tokens_preserved() {
        let payload: Value = serde_json::from_str(r#"{"amount": 10.50, "big": 9007199254740993}"#)
            .unwrap();
        assert_eq!(
            extract_parameter_as_string("amount", &payload).unwrap(),
            "10.50"
        );
        assert_eq!(
            extract_parameter_as_string("big", &payload).unwrap(),
            "9007199254740993"
        );
    }

    #[test]
    fn test_composite_renders_as_json() {
        let payload = json!({"commits": [1, 2, 3]});
        assert_eq!(
            extract_parameter_as_string("commits", &payload).unwrap(),
            "[1,2,3]"
        );
    }

    #[test]
    fn test_replace_parameter() {
        let mut payload = json!({"data": "{\"x\":1}", "nested": {"inner": "old"}});
        assert!(replace_parameter("data", &mut payload, json!({"x": 1})));
        assert_eq!(payload["data"]["x"], json!(1));

        assert!(replace_parameter("nested.inner", &mut payload, json!("new")));
        assert_eq!(payload["nested"]["inner"], json!("new"));

        // A leaf that does not exist is not created.
        assert!(!replace_parameter("missing", &mut payload, json!(0)));
        assert!(!replace_parameter("nested.missing", &mut payload, json!(0)));
    }

    #[test]
    fn test_replace_in_array() {
        let mut payload = json!({"commits": [{"id": "a"}]});
        assert!(replace_parameter("commits.0.id", &mut payload, json!("b")));
        assert_eq!(payload["commits"][0]["id"], json!("b"));
    }
}
