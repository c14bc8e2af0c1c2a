//! Body decoding into the uniform payload tree.
//!
//! The effective content type (hook override wins) is matched by substring:
//! `json`, `x-www-form-urlencoded`, `xml` and `multipart/form-data` each
//! get a decoder producing the same JSON-like mapping the parameter
//! resolver walks.

pub mod multipart;
pub mod xml;

use serde_json::{Map, Value};

use crate::core::request::form_decode;
use crate::hook::HookError;

/// Decode a JSON body. Number tokens keep their textual form.
pub fn parse_json(body: &[u8]) -> Result<Value, HookError> {
    serde_json::from_slice(body).map_err(|e| HookError::Parse(e.to_string()))
}

/// Decode a form-urlencoded body into a mapping, first value per key.
pub fn parse_form(body: &[u8]) -> Result<Value, HookError> {
    let body = std::str::from_utf8(body)
        .map_err(|e| HookError::Parse(format!("form body is not valid UTF-8: {}", e)))?;

    let mut map = Map::new();
    for pair in body.split('&') {
        if pair.is_empty() {
            continue;
        }

        let (key, value) = match pair.find('=') {
            Some(pos) => (&pair[..pos], &pair[pos + 1..]),
            None => (pair, ""),
        };

        if key.is_empty() {
            continue;
        }

        let key = form_decode(key);
        if !map.contains_key(&key) {
            map.insert(key, Value::String(form_decode(value)));
        }
    }

    Ok(Value::Object(map))
}
