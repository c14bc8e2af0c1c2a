//! Multipart form data parsing.

use bytes::Bytes;
use futures_util::stream;
use multer::{Constraints, Multipart, SizeLimit};
use serde_json::{Map, Value};

use crate::hook::{argument, Argument, HookError};

/// Parse multipart form data into payload entries.
///
/// Text values populate `payload[name]` with the first value per name.
/// File parts are decoded as JSON when their declared content type is
/// `application/json` or when the part name matches a
/// parse-parameters-as-json entry with the payload source; other file
/// parts are ignored.
pub async fn parse_multipart(
    content_type: &str,
    body: Bytes,
    json_parameters: &[Argument],
    max_memory: u64,
) -> Result<Map<String, Value>, HookError> {
    let boundary = content_type
        .split(';')
        .find_map(|part| {
            let trimmed = part.trim();
            // Case-insensitive boundary search
            if trimmed.to_lowercase().starts_with("boundary=") {
                Some(trimmed[9..].trim_matches('"').to_string())
            } else {
                None
            }
        })
        .ok_or_else(|| {
            HookError::Parse("missing boundary in multipart content-type".to_string())
        })?;

    let constraints = Constraints::new().size_limit(SizeLimit::new().whole_stream(max_memory));
    let mut multipart = Multipart::with_constraints(
        stream::once(async { Ok::<_, std::io::Error>(body) }),
        boundary,
        constraints,
    );

    let mut payload = Map::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| HookError::Parse(e.to_string()))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        let is_file = field.file_name().is_some();
        let field_content_type = field
            .content_type()
            .map(|m| m.to_string())
            .unwrap_or_default();

        if !is_file {
            let value = field
                .text()
                .await
                .map_err(|e| HookError::Parse(e.to_string()))?;
            if !payload.contains_key(&field_name) {
                payload.insert(field_name, Value::String(value));
            }
            continue;
        }

        // Force parsing as JSON regardless of the declared content type
        // when the hook asks for it.
        let parse_as_json = field_content_type == "application/json"
            || json_parameters.iter().any(|j| {
                j.source == argument::SOURCE_PAYLOAD && j.name == field_name
            });

        if !parse_as_json {
            continue;
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| HookError::Parse(e.to_string()))?;

        match serde_json::from_slice::<Map<String, Value>>(&data) {
            Ok(part) => {
                payload.insert(field_name, Value::Object(part));
            }
            Err(e) => {
                tracing::error!(field_name = %field_name, error = %e,
                    "error parsing JSON payload file part");
            }
        }
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "------------------------d74496d66958873e";

    fn multipart_body(parts: &[(&str, Option<&str>, Option<&str>, &str)]) -> Bytes {
        // (name, filename, content-type, body)
        let mut out = String::new();
        for (name, filename, content_type, body) in parts {
            out.push_str(&format!("--{}\r\n", BOUNDARY));
            out.push_str(&format!("Content-Disposition: form-data; name=\"{}\"", name));
            if let Some(filename) = filename {
                out.push_str(&format!("; filename=\"{}\"", filename));
            }
            out.push_str("\r\n");
            if let Some(content_type) = content_type {
                out.push_str(&format!("Content-Type: {}\r\n", content_type));
            }
            out.push_str("\r\n");
            out.push_str(body);
            out.push_str("\r\n");
        }
        out.push_str(&format!("--{}--\r\n", BOUNDARY));
        Bytes::from(out)
    }

    fn content_type() -> String {
        format!("multipart/form-data; boundary={}", BOUNDARY)
    }

    #[tokio::test]
    async fn test_text_values() {
        let body = multipart_body(&[
            ("action", None, None, "deploy"),
            ("action", None, None, "ignored duplicate"),
        ]);

        let payload = parse_multipart(&content_type(), body, &[], 1 << 20)
            .await
            .unwrap();
        assert_eq!(payload["action"], Value::String("deploy".to_string()));
    }

    #[tokio::test]
    async fn test_json_file_part_by_content_type() {
        let body = multipart_body(&[(
            "payload",
            Some("payload.json"),
            Some("application/json"),
            r#"{"ref": "refs/heads/master"}"#,
        )]);

        let payload = parse_multipart(&content_type(), body, &[], 1 << 20)
            .await
            .unwrap();
        assert_eq!(payload["payload"]["ref"], Value::String("refs/heads/master".into()));
    }

    #[tokio::test]
    async fn test_json_file_part_by_hook_parameter() {
        let body = multipart_body(&[(
            "meta",
            Some("meta.bin"),
            Some("application/octet-stream"),
            r#"{"x": 1}"#,
        )]);

        let json_params = vec![Argument::new(argument::SOURCE_PAYLOAD, "meta")];
        let payload = parse_multipart(&content_type(), body, &json_params, 1 << 20)
            .await
            .unwrap();
        assert!(payload["meta"].is_object());
    }

    #[tokio::test]
    async fn test_non_json_file_ignored() {
        let body = multipart_body(&[(
            "upload",
            Some("data.bin"),
            Some("application/octet-stream"),
            "binary-ish",
        )]);

        let payload = parse_multipart(&content_type(), body, &[], 1 << 20)
            .await
            .unwrap();
        assert!(!payload.contains_key("upload"));
    }

    #[tokio::test]
    async fn test_missing_boundary() {
        let err = parse_multipart("multipart/form-data", Bytes::new(), &[], 1 << 20)
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Parse(_)));
    }
}
