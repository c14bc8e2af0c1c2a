//! Hook definitions and the parameter machinery behind them.
//!
//! A [`Hook`] is one named configuration entry: the command to run, the
//! argument/environment/file mappings feeding it, the trigger rule gating
//! it, and the response policy. Hooks are deserialized from JSON or YAML
//! files with the field names the hook-file format has always used.

pub mod argument;
pub mod error;
pub mod parameter;
pub mod rule;
pub mod signature;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::core::request::{canonical_mime_header_key, HookRequest};
pub use argument::Argument;
pub use error::{Errors, HookError, SignatureError};
pub use rule::Rules;

/// Prefix applied to environment variable names that lack an explicit
/// override.
pub const ENV_NAMESPACE: &str = "HOOK_";

/// A response header pair configured on a hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Details for a single hook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Hook {
    pub id: String,
    pub execute_command: String,
    pub command_working_directory: String,
    pub response_message: String,
    pub response_headers: Vec<Header>,
    #[serde(rename = "include-command-output-in-response")]
    pub capture_command_output: bool,
    pub stream_command_output: bool,
    #[serde(rename = "include-command-output-in-response-on-error")]
    pub capture_command_output_on_error: bool,
    pub pass_environment_to_command: Vec<Argument>,
    pub pass_arguments_to_command: Vec<Argument>,
    pub pass_file_to_command: Vec<Argument>,
    #[serde(rename = "parse-parameters-as-json")]
    pub json_string_parameters: Vec<Argument>,
    pub trigger_rule: Option<Rules>,
    pub trigger_rule_mismatch_http_response_code: u16,
    pub trigger_signature_soft_failures: bool,
    pub incoming_payload_content_type: String,
    pub success_http_response_code: u16,
    pub http_methods: Vec<String>,
    /// Maximum runtime of the command; zero means no timeout. Accepts a
    /// number of seconds or a duration string such as `"30s"`.
    #[serde(with = "timeout_secs")]
    pub timeout: Duration,
}

/// A resolved file-valued argument, ready to be materialized as a
/// temporary file whose path is exposed through an environment variable.
#[derive(Debug)]
pub struct FileParameter {
    /// Environment variable that will carry the temp file path.
    pub env_name: String,
    /// File contents, already base64-decoded if requested.
    pub data: Vec<u8>,
    /// The materialized temporary file; deleting happens on drop.
    pub file: Option<tempfile::NamedTempFile>,
}

impl Hook {
    /// Decode the configured arguments as JSON objects and replace the
    /// string leaves they were resolved from with the decoded objects.
    ///
    /// Only headers, query parameters and the payload are valid targets.
    /// Failures are collected and reported jointly; successful
    /// substitutions are applied even when siblings fail.
    pub fn parse_json_parameters(&self, req: &mut HookRequest) -> Result<(), Errors> {
        let mut errors = Errors::new();

        for argument in &self.json_string_parameters {
            let raw = match argument.get(req) {
                Ok(raw) => raw,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };

            let decoded: Map<String, Value> = match serde_json::from_str(&raw) {
                Ok(decoded) => decoded,
                Err(err) => {
                    errors.push(HookError::Parse(err.to_string()));
                    continue;
                }
            };

            let decoded = Value::Object(decoded);
            match argument.source.as_str() {
                argument::SOURCE_HEADER => {
                    let key = canonical_mime_header_key(&argument.name);
                    parameter::replace_in_map(&key, &mut req.headers, decoded);
                }
                argument::SOURCE_PAYLOAD => {
                    if let Some(payload) = &mut req.payload {
                        parameter::replace_parameter(&argument.name, payload, decoded);
                    }
                }
                argument::SOURCE_QUERY | argument::SOURCE_QUERY_ALIAS => {
                    parameter::replace_in_map(&argument.name, &mut req.query, decoded);
                }
                _ => {
                    errors.push(HookError::InvalidSource {
                        argument: argument.clone(),
                    });
                }
            }
        }

        errors.into_result()
    }

    /// Build the argument vector for the command. `argv[0]` is the
    /// configured command; a failed resolution contributes an empty string
    /// and the error is accumulated.
    pub fn extract_command_arguments(&self, req: &HookRequest) -> (Vec<String>, Errors) {
        let mut args = vec![self.execute_command.clone()];
        let mut errors = Errors::new();

        for argument in &self.pass_arguments_to_command {
            match argument.get(req) {
                Ok(value) => args.push(value),
                Err(err) => {
                    args.push(String::new());
                    errors.push(err);
                }
            }
        }

        (args, errors)
    }

    /// Build the environment additions for the command. Entries that fail
    /// to resolve are skipped and the error accumulated.
    pub fn extract_command_arguments_for_env(
        &self,
        req: &HookRequest,
    ) -> (Vec<(String, String)>, Errors) {
        let mut env = Vec::new();
        let mut errors = Errors::new();

        for argument in &self.pass_environment_to_command {
            let value = match argument.get(req) {
                Ok(value) => value,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };

            let name = if argument.env_name.is_empty() {
                format!("{}{}", ENV_NAMESPACE, argument.name)
            } else {
                argument.env_name.clone()
            };

            env.push((name, value));
        }

        (env, errors)
    }

    /// Resolve the file-valued arguments. Contents are base64-decoded when
    /// requested, substituting empty bytes on decode failure. The files
    /// themselves are materialized later by the executor.
    pub fn extract_command_arguments_for_file(
        &self,
        req: &HookRequest,
    ) -> (Vec<FileParameter>, Errors) {
        use base64::Engine;

        let mut files = Vec::new();
        let mut errors = Errors::new();

        for argument in &self.pass_file_to_command {
            let value = match argument.get(req) {
                Ok(value) => value,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };

            let env_name = if argument.env_name.is_empty() {
                let fallback = format!("{}{}", ENV_NAMESPACE, argument.name.to_uppercase());
                debug!(fallback = %fallback, "no ENVVAR name specified, using fallback");
                fallback
            } else {
                argument.env_name.clone()
            };

            let data = if argument.base64_decode {
                match base64::engine::general_purpose::STANDARD.decode(value.as_bytes()) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        error!(
                            argument_name = %argument.name,
                            error = %err,
                            "error decoding base64 while extracting argument to file"
                        );
                        Vec::new()
                    }
                }
            } else {
                value.into_bytes()
            };

            files.push(FileParameter {
                env_name,
                data,
                file: None,
            });
        }

        (files, errors)
    }
}

/// Serde adapter for the `timeout` field: seconds as an integer, or a
/// duration string such as `"30s"` or `"2m"`.
mod timeout_secs {
    use std::fmt;
    use std::time::Duration;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        struct TimeoutVisitor;

        impl<'de> Visitor<'de> for TimeoutVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number of seconds or a duration string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
                u64::try_from(v)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("timeout must not be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
                crate::config::parse::parse_duration(v)
                    .map(|d| d.unwrap_or(Duration::ZERO))
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(TimeoutVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::argument::{SOURCE_HEADER, SOURCE_PAYLOAD, SOURCE_STRING};
    use serde_json::json;

    fn request() -> HookRequest {
        let mut req = HookRequest::new("t", "POST", "127.0.0.1:1");
        req.payload = Some(json!({
            "head_commit": {"id": "abc"},
            "inline": "{\"count\": 3}"
        }));
        req.headers.insert(
            "X-Meta".to_string(),
            Value::String("{\"env\": \"prod\"}".to_string()),
        );
        req
    }

    #[test]
    fn test_hook_deserializes_wire_names() {
        let raw = r#"
        {
            "id": "deploy",
            "execute-command": "/usr/bin/deploy.sh",
            "command-working-directory": "/srv",
            "include-command-output-in-response": true,
            "http-methods": ["POST"],
            "timeout": "3s",
            "pass-arguments-to-command": [
                {"source": "payload", "name": "head_commit.id"}
            ],
            "trigger-rule": {
                "match": {
                    "type": "value",
                    "value": "refs/heads/master",
                    "parameter": {"source": "payload", "name": "ref"}
                }
            },
            "unknown-field": "ignored"
        }
        "#;

        let hook: Hook = serde_json::from_str(raw).unwrap();
        assert_eq!(hook.id, "deploy");
        assert_eq!(hook.execute_command, "/usr/bin/deploy.sh");
        assert!(hook.capture_command_output);
        assert_eq!(hook.http_methods, vec!["POST"]);
        assert_eq!(hook.timeout, Duration::from_secs(3));
        assert_eq!(hook.pass_arguments_to_command.len(), 1);
        assert!(hook.trigger_rule.is_some());
    }

    #[test]
    fn test_hook_roundtrip() {
        let raw = r#"{"id": "x", "execute-command": "run", "timeout": 5}"#;
        let hook: Hook = serde_json::from_str(raw).unwrap();
        let encoded = serde_json::to_string(&hook).unwrap();
        let again: Hook = serde_json::from_str(&encoded).unwrap();
        assert_eq!(again.id, hook.id);
        assert_eq!(again.execute_command, hook.execute_command);
        assert_eq!(again.timeout, hook.timeout);
    }

    #[test]
    fn test_parse_json_parameters_payload() {
        let hook = Hook {
            json_string_parameters: vec![Argument::new(SOURCE_PAYLOAD, "inline")],
            ..Default::default()
        };

        let mut req = request();
        hook.parse_json_parameters(&mut req).unwrap();

        let payload = req.payload.as_ref().unwrap();
        assert_eq!(payload["inline"]["count"], json!(3));
    }

    #[test]
    fn test_parse_json_parameters_header() {
        let hook = Hook {
            json_string_parameters: vec![Argument::new(SOURCE_HEADER, "x-meta")],
            ..Default::default()
        };

        let mut req = request();
        hook.parse_json_parameters(&mut req).unwrap();

        assert_eq!(req.headers["X-Meta"]["env"], json!("prod"));
    }

    #[test]
    fn test_parse_json_parameters_collects_failures() {
        let hook = Hook {
            json_string_parameters: vec![
                Argument::new(SOURCE_PAYLOAD, "missing"),
                Argument::new(SOURCE_STRING, "{\"a\":1}"),
                Argument::new(SOURCE_PAYLOAD, "inline"),
            ],
            ..Default::default()
        };

        let mut req = request();
        let errors = hook.parse_json_parameters(&mut req).unwrap_err();
        // Missing parameter plus invalid substitution target for "string".
        assert_eq!(errors.len(), 2);
        // The valid sibling was still applied.
        assert_eq!(req.payload.as_ref().unwrap()["inline"]["count"], json!(3));
    }

    #[test]
    fn test_extract_command_arguments() {
        let hook = Hook {
            execute_command: "deploy.sh".to_string(),
            pass_arguments_to_command: vec![
                Argument::new(SOURCE_PAYLOAD, "head_commit.id"),
                Argument::new(SOURCE_PAYLOAD, "missing"),
            ],
            ..Default::default()
        };

        let req = request();
        let (args, errors) = hook.extract_command_arguments(&req);
        assert_eq!(args, vec!["deploy.sh", "abc", ""]);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_extract_env_prefixes_and_skips() {
        let hook = Hook {
            pass_environment_to_command: vec![
                Argument::new(SOURCE_PAYLOAD, "head_commit.id"),
                Argument {
                    env_name: "COMMIT".to_string(),
                    ..Argument::new(SOURCE_PAYLOAD, "head_commit.id")
                },
                Argument::new(SOURCE_PAYLOAD, "missing"),
            ],
            ..Default::default()
        };

        let req = request();
        let (env, errors) = hook.extract_command_arguments_for_env(&req);
        assert_eq!(
            env,
            vec![
                ("HOOK_head_commit.id".to_string(), "abc".to_string()),
                ("COMMIT".to_string(), "abc".to_string()),
            ]
        );
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_extract_file_parameters() {
        use base64::Engine;

        let encoded = base64::engine::general_purpose::STANDARD.encode(b"file contents");
        let mut req = request();
        req.payload = Some(json!({"blob": encoded, "plain": "text"}));

        let hook = Hook {
            pass_file_to_command: vec![
                Argument {
                    base64_decode: true,
                    ..Argument::new(SOURCE_PAYLOAD, "blob")
                },
                Argument::new(SOURCE_PAYLOAD, "plain"),
            ],
            ..Default::default()
        };

        let (files, errors) = hook.extract_command_arguments_for_file(&req);
        assert!(errors.is_empty());
        assert_eq!(files[0].env_name, "HOOK_BLOB");
        assert_eq!(files[0].data, b"file contents");
        assert_eq!(files[1].env_name, "HOOK_PLAIN");
        assert_eq!(files[1].data, b"text");
    }

    #[test]
    fn test_file_parameter_bad_base64_yields_empty() {
        let mut req = request();
        req.payload = Some(json!({"blob": "not base64 at all!!!"}));

        let hook = Hook {
            pass_file_to_command: vec![Argument {
                base64_decode: true,
                ..Argument::new(SOURCE_PAYLOAD, "blob")
            }],
            ..Default::default()
        };

        let (files, errors) = hook.extract_command_arguments_for_file(&req);
        assert!(errors.is_empty());
        assert!(files[0].data.is_empty());
    }
}
