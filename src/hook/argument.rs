//! Parameter descriptors: where to pull a value from and under which name.

use serde::{Deserialize, Serialize};

use super::error::HookError;
use super::parameter::{extract_from_map, extract_parameter_as_string};
use crate::core::request::{canonical_mime_header_key, HookRequest};

// Parameter sources recognized in hook definitions.
pub const SOURCE_HEADER: &str = "header";
pub const SOURCE_QUERY: &str = "url";
pub const SOURCE_QUERY_ALIAS: &str = "query";
pub const SOURCE_PAYLOAD: &str = "payload";
pub const SOURCE_RAW_REQUEST_BODY: &str = "raw-request-body";
pub const SOURCE_REQUEST: &str = "request";
pub const SOURCE_STRING: &str = "string";
pub const SOURCE_ENTIRE_PAYLOAD: &str = "entire-payload";
pub const SOURCE_ENTIRE_QUERY: &str = "entire-query";
pub const SOURCE_ENTIRE_HEADERS: &str = "entire-headers";

/// A parameter descriptor: the source it is drawn from, the key or literal
/// within that source, and optional flags for environment naming and
/// base64 decoding of file contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Argument {
    pub source: String,
    pub name: String,
    #[serde(rename = "envname")]
    pub env_name: String,
    #[serde(rename = "base64decode")]
    pub base64_decode: bool,
}

impl Argument {
    /// Construct an argument with just a source and a name.
    pub fn new(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Resolve the argument's value against the request, wrapping any
    /// failure with the argument for context.
    pub fn get(&self, req: &HookRequest) -> Result<String, HookError> {
        self.resolve(req).map_err(|e| HookError::Argument {
            argument: self.clone(),
            cause: Box::new(e),
        })
    }

    fn resolve(&self, req: &HookRequest) -> Result<String, HookError> {
        match self.source.as_str() {
            SOURCE_HEADER => {
                extract_from_map(&canonical_mime_header_key(&self.name), &req.headers)
            }

            SOURCE_QUERY | SOURCE_QUERY_ALIAS => extract_from_map(&self.name, &req.query),

            SOURCE_PAYLOAD => match &req.payload {
                Some(payload) => extract_parameter_as_string(&self.name, payload),
                None => Err(HookError::parameter_node(&self.name)),
            },

            SOURCE_STRING => Ok(self.name.clone()),

            SOURCE_RAW_REQUEST_BODY => {
                Ok(String::from_utf8_lossy(&req.body).into_owned())
            }

            SOURCE_REQUEST => match self.name.to_lowercase().as_str() {
                "remote-addr" => Ok(req.remote_addr.clone()),
                "method" => Ok(req.method.clone()),
                _ => Err(HookError::other(format!(
                    "unsupported request key: {:?}",
                    self.name
                ))),
            },

            SOURCE_ENTIRE_PAYLOAD => serde_json::to_string(&req.payload)
                .map_err(|e| HookError::other(format!("JSON encode failed: {}", e))),

            SOURCE_ENTIRE_HEADERS => serde_json::to_string(&req.headers)
                .map_err(|e| HookError::other(format!("JSON encode failed: {}", e))),

            SOURCE_ENTIRE_QUERY => serde_json::to_string(&req.query)
                .map_err(|e| HookError::other(format!("JSON encode failed: {}", e))),

            _ => Err(HookError::other("no source for value retrieval")),
        }
    }
}
