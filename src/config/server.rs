//! Server configuration.

use std::net::SocketAddr;

use super::parse::{env_opt, env_or};
use super::ConfigError;

// Default values as constants
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9000";
const DEFAULT_URL_PREFIX: &str = "hooks";
const DEFAULT_MULTIPART_MAX_MEMORY: u64 = 1 << 20; // 1 MiB

/// Server configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen address (LISTEN_ADDR).
    pub listen_addr: SocketAddr,
    /// URL prefix for hook dispatch: `/<prefix>/<hook-id>` (URL_PREFIX).
    pub url_prefix: String,
    /// Default allowed HTTP methods when a hook does not restrict them
    /// (DEFAULT_HTTP_METHODS, comma-separated). Empty allows any method.
    pub default_http_methods: Vec<String>,
    /// Default response headers written on every response
    /// (RESPONSE_HEADERS, comma-separated name=value pairs).
    pub response_headers: Vec<(String, String)>,
    /// Maximum in-memory size for multipart bodies (MULTIPART_MAX_MEMORY).
    pub multipart_max_memory: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let addr_raw = env_or("LISTEN_ADDR", DEFAULT_LISTEN_ADDR);
        let listen_addr = addr_raw.parse().map_err(|e| ConfigError::Parse {
            key: "LISTEN_ADDR".to_string(),
            value: addr_raw.clone(),
            error: format!("{}", e),
        })?;

        let multipart_max_memory = match env_opt("MULTIPART_MAX_MEMORY") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::Parse {
                key: "MULTIPART_MAX_MEMORY".to_string(),
                value: raw.clone(),
                error: format!("{}", e),
            })?,
            None => DEFAULT_MULTIPART_MAX_MEMORY,
        };

        Ok(Self {
            listen_addr,
            url_prefix: env_or("URL_PREFIX", DEFAULT_URL_PREFIX),
            default_http_methods: parse_method_list(&env_or("DEFAULT_HTTP_METHODS", "")),
            response_headers: parse_header_list(&env_or("RESPONSE_HEADERS", ""))?,
            multipart_max_memory,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.parse().unwrap(),
            url_prefix: DEFAULT_URL_PREFIX.to_string(),
            default_http_methods: Vec::new(),
            response_headers: Vec::new(),
            multipart_max_memory: DEFAULT_MULTIPART_MAX_MEMORY,
        }
    }
}

/// Normalize a comma-separated method list: trimmed, uppercased, empties dropped.
pub fn parse_method_list(methods: &str) -> Vec<String> {
    methods
        .split(',')
        .map(|m| m.trim().to_uppercase())
        .filter(|m| !m.is_empty())
        .collect()
}

/// Parse a comma-separated list of `name=value` header pairs.
fn parse_header_list(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut headers = Vec::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((name, value)) => headers.push((name.to_string(), value.to_string())),
            None => {
                return Err(ConfigError::Invalid {
                    key: "RESPONSE_HEADERS".to_string(),
                    message: format!("header '{}' must be in name=value format", pair),
                })
            }
        }
    }
    Ok(headers)
}
