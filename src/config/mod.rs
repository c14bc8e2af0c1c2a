//! Configuration module for hookd.
//!
//! This module provides centralized configuration loading from environment
//! variables.
//!
//! # Example
//!
//! ```rust,ignore
//! use hookd::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Listen address: {}", config.server.listen_addr);
//! println!("Hook files: {:?}", config.hooks.files);
//! ```

mod error;
mod hooks;
mod logging;
pub mod parse;
mod server;

pub use error::ConfigError;
pub use hooks::HooksConfig;
pub use logging::LoggingConfig;
pub use server::{parse_method_list, ServerConfig};

/// Complete application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Hook registry configuration.
    pub hooks: HooksConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            hooks: HooksConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Configuration loaded:");
        info!("Listen: {}", self.server.listen_addr);
        info!("URL prefix: /{}", self.server.url_prefix);
        info!("Hook files: {:?}", self.hooks.files);

        if self.hooks.as_template {
            info!("Template rendering: enabled");
        }

        if self.hooks.hot_reload {
            info!("Hot reload: enabled");
        }

        if !self.server.default_http_methods.is_empty() {
            info!(
                "Default allowed methods: {}",
                self.server.default_http_methods.join(", ")
            );
        }

        if !self.server.response_headers.is_empty() {
            info!(
                "Default response headers: {}",
                self.server
                    .response_headers
                    .iter()
                    .map(|(n, v)| format!("{}={}", n, v))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
}
