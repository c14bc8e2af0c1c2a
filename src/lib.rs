//! hookd - HTTP-triggered command executor.
//!
//! This crate provides an async HTTP daemon that matches inbound requests
//! against named hook definitions, validates them with a declarative rule
//! tree (value/regex matches, HMAC signatures, IP whitelists, boolean
//! composition), extracts parameters from request parts, and runs an
//! external command with those parameters mapped into argv, environment
//! variables, or temporary files.
//!
//! # Features
//!
//! - **Async I/O**: Built on Tokio for high-performance async networking
//! - **Declarative Trigger Rules**: and/or/not trees over request predicates
//! - **Hot Reload**: Hook files are watched and reloaded atomically
//! - **Response Modes**: Buffered, streamed (chunked) or fire-and-forget
//! - **Structured Logging**: Unified JSON logging with tracing
//!
//! # Example
//!
//! ```rust,ignore
//! use hookd::config::Config;
//! use hookd::registry::HookRegistry;
//! use hookd::server::{RequestPipeline, Server};
//!
//! let config = Config::from_env()?;
//! let (registry, reload_rx) = HookRegistry::new(config.hooks.files.clone(), false);
//! registry.load();
//! let pipeline = Arc::new(RequestPipeline::new(registry, &config.server));
//! let server = Server::bind(config.server.listen_addr, pipeline, shutdown_rx).await?;
//! server.run().await?;
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod config;
pub mod core;
pub mod executor;
pub mod hook;
pub mod logging;
pub mod payload;
pub mod registry;
pub mod server;
pub mod signals;

// Re-exports for convenience
pub use config::Config;
pub use registry::HookRegistry;
pub use server::Server;
