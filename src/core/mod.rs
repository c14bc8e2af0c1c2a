//! Core request model shared by the parsers, rule engine and executor.

pub mod request;

pub use request::{canonical_mime_header_key, HookRequest};
