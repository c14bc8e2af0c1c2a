//! Hook registry configuration.

use std::path::PathBuf;

use super::parse::{env_bool, env_or};
use super::ConfigError;

/// Hook file configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct HooksConfig {
    /// Hook definition files (HOOKS_FILES, comma-separated).
    pub files: Vec<PathBuf>,
    /// Render hook files as templates with `getenv` before parsing
    /// (HOOKS_AS_TEMPLATE).
    pub as_template: bool,
    /// Watch hook files and reload them on change (HOT_RELOAD).
    pub hot_reload: bool,
    /// Start even when no hooks could be loaded (ALLOW_EMPTY_REGISTRY).
    pub allow_empty_registry: bool,
}

impl HooksConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let files = env_or("HOOKS_FILES", "hooks.json")
            .split(',')
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();

        Ok(Self {
            files,
            as_template: env_bool("HOOKS_AS_TEMPLATE", false),
            hot_reload: env_bool("HOT_RELOAD", false),
            allow_empty_registry: env_bool("ALLOW_EMPTY_REGISTRY", false),
        })
    }
}
