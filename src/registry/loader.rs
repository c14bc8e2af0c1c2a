//! Hook file loading.
//!
//! Hook files are JSON or YAML arrays of hook records (YAML being a JSON
//! superset, one parser covers both). Files flagged as templates get a
//! `getenv` substitution pass before deserialization.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::hook::Hook;

/// Error type for hook file loading.
#[derive(Debug)]
pub enum LoaderError {
    /// Failed to read the file.
    Io {
        path: String,
        error: std::io::Error,
    },
    /// Failed to deserialize the file contents.
    Parse { path: String, error: String },
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::Io { path, error } => {
                write!(f, "error reading hooks file [{}]: {}", path, error)
            }
            LoaderError::Parse { path, error } => {
                write!(f, "error parsing hooks file [{}]: {}", path, error)
            }
        }
    }
}

impl std::error::Error for LoaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoaderError::Io { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Load hooks from a file. An empty path is a no-op yielding no hooks.
pub fn load_from_file(path: &Path, as_template: bool) -> Result<Vec<Hook>, LoaderError> {
    if path.as_os_str().is_empty() {
        return Ok(Vec::new());
    }

    let mut contents = std::fs::read_to_string(path).map_err(|error| LoaderError::Io {
        path: path.display().to_string(),
        error,
    })?;

    if as_template {
        contents = render_template(&contents);
    }

    serde_yaml::from_str(&contents).map_err(|e| LoaderError::Parse {
        path: path.display().to_string(),
        error: e.to_string(),
    })
}

/// Render `{{ getenv "NAME" }}` references against the process environment.
/// Unset variables render as the empty string.
fn render_template(input: &str) -> String {
    static GETENV: OnceLock<Regex> = OnceLock::new();
    let re = GETENV
        .get_or_init(|| Regex::new(r#"\{\{\s*getenv\s+"([^"]*)"\s*\}\}"#).expect("valid regex"));

    re.replace_all(input, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_json() {
        let file = write_temp(r#"[{"id": "deploy", "execute-command": "run.sh"}]"#);
        let hooks = load_from_file(file.path(), false).unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].id, "deploy");
    }

    #[test]
    fn test_load_yaml() {
        let file = write_temp(
            "- id: deploy\n  execute-command: run.sh\n  trigger-rule:\n    match:\n      type: value\n      value: main\n      parameter:\n        source: payload\n        name: ref\n",
        );
        let hooks = load_from_file(file.path(), false).unwrap();
        assert_eq!(hooks.len(), 1);
        assert!(hooks[0].trigger_rule.is_some());
    }

    #[test]
    fn test_load_template() {
        std::env::set_var("XXXTEST_SECRET", "foo123");
        let file = write_temp(
            r#"[{"id": "webhook", "trigger-rule": {"match": {"type": "payload-hmac-sha1", "secret": "{{ getenv "XXXTEST_SECRET" }}"}}}]"#,
        );

        let hooks = load_from_file(file.path(), true).unwrap();
        let rule = hooks[0].trigger_rule.as_ref().unwrap();
        assert_eq!(rule.match_rule.as_ref().unwrap().secret, "foo123");
    }

    #[test]
    fn test_empty_path_is_noop() {
        assert!(load_from_file(Path::new(""), false).unwrap().is_empty());
    }

    #[test]
    fn test_missing_file() {
        assert!(load_from_file(Path::new("definitely-missing.json"), false).is_err());
    }

    #[test]
    fn test_malformed_file() {
        let file = write_temp("{not: [valid");
        assert!(load_from_file(file.path(), false).is_err());
    }
}
