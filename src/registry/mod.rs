//! Hook registry: load, look up and hot-reload hook definitions.
//!
//! The registry maps each configured file to the ordered sequence of hooks
//! parsed from it. Hook IDs must be unique across all files. Reloads are
//! atomic per file: a lookup observes either the whole pre-reload sequence
//! or the whole post-reload sequence, and in-flight requests keep the
//! `Arc<Hook>` snapshot they resolved.

pub mod loader;
pub mod watcher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::hook::Hook;
pub use loader::LoaderError;

/// Capacity of the reload-notification channel.
const NOTIFY_CHANNEL_CAPACITY: usize = 5;

struct RegistryState {
    /// Files in configuration order; lookups scan in this order.
    files: Vec<PathBuf>,
    hooks_by_file: HashMap<PathBuf, Vec<Arc<Hook>>>,
}

/// The registry of loaded hooks.
///
/// Request handlers call [`HookRegistry::get`] concurrently; all mutation
/// happens on the watcher task, which is the sole writer.
pub struct HookRegistry {
    state: RwLock<RegistryState>,
    as_template: bool,
    notify_tx: mpsc::Sender<()>,
}

impl HookRegistry {
    /// Create a registry for the given files. Returns the receiving half
    /// of the reload-notification channel for the watcher task.
    pub fn new(files: Vec<PathBuf>, as_template: bool) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_CHANNEL_CAPACITY);

        let registry = Arc::new(Self {
            state: RwLock::new(RegistryState {
                files,
                hooks_by_file: HashMap::new(),
            }),
            as_template,
            notify_tx,
        });

        (registry, notify_rx)
    }

    /// Load all configured files. Failures abort only the affected file;
    /// duplicate IDs across files are reported but the offending file is
    /// still retained (lookups return the first occurrence).
    ///
    /// Returns the collected error messages.
    pub fn load(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut state = self.state.write().expect("registry lock poisoned");

        let files = state.files.clone();
        for path in &files {
            info!(path = %path.display(), "attempting to load hooks");

            match loader::load_from_file(path, self.as_template) {
                Err(err) => {
                    error!(error = %err, "error loading hooks from file");
                    errors.push(err.to_string());
                }
                Ok(hooks) => {
                    info!(path = %path.display(), loaded = hooks.len(), "loaded hook(s) from file");

                    for hook in &hooks {
                        if lookup(&state, &hook.id).is_some() {
                            error!(hook_id = %hook.id,
                                "hook has already been loaded! please check your hooks files for duplicate hook ids!");
                            errors.push(format!(
                                "hook id={} has already been loaded, check your hooks files for duplicate hook ids",
                                hook.id
                            ));
                            continue;
                        }
                        info!(hook_id = %hook.id, "hook loaded");
                    }

                    state
                        .hooks_by_file
                        .insert(path.clone(), hooks.into_iter().map(Arc::new).collect());
                }
            }
        }

        // Keep only the files that actually loaded.
        let state = &mut *state;
        state.files.retain(|p| state.hooks_by_file.contains_key(p));

        errors
    }

    /// Look up a hook by ID, scanning files in configuration order. The
    /// returned snapshot stays valid across reloads.
    pub fn get(&self, id: &str) -> Option<Arc<Hook>> {
        let state = self.state.read().expect("registry lock poisoned");
        lookup(&state, id)
    }

    /// Total number of loaded hooks.
    pub fn len(&self) -> usize {
        let state = self.state.read().expect("registry lock poisoned");
        state.hooks_by_file.values().map(|h| h.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The files currently tracked, in configuration order.
    pub fn files(&self) -> Vec<PathBuf> {
        let state = self.state.read().expect("registry lock poisoned");
        state.files.clone()
    }

    /// Enqueue a "reload all files" request. Non-blocking; dropped when
    /// the channel is already full of pending reloads.
    pub fn notify(&self) {
        if self.notify_tx.try_send(()).is_err() {
            warn!("reload notification dropped, reloads already queued");
        }
    }

    /// Reload a single file, replacing its hook sequence atomically.
    ///
    /// The reload is rejected (keeping the previous sequence) when the new
    /// contents fail to parse, collide with an ID loaded from a different
    /// file, or contain internal duplicates.
    pub fn reload_file(&self, path: &Path) {
        info!(path = %path.display(), "attempting to reload hooks from file");

        let hooks = match loader::load_from_file(path, self.as_template) {
            Ok(hooks) => hooks,
            Err(err) => {
                error!(error = %err, path = %path.display(), "error loading hooks from file");
                return;
            }
        };

        let mut state = self.state.write().expect("registry lock poisoned");

        info!(path = %path.display(), loaded = hooks.len(), "found hook(s) in file");

        let mut seen = std::collections::HashSet::new();
        for hook in &hooks {
            let was_here_before = state
                .hooks_by_file
                .get(path)
                .map(|previous| previous.iter().any(|h| h.id == hook.id))
                .unwrap_or(false);

            let loaded_elsewhere = lookup(&state, &hook.id).is_some() && !was_here_before;

            if loaded_elsewhere || !seen.insert(hook.id.clone()) {
                error!(hook_id = %hook.id,
                    "hook has already been loaded! please check your hooks files for duplicate hook ids!");
                warn!("reverting hooks back to the previous configuration");
                return;
            }

            info!(hook_id = %hook.id, "hook loaded");
        }

        state
            .hooks_by_file
            .insert(path.to_path_buf(), hooks.into_iter().map(Arc::new).collect());
        if !state.files.iter().any(|p| p == path) {
            state.files.push(path.to_path_buf());
        }
    }

    /// Reload every tracked file.
    pub fn reload_all(&self) {
        for path in self.files() {
            self.reload_file(&path);
        }
    }

    /// Drop a file's hooks, e.g. after the file was removed from disk.
    pub fn remove_file(&self, path: &Path) {
        let mut state = self.state.write().expect("registry lock poisoned");

        if let Some(removed) = state.hooks_by_file.remove(path) {
            for hook in &removed {
                info!(hook_id = %hook.id, "removing hook");
            }
            info!(count = removed.len(), file_source = %path.display(), "removed hooks");
        }

        state.files.retain(|p| p != path);
    }
}

fn lookup(state: &RegistryState, id: &str) -> Option<Arc<Hook>> {
    for path in &state.files {
        if let Some(hooks) = state.hooks_by_file.get(path) {
            if let Some(hook) = hooks.iter().find(|h| h.id == id) {
                return Some(hook.clone());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_hooks_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn overwrite(file: &tempfile::NamedTempFile, contents: &str) {
        std::fs::write(file.path(), contents).unwrap();
    }

    #[test]
    fn test_load_and_get() {
        let file = temp_hooks_file(r#"[{"id": "a"}, {"id": "b"}]"#);
        let (registry, _rx) = HookRegistry::new(vec![file.path().to_path_buf()], false);

        assert!(registry.load().is_empty());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("a").unwrap().id, "a");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_across_files_reported_first_wins() {
        let file_a = temp_hooks_file(r#"[{"id": "x", "execute-command": "from-a"}]"#);
        let file_b = temp_hooks_file(r#"[{"id": "x", "execute-command": "from-b"}]"#);

        let (registry, _rx) = HookRegistry::new(
            vec![file_a.path().to_path_buf(), file_b.path().to_path_buf()],
            false,
        );

        let errors = registry.load();
        assert_eq!(errors.len(), 1);
        // The first occurrence in file order is the reachable one.
        assert_eq!(registry.get("x").unwrap().execute_command, "from-a");
    }

    #[test]
    fn test_reload_replaces_sequence() {
        let file = temp_hooks_file(r#"[{"id": "a", "execute-command": "v1"}]"#);
        let (registry, _rx) = HookRegistry::new(vec![file.path().to_path_buf()], false);
        registry.load();

        let before = registry.get("a").unwrap();
        assert_eq!(before.execute_command, "v1");

        overwrite(&file, r#"[{"id": "a", "execute-command": "v2"}]"#);
        registry.reload_file(file.path());

        assert_eq!(registry.get("a").unwrap().execute_command, "v2");
        // The old snapshot is unaffected.
        assert_eq!(before.execute_command, "v1");
    }

    #[test]
    fn test_reload_with_cross_file_duplicate_rejected() {
        let file_a = temp_hooks_file(r#"[{"id": "x", "execute-command": "from-a"}]"#);
        let file_b = temp_hooks_file(r#"[{"id": "y", "execute-command": "old-b"}]"#);

        let (registry, _rx) = HookRegistry::new(
            vec![file_a.path().to_path_buf(), file_b.path().to_path_buf()],
            false,
        );
        assert!(registry.load().is_empty());

        // File B now also defines "x": the reload must be rejected and the
        // prior sequence of B retained.
        overwrite(&file_b, r#"[{"id": "x", "execute-command": "from-b"}]"#);
        registry.reload_file(file_b.path());

        assert_eq!(registry.get("x").unwrap().execute_command, "from-a");
        assert_eq!(registry.get("y").unwrap().execute_command, "old-b");
    }

    #[test]
    fn test_reload_with_internal_duplicate_rejected() {
        let file = temp_hooks_file(r#"[{"id": "a", "execute-command": "v1"}]"#);
        let (registry, _rx) = HookRegistry::new(vec![file.path().to_path_buf()], false);
        registry.load();

        overwrite(&file, r#"[{"id": "b"}, {"id": "b"}]"#);
        registry.reload_file(file.path());

        assert!(registry.get("b").is_none());
        assert_eq!(registry.get("a").unwrap().execute_command, "v1");
    }

    #[test]
    fn test_reload_keeps_previous_on_parse_error() {
        let file = temp_hooks_file(r#"[{"id": "a"}]"#);
        let (registry, _rx) = HookRegistry::new(vec![file.path().to_path_buf()], false);
        registry.load();

        overwrite(&file, "{broken yaml: [");
        registry.reload_file(file.path());

        assert!(registry.get("a").is_some());
    }

    #[test]
    fn test_remove_file() {
        let file = temp_hooks_file(r#"[{"id": "a"}]"#);
        let (registry, _rx) = HookRegistry::new(vec![file.path().to_path_buf()], false);
        registry.load();

        registry.remove_file(file.path());
        assert!(registry.get("a").is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_same_file_reload_keeps_own_ids() {
        let file = temp_hooks_file(r#"[{"id": "a", "execute-command": "v1"}]"#);
        let (registry, _rx) = HookRegistry::new(vec![file.path().to_path_buf()], false);
        registry.load();

        // Redefining its own IDs is not a conflict.
        overwrite(&file, r#"[{"id": "a", "execute-command": "v2"}, {"id": "extra"}]"#);
        registry.reload_file(file.path());

        assert_eq!(registry.get("a").unwrap().execute_command, "v2");
        assert!(registry.get("extra").is_some());
    }
}
