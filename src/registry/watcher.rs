//! Filesystem watcher driving hot reload.
//!
//! One long-lived task owns all registry mutation: it drains the bounded
//! reload-notification channel (fed by signals) and, when hot reload is
//! enabled, reacts to filesystem events on the hook files.
//!
//! Event semantics follow the hook-file lifecycle: a write reloads the
//! file; a remove drops its hooks once the path is really gone; a rename
//! waits 100 ms before deciding whether the file was removed or written
//! back into place, because editors that save via rename-into-place
//! briefly make the path disappear.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use super::HookRegistry;

/// Debounce window before reclassifying a rename as remove-vs-replace.
const RENAME_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Run the registry maintenance task until shutdown.
///
/// `reload_rx` is the receiving half of the registry's notification
/// channel; `hot_reload` controls whether filesystem watching is set up.
pub async fn run(
    registry: Arc<HookRegistry>,
    mut reload_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
    hot_reload: bool,
) {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut watcher = if hot_reload {
        match start_watcher(&registry, event_tx) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                error!(error = %err, "error creating file watcher instance");
                None
            }
        }
    } else {
        None
    };

    let mut events_open = true;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }

            notification = reload_rx.recv() => {
                match notification {
                    Some(()) => registry.reload_all(),
                    None => return,
                }
            }

            event = event_rx.recv(), if events_open => {
                match event {
                    Some(Ok(event)) => {
                        if let Some(watcher) = watcher.as_mut() {
                            handle_event(&registry, watcher, event).await;
                        }
                    }
                    Some(Err(err)) => error!(error = %err, "watcher error"),
                    // Watcher gone; keep draining reload notifications.
                    None => events_open = false,
                }
            }
        }
    }
}

fn start_watcher(
    registry: &HookRegistry,
    event_tx: mpsc::UnboundedSender<Result<notify::Event, notify::Error>>,
) -> Result<RecommendedWatcher, notify::Error> {
    let mut watcher = notify::recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;

    for path in registry.files() {
        info!(file = %path.display(), "setting up watcher");
        watcher.watch(&path, RecursiveMode::NonRecursive)?;
    }

    Ok(watcher)
}

async fn handle_event(registry: &HookRegistry, watcher: &mut RecommendedWatcher, event: notify::Event) {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(_)) => {
            for path in &event.paths {
                handle_rename(registry, watcher, path).await;
            }
        }

        EventKind::Modify(_) | EventKind::Create(_) => {
            for path in &event.paths {
                info!(file = %path.display(), "hooks file modified");
                registry.reload_file(path);
            }
        }

        EventKind::Remove(_) => {
            for path in &event.paths {
                if !path.exists() {
                    info!(file = %path.display(),
                        "hooks file removed, no longer watching this file for changes, removing hooks that were loaded from it");
                    let _ = watcher.unwatch(path);
                    registry.remove_file(path);
                }
            }
        }

        _ => {}
    }
}

async fn handle_rename(registry: &HookRegistry, watcher: &mut RecommendedWatcher, path: &Path) {
    tokio::time::sleep(RENAME_SETTLE_DELAY).await;

    if !path.exists() {
        info!(file = %path.display(),
            "hooks file removed, no longer watching this file for changes, removing hooks that were loaded from it");
        let _ = watcher.unwatch(path);
        registry.remove_file(path);
        return;
    }

    info!(file = %path.display(), "hooks file overwritten, reloading hooks");
    registry.reload_file(path);
    // Rename-into-place replaces the inode; re-arm the watch.
    let _ = watcher.unwatch(path);
    let _ = watcher.watch(path, RecursiveMode::NonRecursive);
}
