//! OS signal wiring.
//!
//! SIGUSR1 and SIGHUP enqueue a registry reload; SIGINT and SIGTERM start
//! graceful shutdown. Windows only gets Ctrl-C for shutdown.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::registry::HookRegistry;

/// Spawn the signal watcher task.
#[cfg(unix)]
pub fn setup(registry: Arc<HookRegistry>, shutdown_tx: watch::Sender<bool>) {
    use tokio::signal::unix::{signal, SignalKind};

    info!("setting up os signal watcher");

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(err) => {
                warn!(error = %err, "error installing SIGHUP handler");
                return;
            }
        };
        let mut user_defined1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(err) => {
                warn!(error = %err, "error installing SIGUSR1 handler");
                return;
            }
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(err) => {
                warn!(error = %err, "error installing SIGTERM handler");
                return;
            }
        };
        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(err) => {
                warn!(error = %err, "error installing SIGINT handler");
                return;
            }
        };

        info!("os signal watcher ready");

        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    warn!(signal = "SIGHUP", "caught signal, reloading hooks");
                    registry.notify();
                }
                _ = user_defined1.recv() => {
                    warn!(signal = "SIGUSR1", "caught signal, reloading hooks");
                    registry.notify();
                }
                _ = terminate.recv() => {
                    warn!(signal = "SIGTERM", "caught signal, exiting");
                    let _ = shutdown_tx.send(true);
                    return;
                }
                _ = interrupt.recv() => {
                    warn!(signal = "SIGINT", "caught signal, exiting");
                    let _ = shutdown_tx.send(true);
                    return;
                }
            }
        }
    });
}

/// Spawn the signal watcher task.
#[cfg(not(unix))]
pub fn setup(_registry: Arc<HookRegistry>, shutdown_tx: watch::Sender<bool>) {
    info!("setting up os signal watcher");

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(signal = "Ctrl-C", "caught signal, exiting");
            let _ = shutdown_tx.send(true);
        }
    });
}
