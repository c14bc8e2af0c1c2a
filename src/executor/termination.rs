//! Platform-specific process-group termination.
//!
//! Timeout enforcement needs to reach the whole process tree a hook
//! command may have spawned, so the child is placed in its own process
//! group and signals target the group. Where group signaling fails the
//! single PID is killed instead.

use tracing::error;

/// Termination severity: a polite stop or a forced kill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Term,
    Kill,
}

/// Place the child in its own process group so `kill_group` can reach its
/// descendants. No-op on platforms without process groups.
pub fn spawn_in_new_group(cmd: &mut tokio::process::Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

/// Send a terminate/kill signal to the process group led by `pid`,
/// falling back to the single process when no group exists.
#[cfg(unix)]
pub fn kill_group(pid: u32, severity: Severity) {
    let signal = match severity {
        Severity::Term => libc::SIGTERM,
        Severity::Kill => libc::SIGKILL,
    };

    let pid = pid as i32;
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        error!(pid, signal, error = %err, "error signaling process group, falling back to single process");
        if unsafe { libc::kill(pid, signal) } != 0 {
            let err = std::io::Error::last_os_error();
            error!(pid, signal, error = %err, "error signaling process");
        }
    }
}

/// Windows has no process groups: terminate via `taskkill`, forcing the
/// whole tree on kill.
#[cfg(windows)]
pub fn kill_group(pid: u32, severity: Severity) {
    let mut cmd = std::process::Command::new("taskkill");
    match severity {
        Severity::Term => cmd.args(["/PID", &pid.to_string()]),
        Severity::Kill => cmd.args(["/T", "/F", "/PID", &pid.to_string()]),
    };

    if let Err(err) = cmd.status() {
        error!(pid, error = %err, "error running taskkill");
    }
}
