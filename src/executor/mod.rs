//! Command execution for triggered hooks.
//!
//! The executor resolves the hook's command, builds argv and environment
//! from the parameter mappings, materializes file-valued parameters as
//! temporary files, and runs the command with merged stdout/stderr
//! forwarded to the caller as stream chunks. A hook timeout is enforced by
//! signaling the child's process group: SIGTERM at the deadline, SIGKILL
//! ten seconds later.

pub mod termination;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::request::HookRequest;
use crate::hook::{FileParameter, Hook};
use crate::server::streaming::{StreamChunk, DEFAULT_STREAM_BUFFER_SIZE};
use termination::{kill_group, spawn_in_new_group, Severity};

/// Grace period between SIGTERM and SIGKILL on timeout.
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Error type for command execution.
#[derive(Debug, Clone)]
pub struct ExecutionError {
    pub message: String,
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExecutionError {}

impl From<String> for ExecutionError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ExecutionError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Executes a hook's command against a resolved request.
pub struct CommandExecutor {
    hook: Arc<Hook>,
}

impl CommandExecutor {
    pub fn new(hook: Arc<Hook>) -> Self {
        Self { hook }
    }

    /// Run the command, forwarding merged stdout/stderr chunks to `tx` as
    /// they arrive. Returns once the process has exited and all temp files
    /// are removed.
    pub async fn execute(
        &self,
        req: &HookRequest,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<(), ExecutionError> {
        let cmd_path = self.check_command_exists()?;

        let (args, errors) = self.hook.extract_command_arguments(req);
        if !errors.is_empty() {
            error!(request_id = %req.id, error = %errors, "error extracting command arguments");
        }

        let (mut env, errors) = self.hook.extract_command_arguments_for_env(req);
        if !errors.is_empty() {
            error!(request_id = %req.id, error = %errors,
                "error extracting command arguments for environment");
        }

        let (mut files, errors) = self.hook.extract_command_arguments_for_file(req);
        if !errors.is_empty() {
            error!(request_id = %req.id, error = %errors,
                "error extracting command arguments for file");
        }

        for file in &mut files {
            match materialize(file, &self.hook.command_working_directory) {
                Ok(path) => {
                    info!(request_id = %req.id, var = %file.env_name, file_name = %path,
                        "writing file argument contents to file");
                    env.push((file.env_name.clone(), path));
                }
                Err(err) => {
                    error!(request_id = %req.id, var = %file.env_name, error = %err,
                        "error creating temp file");
                }
            }
        }

        let result = self.spawn_and_wait(req, &cmd_path, &args, &env, tx).await;

        cleanup_files(files);

        result
    }

    /// Run the command with output collected into a buffer.
    pub async fn execute_buffered(
        &self,
        req: &HookRequest,
    ) -> (Vec<u8>, Result<(), ExecutionError>) {
        let (tx, mut rx) = mpsc::channel::<StreamChunk>(DEFAULT_STREAM_BUFFER_SIZE);

        let collect = async {
            let mut buf = Vec::new();
            while let Some(chunk) = rx.recv().await {
                buf.extend_from_slice(&chunk.data);
            }
            buf
        };

        let (result, output) = tokio::join!(self.execute(req, tx), collect);

        debug!(request_id = %req.id, output = %String::from_utf8_lossy(&output),
            "command output");

        (output, result)
    }

    async fn spawn_and_wait(
        &self,
        req: &HookRequest,
        cmd_path: &Path,
        args: &[String],
        env: &[(String, String)],
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<(), ExecutionError> {
        let mut command = tokio::process::Command::new(cmd_path);
        command
            .args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if !self.hook.command_working_directory.is_empty() {
            command.current_dir(&self.hook.command_working_directory);
        }

        for (name, value) in env {
            command.env(name, value);
        }

        let timeout = self.hook.timeout;
        if !timeout.is_zero() {
            spawn_in_new_group(&mut command);
        }

        info!(
            request_id = %req.id,
            command = %cmd_path.display(),
            arguments = ?args,
            environment = ?env.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            working_directory = %self.hook.command_working_directory,
            "executing command"
        );

        let mut child = command
            .spawn()
            .map_err(|e| ExecutionError::from(format!("error spawning command: {}", e)))?;

        let stdout = forward_output(child.stdout.take(), tx.clone());
        let stderr = forward_output(child.stderr.take(), tx);

        let status = wait_with_timeout(&mut child, timeout, &req.id).await;

        // Drain remaining output before reporting the exit.
        let _ = stdout.await;
        let _ = stderr.await;

        match status {
            Ok(status) if status.success() => {
                info!(request_id = %req.id, hook_id = %self.hook.id, "finished handling hook");
                Ok(())
            }
            Ok(status) => {
                error!(request_id = %req.id, status = %status, "command failed");
                Err(ExecutionError::from(format!(
                    "command exited with {}",
                    status
                )))
            }
            Err(err) => {
                error!(request_id = %req.id, error = %err, "error waiting for command");
                Err(ExecutionError::from(format!(
                    "error waiting for command: {}",
                    err
                )))
            }
        }
    }

    /// Resolve the command: absolute commands and hooks without a working
    /// directory consult PATH directly; otherwise the command is looked up
    /// relative to the working directory.
    fn check_command_exists(&self) -> Result<PathBuf, ExecutionError> {
        let command = &self.hook.execute_command;

        let lookup = if Path::new(command).is_absolute()
            || self.hook.command_working_directory.is_empty()
        {
            PathBuf::from(command)
        } else {
            Path::new(&self.hook.command_working_directory).join(command)
        };

        match which::which(&lookup) {
            Ok(path) => Ok(path),
            Err(err) => {
                error!(error = %err, command = %command, "error looking up command");
                if command.contains(' ') {
                    let name = command.split_whitespace().next().unwrap_or(command);
                    warn!(
                        "use 'pass-arguments-to-command' to specify args for '{}'",
                        name
                    );
                }
                Err(ExecutionError::from(format!(
                    "error looking up command: {}",
                    err
                )))
            }
        }
    }
}

/// Wait for the child, enforcing the hook timeout with escalating signals
/// aimed at the process group.
async fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
    request_id: &str,
) -> std::io::Result<std::process::ExitStatus> {
    if timeout.is_zero() {
        return child.wait().await;
    }

    let pid = child.id();

    tokio::select! {
        status = child.wait() => status,
        _ = tokio::time::sleep(timeout) => {
            warn!(request_id, timeout_secs = timeout.as_secs(),
                "command timed out, terminating process group");
            if let Some(pid) = pid {
                kill_group(pid, Severity::Term);
            }

            tokio::select! {
                status = child.wait() => status,
                _ = tokio::time::sleep(KILL_GRACE_PERIOD) => {
                    warn!(request_id, "command ignored termination, killing process group");
                    if let Some(pid) = pid {
                        kill_group(pid, Severity::Kill);
                    }
                    child.wait().await
                }
            }
        }
    }
}

/// Forward one output pipe to the chunk channel. Keeps draining to EOF
/// even when the receiver goes away so the child never blocks on a full
/// pipe.
fn forward_output<R>(
    reader: Option<R>,
    tx: mpsc::Sender<StreamChunk>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else { return };

        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let _ = tx.send(StreamChunk::from(&buf[..n])).await;
                }
            }
        }
    })
}

/// Create the temporary file for one file parameter inside the hook's
/// working directory, named after its environment variable.
fn materialize(file: &mut FileParameter, working_directory: &str) -> std::io::Result<String> {
    use std::io::Write;

    let mut builder = tempfile::Builder::new();
    builder.prefix(&file.env_name);

    let tmpfile = if working_directory.is_empty() {
        builder.tempfile()?
    } else {
        builder.tempfile_in(working_directory)?
    };

    tmpfile.as_file().write_all(&file.data)?;
    tmpfile.as_file().sync_all()?;

    let path = tmpfile.path().display().to_string();
    file.file = Some(tmpfile);
    Ok(path)
}

/// Remove every temp file created for this invocation, on all exit paths.
fn cleanup_files(files: Vec<FileParameter>) {
    for parameter in files {
        if let Some(file) = parameter.file {
            info!(file_name = %file.path().display(), "removing file");
            if let Err(err) = file.close() {
                error!(error = %err, "error removing file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::Argument;

    fn request() -> HookRequest {
        HookRequest::new("test-req", "POST", "127.0.0.1:1")
    }

    fn hook_running(command: &str, args: Vec<Argument>) -> CommandExecutor {
        CommandExecutor::new(Arc::new(Hook {
            id: "test".to_string(),
            execute_command: command.to_string(),
            pass_arguments_to_command: args,
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_execute_buffered_captures_output() {
        let executor = hook_running(
            "echo",
            vec![Argument::new("string", "hello from hook")],
        );

        let (output, result) = executor.execute_buffered(&request()).await;
        assert!(result.is_ok());
        assert_eq!(String::from_utf8_lossy(&output).trim(), "hello from hook");
    }

    #[tokio::test]
    async fn test_execute_missing_command() {
        let executor = hook_running("definitely-not-a-command-xyz", vec![]);
        let (_, result) = executor.execute_buffered(&request()).await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let executor = hook_running("false", vec![]);
        let (_, result) = executor.execute_buffered(&request()).await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_terminates_child() {
        let executor = CommandExecutor::new(Arc::new(Hook {
            id: "sleepy".to_string(),
            execute_command: "sleep".to_string(),
            pass_arguments_to_command: vec![Argument::new("string", "30")],
            timeout: Duration::from_millis(300),
            ..Default::default()
        }));

        let start = std::time::Instant::now();
        let (_, result) = executor.execute_buffered(&request()).await;
        assert!(result.is_err());
        // Terminated by the timeout, not by waiting out the sleep.
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_is_merged() {
        let executor = CommandExecutor::new(Arc::new(Hook {
            id: "err".to_string(),
            execute_command: "sh".to_string(),
            pass_arguments_to_command: vec![
                Argument::new("string", "-c"),
                Argument::new("string", "echo out; echo err 1>&2"),
            ],
            ..Default::default()
        }));

        let (output, result) = executor.execute_buffered(&request()).await;
        assert!(result.is_ok());
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("out"));
        assert!(text.contains("err"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_temp_files_removed_after_exit() {
        let dir = tempfile::tempdir().unwrap();

        let executor = CommandExecutor::new(Arc::new(Hook {
            id: "files".to_string(),
            execute_command: "/bin/cat".to_string(),
            command_working_directory: dir.path().display().to_string(),
            pass_file_to_command: vec![Argument {
                env_name: "HOOK_DATA".to_string(),
                ..Argument::new("string", "file contents")
            }],
            ..Default::default()
        }));

        let (_, result) = executor.execute_buffered(&request()).await;
        assert!(result.is_ok());

        // No temp files left behind in the working directory.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_additions_visible_to_command() {
        let executor = CommandExecutor::new(Arc::new(Hook {
            id: "env".to_string(),
            execute_command: "sh".to_string(),
            pass_arguments_to_command: vec![
                Argument::new("string", "-c"),
                Argument::new("string", "printf '%s' \"$HOOK_TAG\""),
            ],
            pass_environment_to_command: vec![Argument {
                env_name: "HOOK_TAG".to_string(),
                ..Argument::new("string", "tagged-value")
            }],
            ..Default::default()
        }));

        let (output, result) = executor.execute_buffered(&request()).await;
        assert!(result.is_ok());
        assert_eq!(String::from_utf8_lossy(&output), "tagged-value");
    }
}
