//! Running external commands with a bounded wall-clock time.

use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug)]
pub struct CommandFailureInfo {
    command: String,
    status: std::process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl std::fmt::Display for CommandFailureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Command [{}] executed and failed with status: {}",
            self.command, self.status
        )?;
        write!(f, "  stdout: {}", self.stdout.trim())?;
        write!(f, "  stderr: {}", self.stderr.trim())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to start execution of [{command}]: {err}")]
    ExecutionStart { command: String, err: std::io::Error },

    #[error("{0}")]
    CommandFailure(Box<CommandFailureInfo>),

    #[error("Command [{command}] did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Failed to parse output of [{command}]: {reason}")]
    ParseFailure { command: String, reason: String },
}

pub fn command_to_string(command: &Command) -> String {
    let std = command.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(|s| s.to_string_lossy().into())
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn output_to_exec_error(command: &Command, output: &Output) -> ExecutionError {
    ExecutionError::CommandFailure(Box::new(CommandFailureInfo {
        command: command_to_string(command),
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }))
}

/// Run `command` to completion, killing it if it outlives `timeout`.
///
/// A non-zero exit status is an error; use [`execute_unchecked`] when the
/// caller needs to interpret the status itself.
pub async fn execute(command: &mut Command, timeout: Duration) -> Result<Output, ExecutionError> {
    let output = execute_unchecked(command, timeout).await?;
    if !output.status.success() {
        return Err(output_to_exec_error(command, &output));
    }
    Ok(output)
}

/// Like [`execute`] but returns the output whatever the exit status.
pub async fn execute_unchecked(
    command: &mut Command,
    timeout: Duration,
) -> Result<Output, ExecutionError> {
    command.kill_on_drop(true);
    match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(ExecutionError::ExecutionStart {
            command: command_to_string(command),
            err,
        }),
        Err(_) => Err(ExecutionError::Timeout {
            command: command_to_string(command),
            timeout,
        }),
    }
}

/// Stdout of a successful command as UTF-8 text.
pub fn stdout_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}
