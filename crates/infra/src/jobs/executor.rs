//! Shell command executor with a per-job timeout.

use std::io;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, warn};

use queuectl_core::AttemptOutput;

/// Interpreter every job command is handed to.
const SHELL: &str = "sh";

/// Exit status POSIX shells use for "command not found".
const EXIT_COMMAND_NOT_FOUND: i32 = 127;

/// Execution-level failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    /// Exceeded the timeout and was killed
    Timeout,
    /// Shell or command missing
    NotFound,
    /// Any other spawn / wait failure
    Other,
}

/// Everything observed about one command run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub exit_success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Dispatch to termination, always populated
    pub elapsed_seconds: f64,
    pub error_kind: Option<ExecutionErrorKind>,
    /// Failure text; `None` on success
    pub error_message: Option<String>,
}

/// A run that did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionFailure {
    /// `None` for a plain non-zero exit
    pub kind: Option<ExecutionErrorKind>,
    pub message: String,
    pub output: AttemptOutput,
}

impl ExecutionReport {
    /// Split into the captured output on success or a failure with its message.
    pub fn into_result(self) -> Result<AttemptOutput, ExecutionFailure> {
        let output = AttemptOutput {
            stdout: non_empty(self.stdout),
            stderr: non_empty(self.stderr),
            elapsed_seconds: self.elapsed_seconds,
        };

        if self.exit_success {
            Ok(output)
        } else {
            Err(ExecutionFailure {
                kind: self.error_kind,
                message: self
                    .error_message
                    .unwrap_or_else(|| "command failed".to_string()),
                output,
            })
        }
    }

    fn failed(kind: ExecutionErrorKind, message: String, elapsed_seconds: f64) -> Self {
        Self {
            exit_success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            elapsed_seconds,
            error_kind: Some(kind),
            error_message: Some(message),
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

/// Something that can run a job command to a report.
///
/// Workers own one and call it from their own thread.
pub trait Execute: Send {
    fn execute(&self, command: &str, timeout: Duration) -> ExecutionReport;
}

/// Runs job commands through `sh -c`, isolated from the caller's stdin.
///
/// Owns a single-threaded runtime; create one per worker thread.
#[derive(Debug)]
pub struct CommandExecutor {
    runtime: Runtime,
}

impl CommandExecutor {
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { runtime })
    }

    /// Run `command` to completion, killing it once `timeout` elapses.
    pub fn execute(&self, command: &str, timeout: Duration) -> ExecutionReport {
        let started = Instant::now();
        let result = self.runtime.block_on(run_shell(command, timeout));
        let elapsed_seconds = started.elapsed().as_secs_f64();

        let report = match result {
            Ok(output) => report_from_output(output, elapsed_seconds),
            Err(RunError::TimedOut) => ExecutionReport::failed(
                ExecutionErrorKind::Timeout,
                format!("Job timed out after {} seconds", timeout.as_secs_f64()),
                elapsed_seconds,
            ),
            Err(RunError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                ExecutionReport::failed(
                    ExecutionErrorKind::NotFound,
                    format!("Command not found: {err}"),
                    elapsed_seconds,
                )
            }
            Err(RunError::Io(err)) => ExecutionReport::failed(
                ExecutionErrorKind::Other,
                format!("Execution error: {err}"),
                elapsed_seconds,
            ),
        };

        if let Some(kind) = report.error_kind {
            warn!(command, kind = ?kind, elapsed = elapsed_seconds, "command did not run to completion");
        } else {
            debug!(command, exit_code = ?report.exit_code, elapsed = elapsed_seconds, "command finished");
        }

        report
    }
}

impl Execute for CommandExecutor {
    fn execute(&self, command: &str, timeout: Duration) -> ExecutionReport {
        CommandExecutor::execute(self, command, timeout)
    }
}

enum RunError {
    TimedOut,
    Io(io::Error),
}

async fn run_shell(command: &str, timeout: Duration) -> Result<Output, RunError> {
    let child = Command::new(SHELL)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(RunError::Io)?;

    // Dropping the wait future on timeout drops the child, which kills it.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(RunError::Io),
        Err(_) => Err(RunError::TimedOut),
    }
}

fn report_from_output(output: Output, elapsed_seconds: f64) -> ExecutionReport {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code();

    if output.status.success() {
        return ExecutionReport {
            exit_success: true,
            exit_code,
            stdout,
            stderr,
            elapsed_seconds,
            error_kind: None,
            error_message: None,
        };
    }

    let message = if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else if !stdout.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        match exit_code {
            Some(code) => format!("Command failed with exit code {code}"),
            None => "Command terminated by signal".to_string(),
        }
    };

    let error_kind = (exit_code == Some(EXIT_COMMAND_NOT_FOUND)).then_some(ExecutionErrorKind::NotFound);

    ExecutionReport {
        exit_success: false,
        exit_code,
        stdout,
        stderr,
        elapsed_seconds,
        error_kind,
        error_message: Some(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> CommandExecutor {
        CommandExecutor::new().unwrap()
    }

    #[test]
    fn captures_stdout_on_success() {
        let report = executor().execute("echo hello", Duration::from_secs(5));
        assert!(report.exit_success);
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.stdout.trim(), "hello");
        assert!(report.error_message.is_none());

        let output = report.into_result().unwrap();
        assert_eq!(output.stdout.as_deref().map(str::trim), Some("hello"));
        assert!(output.stderr.is_none());
    }

    #[test]
    fn pipelines_and_redirection_go_through_the_shell() {
        let report = executor().execute("printf 'a\\nb\\n' | wc -l 1>&2", Duration::from_secs(5));
        assert!(report.exit_success);
        assert_eq!(report.stderr.trim(), "2");
    }

    #[test]
    fn failure_prefers_stderr_then_stdout_then_exit_code() {
        let ex = executor();

        let report = ex.execute("echo out; echo err 1>&2; exit 3", Duration::from_secs(5));
        assert!(!report.exit_success);
        assert_eq!(report.exit_code, Some(3));
        assert_eq!(report.error_message.as_deref(), Some("err"));
        assert_eq!(report.error_kind, None);

        let report = ex.execute("echo only-out; exit 1", Duration::from_secs(5));
        assert_eq!(report.error_message.as_deref(), Some("only-out"));

        let report = ex.execute("exit 4", Duration::from_secs(5));
        assert_eq!(report.error_message.as_deref(), Some("Command failed with exit code 4"));
    }

    #[test]
    fn missing_command_is_not_found() {
        let report = executor().execute("definitely-not-a-real-command-xyz", Duration::from_secs(5));
        assert!(!report.exit_success);
        assert_eq!(report.error_kind, Some(ExecutionErrorKind::NotFound));
    }

    #[test]
    fn timeout_kills_and_still_reports_elapsed() {
        let report = executor().execute("sleep 5", Duration::from_millis(200));
        assert!(!report.exit_success);
        assert_eq!(report.error_kind, Some(ExecutionErrorKind::Timeout));
        assert!(report.elapsed_seconds >= 0.2);
        assert!(report.elapsed_seconds < 4.0);
        assert!(report.error_message.unwrap().contains("timed out"));
    }

    #[test]
    fn failure_result_carries_output() {
        let failure = executor()
            .execute("echo partial; false", Duration::from_secs(5))
            .into_result()
            .unwrap_err();
        assert_eq!(failure.message, "partial");
        assert_eq!(failure.output.stdout.as_deref().map(str::trim), Some("partial"));
        assert!(failure.output.elapsed_seconds >= 0.0);
    }
}
