//! Builder for executing the local `ssh` client with timeout support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};

/// Default command timeout: 30 seconds.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// A builder for constructing and executing external tool invocations.
///
/// Unlike a plain `Command`, a non-zero exit is *not* an error here: the
/// caller classifies failures from the exit code and stderr, because `ssh`
/// encodes authentication and transport problems that way.
///
/// # Example
///
/// ```no_run
/// use mr_remote::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> mr_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ssh"))
///     .arg("-V")
///     .execute()
///     .await?;
/// println!("{}", output.stderr);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    capture: bool,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            capture: true,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Whether to pipe stdout/stderr back to the caller (default `true`).
    ///
    /// Disable for programs that fork a background child which inherits the
    /// pipes, otherwise waiting for EOF would block until that child exits.
    pub fn capture_output(&mut self, capture: bool) -> &mut Self {
        self.capture = capture;
        self
    }

    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Spawn the process with stdin closed and stdout/stderr piped.
    ///
    /// The child is killed when the returned handle is dropped.
    ///
    /// # Errors
    ///
    /// - [`mr_core::Error::Config`] if the program does not exist.
    /// - [`mr_core::Error::Internal`] for any other spawn failure.
    pub fn spawn(&self) -> mr_core::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn().map_err(|e| self.spawn_error(e))
    }

    /// Execute the command and wait for it to exit.
    ///
    /// # Errors
    ///
    /// - [`mr_core::Error::Timeout`] if the process outlives the timeout; the
    ///   process is killed.
    /// - [`mr_core::Error::Config`] / [`mr_core::Error::Internal`] if it
    ///   cannot be spawned.
    pub async fn execute(&self) -> mr_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null()).kill_on_drop(true);

        if self.capture {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());
        }

        tracing::trace!(program = %program_name, args = ?self.args, "Spawning tool");

        let child = cmd.spawn().map_err(|e| self.spawn_error(e))?;

        // Dropping the future on timeout drops the child, which kills it.
        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;

        match result {
            Ok(Ok(output)) => Ok(ToolOutput {
                status: output.status,
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
            Ok(Err(e)) => Err(mr_core::Error::Internal(format!(
                "I/O error waiting for {program_name}: {e}"
            ))),
            Err(_elapsed) => Err(mr_core::Error::timeout(
                format!("running {program_name}"),
                self.timeout,
            )),
        }
    }

    fn spawn_error(&self, e: std::io::Error) -> mr_core::Error {
        let program_name = self.program_name();
        if e.kind() == std::io::ErrorKind::NotFound {
            mr_core::Error::Config(format!("{program_name} not found at {}", self.program.display()))
        } else {
            mr_core::Error::Internal(format!("failed to spawn {program_name}: {e}"))
        }
    }
}
