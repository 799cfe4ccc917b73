//! OpenSSH-backed sessions.
//!
//! A session is an OpenSSH ControlMaster connection bound to a control
//! socket in a private temporary directory. Opening it performs the
//! authentication handshake once; commands are then multiplexed over the
//! socket, and `ssh -O exit` tears the master down.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use mr_core::config::RemoteConfig;
use mr_core::{Error, Result};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Child;

use crate::command::ToolCommand;
use crate::session::{RemoteConnector, RemoteSession, RemoteTarget};

/// Upper bound for `ssh -O exit`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for ssh's exit status after stdout closed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// ssh's own exit code for connection-level failures.
const SSH_FAILURE_CODE: i32 = 255;

/// stderr fragments that mean the remote side rejected our identity.
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "Permission denied",
    "Authentication failed",
    "Too many authentication failures",
    "Host key verification failed",
    "no such identity",
];

/// Settings shared by every session the connector opens.
#[derive(Debug, Clone)]
pub struct SshConnector {
    program: PathBuf,
    strict_host_key_checking: String,
    auth_timeout: Duration,
    dispatch_timeout: Duration,
}

impl SshConnector {
    pub fn new(program: PathBuf, auth_timeout: Duration, dispatch_timeout: Duration) -> Self {
        Self {
            program,
            strict_host_key_checking: "accept-new".into(),
            auth_timeout,
            dispatch_timeout,
        }
    }

    /// Build a connector from configuration, locating `ssh` in `PATH` when
    /// no explicit binary is configured.
    pub fn from_config(remote: &RemoteConfig) -> Self {
        let program = match remote.ssh_path {
            Some(ref p) if p.exists() => p.clone(),
            Some(ref p) => {
                tracing::warn!("Configured ssh_path {} does not exist; searching PATH", p.display());
                locate_ssh()
            }
            None => locate_ssh(),
        };

        Self {
            program,
            strict_host_key_checking: remote.strict_host_key_checking.clone(),
            auth_timeout: remote.auth_timeout(),
            dispatch_timeout: remote.dispatch_timeout(),
        }
    }

    pub fn strict_host_key_checking(mut self, policy: impl Into<String>) -> Self {
        self.strict_host_key_checking = policy.into();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Whether the configured binary exists.
    pub fn is_available(&self) -> bool {
        self.program.is_file() || which::which(&self.program).is_ok()
    }

    /// How long a backgrounded master outlives its last client. Covers one
    /// dispatch plus the close, so a master whose `-O exit` never lands still
    /// goes away on its own.
    fn control_persist(&self) -> Duration {
        (self.auth_timeout + self.dispatch_timeout + CLOSE_TIMEOUT).max(Duration::from_secs(1))
    }

    fn master_args(&self, target: &RemoteTarget, socket: &Path, log: &Path) -> Vec<String> {
        let mut args = vec![
            "-M".to_string(),
            "-S".into(),
            socket.display().to_string(),
            "-f".into(),
            "-N".into(),
            "-E".into(),
            log.display().to_string(),
            "-i".into(),
            target.key().path().display().to_string(),
        ];
        args.extend(option_args(&[
            ("BatchMode", "yes".into()),
            ("ControlPersist", format!("{}s", self.control_persist().as_secs())),
            ("IdentitiesOnly", "yes".into()),
            ("ConnectTimeout", self.auth_timeout.as_secs().max(1).to_string()),
            ("StrictHostKeyChecking", self.strict_host_key_checking.clone()),
        ]));
        args.extend(destination_args(target));
        args
    }
}

fn locate_ssh() -> PathBuf {
    which::which("ssh").unwrap_or_else(|_| PathBuf::from("ssh"))
}

fn option_args(options: &[(&str, String)]) -> Vec<String> {
    options
        .iter()
        .flat_map(|(k, v)| ["-o".to_string(), format!("{k}={v}")])
        .collect()
}

fn destination_args(target: &RemoteTarget) -> Vec<String> {
    vec![
        "-p".into(),
        target.port().to_string(),
        "-l".into(),
        target.user().to_string(),
        target.host().to_string(),
    ]
}

/// Map a failed ssh invocation to `Auth` or `Connectivity`.
fn classify_failure(target: &RemoteTarget, stderr: &str) -> Error {
    let message = stderr.trim();
    let message = if message.is_empty() {
        "ssh exited without a diagnostic".to_string()
    } else {
        message.lines().last().unwrap_or(message).to_string()
    };

    if AUTH_FAILURE_MARKERS.iter().any(|m| stderr.contains(m)) {
        Error::auth(target.host(), message)
    } else {
        Error::connectivity(target.destination(), message)
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    async fn open(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        target.check()?;

        let dir = tempfile::Builder::new().prefix("mtxrelay-ssh-").tempdir()?;
        let socket = dir.path().join("ctl");
        let log = dir.path().join("ssh.log");

        tracing::info!(destination = %target.destination(), "Opening remote session");

        // -f forks the master into the background after authentication, so
        // the foreground process exiting 0 means the handshake succeeded.
        let output = ToolCommand::new(self.program.clone())
            .args(self.master_args(target, &socket, &log))
            .capture_output(false)
            .timeout(self.auth_timeout)
            .execute()
            .await
            .map_err(|e| match e {
                Error::Timeout { after, .. } => {
                    Error::timeout(format!("authenticating to {}", target.destination()), after)
                }
                other => other,
            })?;

        if !output.success() {
            let diagnostics = tokio::fs::read_to_string(&log).await.unwrap_or_default();
            let err = classify_failure(target, &diagnostics);
            tracing::warn!(destination = %target.destination(), error = %err, "Remote session failed");
            return Err(err);
        }

        tracing::info!(destination = %target.destination(), "Remote session established");

        Ok(Box::new(SshSession {
            program: self.program.clone(),
            target: target.clone(),
            socket,
            dispatch_timeout: self.dispatch_timeout,
            dir: Some(dir),
            closed: false,
        }))
    }
}

/// A live ControlMaster connection.
#[derive(Debug)]
pub struct SshSession {
    program: PathBuf,
    target: RemoteTarget,
    socket: PathBuf,
    dispatch_timeout: Duration,
    dir: Option<TempDir>,
    closed: bool,
}

impl SshSession {
    fn mux_args(&self) -> Vec<String> {
        let mut args = vec![
            "-S".to_string(),
            self.socket.display().to_string(),
            "-o".into(),
            "BatchMode=yes".into(),
        ];
        args.extend(destination_args(&self.target));
        args
    }

    fn exit_args(&self) -> Vec<String> {
        let mut args = vec![
            "-S".to_string(),
            self.socket.display().to_string(),
            "-O".into(),
            "exit".into(),
        ];
        args.extend(destination_args(&self.target));
        args
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn host(&self) -> &str {
        self.target.host()
    }

    async fn dispatch_detached(&mut self, command: &str) -> Result<()> {
        if self.closed || !self.socket.exists() {
            return Err(Error::connectivity(
                self.target.destination(),
                "session channel is already closed",
            ));
        }

        let marker = format!("mtxrelay-dispatched-{}", uuid::Uuid::new_v4().simple());
        let script = format!("{command}\necho {marker}\n");

        let mut args = self.mux_args();
        args.push(script);

        tracing::debug!(destination = %self.target.destination(), "Dispatching start command");

        let mut child = ToolCommand::new(self.program.clone()).args(args).spawn()?;
        let result = wait_for_marker(&mut child, &marker, self.dispatch_timeout).await;

        // The ssh client is killed when `child` drops; the remote command
        // has already detached by the time the marker is printed.
        match result {
            Ok(()) => Ok(()),
            Err(Error::Connectivity { message, .. }) => {
                Err(Error::connectivity(self.target.destination(), message))
            }
            Err(e) => Err(e),
        }
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.closed = true;

        let result = ToolCommand::new(self.program.clone())
            .args(self.exit_args())
            .timeout(CLOSE_TIMEOUT)
            .execute()
            .await;

        // Removes the socket directory.
        self.dir.take();

        match result {
            Ok(output) if output.success() => {
                tracing::debug!(destination = %self.target.destination(), "Remote session closed");
                Ok(())
            }
            Ok(output) => Err(Error::connectivity(
                self.target.destination(),
                format!("failed to close session: {}", output.stderr.trim()),
            )),
            Err(e) => Err(e),
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Best effort; we cannot await here. The child is reaped on a
        // separate thread so it does not linger as a zombie.
        let spawned = std::process::Command::new(&self.program)
            .args(self.exit_args())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn();
        match spawned {
            Ok(mut child) => {
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => tracing::debug!("Failed to tear down abandoned ssh session: {e}"),
        }
    }
}

/// Read `child`'s stdout until a line equal to `marker` appears.
///
/// Returns as soon as the marker is seen, without waiting for the child to
/// exit. If stdout closes first, the exit code and stderr decide between
/// [`Error::Connectivity`] (ssh's own failure code 255) and
/// [`Error::Dispatch`] (the remote shell ran but never reached the marker).
pub async fn wait_for_marker(child: &mut Child, marker: &str, timeout: Duration) -> Result<()> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal("child stdout is not piped".into()))?;

    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        })
    });

    let mut lines = BufReader::new(stdout).lines();
    let scan = async {
        while let Some(line) = lines.next_line().await? {
            if line.trim() == marker {
                return Ok::<bool, std::io::Error>(true);
            }
            tracing::debug!(remote_stdout = %line, "Remote output before acknowledgment");
        }
        Ok(false)
    };

    let acknowledged = match tokio::time::timeout(timeout, scan).await {
        Ok(Ok(seen)) => seen,
        Ok(Err(e)) => {
            return Err(Error::connectivity("remote", format!("reading remote output: {e}")));
        }
        Err(_elapsed) => {
            return Err(Error::timeout("waiting for the remote shell to accept the command", timeout));
        }
    };

    if acknowledged {
        return Ok(());
    }

    let status = tokio::time::timeout(EXIT_GRACE, child.wait()).await.ok().and_then(|r| r.ok());
    let stderr = match stderr_task {
        Some(task) => tokio::time::timeout(EXIT_GRACE, task)
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or_default(),
        None => String::new(),
    };
    let stderr = stderr.trim();

    match status.and_then(|s| s.code()) {
        Some(SSH_FAILURE_CODE) => Err(Error::connectivity(
            "remote",
            if stderr.is_empty() { "ssh connection failed" } else { stderr },
        )),
        code => {
            let exit = code.map_or_else(|| "unknown status".to_string(), |c| format!("status {c}"));
            let detail = if stderr.is_empty() {
                String::new()
            } else {
                format!(": {stderr}")
            };
            Err(Error::Dispatch(format!(
                "remote shell exited with {exit} before accepting the command{detail}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::KeyMaterial;
    use std::sync::Arc;
    use std::time::Instant;

    fn target() -> RemoteTarget {
        let key = KeyMaterial::from_pem("-----BEGIN KEY-----\nx\n-----END KEY-----").unwrap();
        RemoteTarget::new("10.0.0.5", "ec2-user", 2222, Arc::new(key)).unwrap()
    }

    fn sh(script: &str) -> Child {
        ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", script])
            .spawn()
            .unwrap()
    }

    #[test]
    fn master_args_carry_identity_and_policy() {
        let connector = SshConnector::new(
            PathBuf::from("ssh"),
            Duration::from_secs(7),
            Duration::from_secs(3),
        )
        .strict_host_key_checking("yes");
        let t = target();
        let args = connector.master_args(&t, Path::new("/tmp/x/ctl"), Path::new("/tmp/x/ssh.log"));

        let joined = args.join(" ");
        assert!(joined.starts_with("-M -S /tmp/x/ctl -f -N -E /tmp/x/ssh.log -i "));
        assert!(joined.contains("-o BatchMode=yes"));
        assert!(joined.contains("-o ConnectTimeout=7"));
        assert!(joined.contains("-o StrictHostKeyChecking=yes"));
        // 7s auth + 3s dispatch + 5s close
        assert!(joined.contains("-o ControlPersist=15s"));
        assert!(!joined.contains("ControlPersist=yes"));
        assert!(joined.ends_with("-p 2222 -l ec2-user 10.0.0.5"));
    }

    #[test]
    fn classify_permission_denied_as_auth() {
        let err = classify_failure(&target(), "ec2-user@10.0.0.5: Permission denied (publickey).\n");
        assert!(matches!(err, Error::Auth { .. }));
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn classify_refused_as_connectivity() {
        let err = classify_failure(
            &target(),
            "ssh: connect to host 10.0.0.5 port 2222: Connection refused\n",
        );
        assert!(matches!(err, Error::Connectivity { .. }));
        assert!(err.to_string().contains("Connection refused"));
    }

    #[tokio::test]
    async fn open_rejects_missing_key_before_spawning() {
        let key = KeyMaterial::from_pem("k").unwrap();
        let path = key.path().to_path_buf();
        let key = Arc::new(key);
        let t = RemoteTarget::new("10.0.0.5", "ec2-user", 22, key).unwrap();
        std::fs::remove_file(&path).unwrap();

        // A program that cannot exist proves no process was attempted.
        let connector = SshConnector::new(
            PathBuf::from("/nonexistent/ssh"),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let err = connector.open(&t).await.err().expect("open must fail");
        assert!(err.to_string().contains("no longer readable"), "{err}");
    }

    #[tokio::test]
    async fn marker_returns_before_child_exits() {
        let mut child = sh("echo starting; echo mtx-ok; sleep 30");
        let started = Instant::now();
        wait_for_marker(&mut child, "mtx-ok", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_marker_is_dispatch_error() {
        let mut child = sh("echo 'sh: 1: mediamtx: not found' >&2; exit 127");
        let err = wait_for_marker(&mut child, "mtx-ok", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Dispatch(_)), "unexpected: {err}");
        assert!(err.to_string().contains("status 127"));
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn exit_255_is_connectivity_error() {
        let mut child = sh("echo 'Control socket connect: No such file' >&2; exit 255");
        let err = wait_for_marker(&mut child, "mtx-ok", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connectivity { .. }), "unexpected: {err}");
    }

    #[tokio::test]
    async fn silent_shell_times_out() {
        let mut child = sh("sleep 30");
        let started = Instant::now();
        let err = wait_for_marker(&mut child, "mtx-ok", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
