//! Detached start of the origin media process.

use std::sync::Arc;
use std::time::Instant;

use mr_core::{Error, Result};

use crate::session::{RemoteConnector, RemoteSession, RemoteTarget};

/// Result of issuing the detached start command.
///
/// `Dispatched` only says the remote shell accepted the command. The
/// long-running process's own exit status is never observed.
#[derive(Debug)]
pub enum LaunchOutcome {
    Dispatched,
    Failed(Error),
}

impl LaunchOutcome {
    pub fn into_result(self) -> Result<()> {
        match self {
            LaunchOutcome::Dispatched => Ok(()),
            LaunchOutcome::Failed(e) => Err(e),
        }
    }
}

/// Opens sessions through an injected [`RemoteConnector`] and issues the
/// start command over them.
#[derive(Clone)]
pub struct RemoteProcessLauncher {
    connector: Arc<dyn RemoteConnector>,
    log_hint: Option<String>,
}

impl RemoteProcessLauncher {
    pub fn new(connector: Arc<dyn RemoteConnector>) -> Self {
        Self {
            connector,
            log_hint: None,
        }
    }

    /// Remote log location reported to operators after each dispatch.
    pub fn with_log_hint(mut self, hint: Option<String>) -> Self {
        self.log_hint = hint;
        self
    }

    /// Open a fresh session for one start request.
    pub async fn open_session(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        self.connector.open(target).await
    }

    /// Submit `command` over `session`, then close the session.
    ///
    /// The session is closed exactly once whether dispatch succeeded or
    /// not. A failed close after a successful dispatch is logged and does
    /// not turn the outcome into a failure: the command already went out.
    pub async fn launch(&self, mut session: Box<dyn RemoteSession>, command: &str) -> LaunchOutcome {
        if command.trim().is_empty() {
            close_quietly(session).await;
            return LaunchOutcome::Failed(Error::Config("start command is empty".into()));
        }

        let host = session.host().to_owned();
        let started = Instant::now();
        let dispatched = session.dispatch_detached(command).await;

        match dispatched {
            Ok(()) => {
                if let Err(e) = session.close().await {
                    tracing::warn!(host = %host, "Command dispatched but session close failed: {e}");
                }
                tracing::info!(
                    host = %host,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Start command accepted by remote shell"
                );
                if let Some(ref hint) = self.log_hint {
                    tracing::info!(host = %host, "Process output goes to {hint} on the remote host");
                }
                LaunchOutcome::Dispatched
            }
            Err(e) => {
                close_quietly(session).await;
                tracing::warn!(host = %host, error = %e, "Start command was not accepted");
                LaunchOutcome::Failed(e)
            }
        }
    }
}

async fn close_quietly(session: Box<dyn RemoteSession>) {
    if let Err(e) = session.close().await {
        tracing::debug!("Session close after failure also failed: {e}");
    }
}
