//! Remote session abstraction.
//!
//! A [`RemoteConnector`] opens one authenticated [`RemoteSession`] per start
//! request. Sessions are never pooled: the launcher closes each one before
//! the HTTP response is produced.

use std::sync::Arc;

use async_trait::async_trait;
use mr_core::config::RemoteConfig;
use mr_core::{Error, Result};

use crate::credential::KeyMaterial;

/// Where and as whom to open a session.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    host: String,
    user: String,
    port: u16,
    key: Arc<KeyMaterial>,
}

impl RemoteTarget {
    /// Build a target, rejecting blank host/user and a vanished key file.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        port: u16,
        key: Arc<KeyMaterial>,
    ) -> Result<Self> {
        let target = Self {
            host: host.into().trim().to_owned(),
            user: user.into().trim().to_owned(),
            port,
            key,
        };
        target.check()?;
        Ok(target)
    }

    /// Build a target from configuration, reporting every missing setting
    /// in a single [`Error::Config`].
    pub fn from_config(remote: &RemoteConfig, key: Option<Arc<KeyMaterial>>) -> Result<Self> {
        let host = remote.host.as_deref().map(str::trim).unwrap_or_default();
        let user = remote.user.as_deref().map(str::trim).unwrap_or_default();

        let mut missing = Vec::new();
        if host.is_empty() {
            missing.push("remote.host");
        }
        if user.is_empty() {
            missing.push("remote.user");
        }
        if key.is_none() {
            missing.push("remote credential (key_path or key_env)");
        }

        match key {
            Some(key) if missing.is_empty() => Self::new(host, user, remote.port, key),
            _ => Err(Error::Config(format!("missing {}", missing.join(", ")))),
        }
    }

    /// Validate the fields again right before a connection attempt.
    pub fn check(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("remote host is empty".into()));
        }
        if self.user.is_empty() {
            return Err(Error::Config("remote user is empty".into()));
        }
        if !self.key.is_available() {
            return Err(Error::Config(format!(
                "remote key {} is no longer readable",
                self.key.path().display()
            )));
        }
        Ok(())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    /// `user@host:port`, for logs.
    pub fn destination(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Opens authenticated sessions to a remote host.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Authenticate and return a live session.
    ///
    /// Configuration problems must be reported as [`Error::Config`] before
    /// any network activity.
    async fn open(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>>;
}

/// One live authenticated channel.
#[async_trait]
pub trait RemoteSession: Send {
    /// The host this session is connected to.
    fn host(&self) -> &str;

    /// Submit `command` to the remote shell and return once the shell has
    /// accepted it, without waiting for whatever it started to exit.
    async fn dispatch_detached(&mut self, command: &str) -> Result<()>;

    /// Tear the channel down. Consumes the session, so it runs at most once.
    async fn close(self: Box<Self>) -> Result<()>;
}
