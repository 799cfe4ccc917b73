//! Private key material for the remote session.
//!
//! Resolved once at startup so a missing or unreadable key is reported
//! before the first start request rather than in the middle of one.

use std::io::Write;
use std::path::{Path, PathBuf};

use mr_core::config::RemoteConfig;
use mr_core::{Error, Result};
use tempfile::NamedTempFile;

/// A private key file that `ssh -i` can read.
///
/// When the key comes from an environment variable it is written to a
/// temporary file with owner-only permissions that is removed when the
/// `KeyMaterial` is dropped.
#[derive(Debug)]
pub struct KeyMaterial {
    path: PathBuf,
    _materialized: Option<NamedTempFile>,
}

impl KeyMaterial {
    /// Use an existing key file.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(Error::Config(format!(
                "remote key file {} does not exist",
                path.display()
            )));
        }
        Ok(Self {
            path,
            _materialized: None,
        })
    }

    /// Write PEM text to a private temporary file.
    ///
    /// Literal `\n` sequences are expanded when the text has no real line
    /// breaks, since hosting panels often flatten multi-line variables.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let mut text = if pem.contains('\n') {
            pem.to_owned()
        } else {
            pem.replace("\\n", "\n")
        };
        if !text.ends_with('\n') {
            text.push('\n');
        }

        let mut file = tempfile::Builder::new()
            .prefix("mtxrelay-key-")
            .suffix(".pem")
            .tempfile()?;
        file.write_all(text.as_bytes())?;
        file.flush()?;

        Ok(Self {
            path: file.path().to_path_buf(),
            _materialized: Some(file),
        })
    }

    /// Resolve the configured credential using the process environment.
    pub fn resolve(remote: &RemoteConfig) -> Result<Option<Self>> {
        Self::resolve_with(remote, |key| std::env::var(key).ok())
    }

    /// Resolve the configured credential, reading variables through `lookup`.
    ///
    /// `key_path` wins over `key_env`. Returns `Ok(None)` when neither yields
    /// key material; a configured but missing key file is an error.
    pub fn resolve_with(
        remote: &RemoteConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>> {
        if let Some(ref path) = remote.key_path {
            return Self::from_file(path).map(Some);
        }

        let Some(ref var) = remote.key_env else {
            return Ok(None);
        };

        match lookup(var) {
            Some(pem) if !pem.trim().is_empty() => {
                let key = Self::from_pem(&pem)?;
                tracing::info!("Materialized remote key from ${var} at {}", key.path.display());
                Ok(Some(key))
            }
            _ => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the key file is still present on disk.
    pub fn is_available(&self) -> bool {
        self.path.is_file()
    }
}
