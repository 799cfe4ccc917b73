//! Application context shared across route handlers via axum state.
//!
//! Everything in [`AppContext`] is read-only after startup and cheap to
//! clone: configuration and key material sit behind `Arc`, the fetcher and
//! launcher are handles around shared clients.

use std::sync::Arc;

use mr_core::config::Config;
use mr_core::{Error, Result};
use mr_hls::{OriginFetcher, PlaylistRewriter};
use mr_remote::{KeyMaterial, RemoteConnector, RemoteProcessLauncher, RemoteTarget};
use url::Url;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    /// Parsed `origin.base_url`; `None` when not configured.
    pub origin_base: Option<Arc<Url>>,
    pub fetcher: OriginFetcher,
    pub rewriter: PlaylistRewriter,
    pub launcher: RemoteProcessLauncher,
    /// Resolved once at startup; `None` when no credential is configured.
    pub key: Option<Arc<KeyMaterial>>,
}

impl AppContext {
    /// Build the context.
    ///
    /// An unparseable origin base URL is fatal here; a missing one is not,
    /// since the launcher side of the relay still works without it.
    pub fn new(
        config: Config,
        connector: Arc<dyn RemoteConnector>,
        key: Option<KeyMaterial>,
    ) -> Result<Self> {
        let origin_base = match config.origin.base_url.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                let url = Url::parse(raw.trim()).map_err(|e| {
                    Error::Config(format!("origin.base_url {raw:?} is not a valid URL: {e}"))
                })?;
                if url.cannot_be_a_base() {
                    return Err(Error::Config(format!(
                        "origin.base_url {raw:?} cannot carry a path"
                    )));
                }
                Some(Arc::new(url))
            }
            _ => None,
        };

        let fetcher = OriginFetcher::from_config(&config.origin)?;
        let launcher = RemoteProcessLauncher::new(connector)
            .with_log_hint(config.remote.remote_log_hint.clone());

        Ok(Self {
            config: Arc::new(config),
            origin_base,
            fetcher,
            rewriter: PlaylistRewriter::default(),
            launcher,
            key: key.map(Arc::new),
        })
    }

    /// Origin base URL, or a configuration error naming the missing setting.
    pub fn origin_base(&self) -> Result<&Url> {
        self.origin_base
            .as_deref()
            .ok_or_else(|| Error::Config("origin.base_url is not configured".into()))
    }

    /// Everything `/start-mt` would need but does not have.
    ///
    /// Unlike [`Config::missing_launch_fields`] this also reports a
    /// configured credential that could not be resolved at startup.
    pub fn missing_launch_fields(&self) -> Vec<&'static str> {
        let mut missing = self.config.missing_launch_fields();
        if self.key.is_none() && !missing.contains(&"remote.key_path") {
            missing.push("remote.key_path");
        }
        missing
    }

    /// The remote target for a start request, or one `Config` error listing
    /// every missing setting.
    pub fn remote_target(&self) -> Result<RemoteTarget> {
        let missing = self.missing_launch_fields();
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "remote launch is not configured, missing: {}",
                missing.join(", ")
            )));
        }
        RemoteTarget::from_config(&self.config.remote, self.key.clone())
    }
}
