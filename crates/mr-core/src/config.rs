//! Application configuration types and loader.
//!
//! The top-level [`Config`] is deserialized from TOML and carries the
//! `server`, `remote` and `origin` sections. Every section defaults sensibly
//! so an empty file is valid; environment variables are applied on top so
//! the relay can be deployed on hosts that only offer env-based settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ids::StreamId;

/// Locations searched when no `--config` is given, in order.
const DEFAULT_PATHS: &[&str] = &[
    "./mtxrelay.toml",
    "./config.toml",
    "~/.config/mtxrelay/config.toml",
    "/etc/mtxrelay/config.toml",
];

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub remote: RemoteConfig,
    pub origin: OriginConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Apply environment overrides using the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Empty values are ignored. `EC2_HOST` and `EC2_USER` are accepted as
    /// aliases for the remote host and user.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| lookup(k).filter(|v| !v.trim().is_empty()))
        };

        if let Some(port) = get(&["PORT", "MTXRELAY_PORT"]) {
            match port.trim().parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!("Ignoring invalid PORT value {port:?}"),
            }
        }
        if let Some(host) = get(&["MTXRELAY_HOST"]) {
            self.server.host = host;
        }
        if let Some(base) = get(&["MTXRELAY_PUBLIC_BASE_URL"]) {
            self.server.public_base_url = Some(base);
        }
        if let Some(host) = get(&["MTXRELAY_REMOTE_HOST", "EC2_HOST"]) {
            self.remote.host = Some(host);
        }
        if let Some(user) = get(&["MTXRELAY_REMOTE_USER", "EC2_USER"]) {
            self.remote.user = Some(user);
        }
        if let Some(path) = get(&["MTXRELAY_REMOTE_KEY_PATH"]) {
            self.remote.key_path = Some(PathBuf::from(path));
        }
        if let Some(cmd) = get(&["MTXRELAY_START_COMMAND"]) {
            self.remote.start_command = Some(cmd);
        }
        if let Some(base) = get(&["MTXRELAY_ORIGIN_BASE_URL"]) {
            self.origin.base_url = Some(base);
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if let Some(ref base) = self.server.public_base_url {
            if url::Url::parse(base).is_err() {
                warnings.push(format!("server.public_base_url '{base}' is not a valid URL"));
            }
        }

        match self.origin.base_url {
            None => warnings.push("origin.base_url is not set; proxy routes will fail".into()),
            Some(ref base) => {
                if let Err(e) = url::Url::parse(base) {
                    warnings.push(format!("origin.base_url '{base}' is not a valid URL: {e}"));
                }
            }
        }

        if self.origin.streams.is_empty() {
            warnings.push("origin.streams is empty; /start-mt will report no streams".into());
        }

        let timeouts = [
            ("remote.auth_timeout_secs", self.remote.auth_timeout_secs),
            ("remote.dispatch_timeout_secs", self.remote.dispatch_timeout_secs),
            ("origin.connect_timeout_secs", self.origin.connect_timeout_secs),
            ("origin.fetch_timeout_secs", self.origin.fetch_timeout_secs),
            ("origin.idle_timeout_secs", self.origin.idle_timeout_secs),
        ];
        for (name, secs) in timeouts {
            if secs == 0 {
                warnings.push(format!("{name} is 0; every wait will time out immediately"));
            }
        }

        let valid = ["yes", "no", "accept-new"];
        if !valid.contains(&self.remote.strict_host_key_checking.as_str()) {
            warnings.push(format!(
                "remote.strict_host_key_checking '{}' is not recognized (valid: {})",
                self.remote.strict_host_key_checking,
                valid.join(", ")
            ));
        }

        for field in self.missing_launch_fields() {
            warnings.push(format!("{field} is not set; /start-mt is disabled"));
        }

        warnings
    }

    /// Names of the settings `/start-mt` needs that are absent.
    ///
    /// Only checks that a credential source is configured; whether the key
    /// material can actually be read is decided when it is resolved.
    pub fn missing_launch_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(self.remote.host.as_deref()) {
            missing.push("remote.host");
        }
        if is_blank(self.remote.user.as_deref()) {
            missing.push("remote.user");
        }
        if self.remote.key_path.is_none() && is_blank(self.remote.key_env.as_deref()) {
            missing.push("remote.key_path");
        }
        if is_blank(self.remote.start_command.as_deref()) {
            missing.push("remote.start_command");
        }
        missing
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load configuration from a TOML file and apply environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let mut config = Config::from_toml(&content)?;
    config.apply_env();
    Ok(config)
}

/// Load config from `custom_path`, else the default locations, else defaults.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    for path_str in DEFAULT_PATHS {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::info!("Loading config from {}", path.display());
            return load_config(path);
        }
    }

    tracing::info!("No config file found; using defaults and environment");
    let mut config = Config::default();
    config.apply_env();
    Ok(config)
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public address clients reach the relay at, used to build absolute
    /// stream URLs. Relative URLs are returned when unset.
    pub public_base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            public_base_url: None,
        }
    }
}

/// Remote origin host and the command that starts the media server on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: u16,
    /// Private key file used for authentication.
    pub key_path: Option<PathBuf>,
    /// Environment variable holding PEM key text, used when `key_path` is unset.
    pub key_env: Option<String>,
    /// Detached shell command issued on the remote host.
    pub start_command: Option<String>,
    /// Explicit `ssh` binary; looked up in `PATH` when unset.
    pub ssh_path: Option<PathBuf>,
    /// OpenSSH `StrictHostKeyChecking` value.
    pub strict_host_key_checking: String,
    /// Where the start command writes its output, shown to operators.
    pub remote_log_hint: Option<String>,
    pub auth_timeout_secs: u64,
    pub dispatch_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: None,
            user: None,
            port: 22,
            key_path: None,
            key_env: Some("EC2_KEY".into()),
            start_command: None,
            ssh_path: None,
            strict_host_key_checking: "accept-new".into(),
            remote_log_hint: None,
            auth_timeout_secs: 15,
            dispatch_timeout_secs: 10,
        }
    }
}

impl RemoteConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

/// Origin HLS server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Base address of the origin HLS server, e.g. `http://10.0.0.5:8888`.
    pub base_url: Option<String>,
    /// Playlist requested for `/proxy/stream/{id}`.
    pub playlist_name: String,
    /// Streams the origin publishes.
    pub streams: Vec<StreamId>,
    pub connect_timeout_secs: u64,
    /// Bound on the wait for response headers.
    pub fetch_timeout_secs: u64,
    /// Bound on the wait for each body chunk while relaying.
    pub idle_timeout_secs: u64,
}

impl Default for OriginConfig {
    fn default() -> Self {
        let streams = ["stream1", "stream2", "stream3", "stream4", "stream5"]
            .into_iter()
            .filter_map(|s| StreamId::parse(s).ok())
            .collect();
        Self {
            base_url: None,
            playlist_name: "index.m3u8".into(),
            streams,
            connect_timeout_secs: 5,
            fetch_timeout_secs: 10,
            idle_timeout_secs: 15,
        }
    }
}

impl OriginConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
