//! Unified error type for the relay.
//!
//! All crates funnel their failures into [`Error`], which carries enough
//! context for the HTTP boundary to derive a status code via
//! [`Error::http_status`] and a stable machine-readable [`Error::code`].

use std::time::Duration;

/// Unified error type covering every failure mode of the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required setting is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stream identifier or filename failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The remote host rejected our credentials.
    #[error("Authentication error [{host}]: {message}")]
    Auth {
        /// Remote host that rejected the login.
        host: String,
        /// Human-readable cause (usually ssh's stderr).
        message: String,
    },

    /// Network-level failure reaching the remote host.
    #[error("Connectivity error [{target}]: {message}")]
    Connectivity {
        /// Host or URL that could not be reached.
        target: String,
        /// Human-readable cause.
        message: String,
    },

    /// The remote shell did not accept the start command.
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// The origin HTTP fetch failed or returned an unreadable response.
    #[error("Origin unavailable [{url}]: {message}")]
    OriginUnavailable {
        /// Origin URL that was requested.
        url: String,
        /// Human-readable cause.
        message: String,
    },

    /// The origin answered with a non-success status for a resource the
    /// relay has to interpret (playlists).
    #[error("Origin returned status {status} for {url}")]
    OriginStatus {
        /// Status code returned by the origin.
        status: u16,
        /// Origin URL that was requested.
        url: String,
    },

    /// A bounded wait was exceeded.
    #[error("Timed out after {after:?} while {operation}")]
    Timeout {
        /// What the relay was waiting for.
        operation: String,
        /// The bound that was exceeded.
        after: Duration,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Config(_) => 400,
            Error::Validation(_) => 400,
            Error::Auth { .. } => 401,
            Error::Connectivity { .. } => 502,
            Error::Dispatch(_) => 500,
            Error::OriginUnavailable { .. } => 502,
            Error::OriginStatus { status, .. } => *status,
            Error::Timeout { .. } => 504,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Stable snake_case identifier for the error category.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::Validation(_) => "validation_error",
            Error::Auth { .. } => "auth_error",
            Error::Connectivity { .. } => "connectivity_error",
            Error::Dispatch(_) => "dispatch_error",
            Error::OriginUnavailable { .. } => "origin_unavailable",
            Error::OriginStatus { .. } => "origin_status",
            Error::Timeout { .. } => "timeout",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::Auth`].
    pub fn auth(host: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Auth {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Connectivity`].
    pub fn connectivity(target: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Connectivity {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::OriginUnavailable`].
    pub fn origin_unavailable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::OriginUnavailable {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Timeout`].
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            after,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
