//! # mr-remote
//!
//! Remote process launching for the relay.
//!
//! This crate provides:
//!
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for running the local `ssh` client.
//! - **Credentials** ([`KeyMaterial`]) -- private key resolved once at
//!   startup, from a file or from PEM text in the environment.
//! - **Sessions** ([`RemoteConnector`], [`RemoteSession`]) -- one
//!   authenticated channel per start request; [`SshConnector`] implements
//!   them on top of an OpenSSH ControlMaster socket.
//! - **Launching** ([`RemoteProcessLauncher`]) -- issues a detached command
//!   and reports whether the remote shell accepted it.

pub mod command;
pub mod credential;
pub mod launcher;
pub mod session;
pub mod ssh;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use credential::KeyMaterial;
pub use launcher::{LaunchOutcome, RemoteProcessLauncher};
pub use session::{RemoteConnector, RemoteSession, RemoteTarget};
pub use ssh::{SshConnector, SshSession};
