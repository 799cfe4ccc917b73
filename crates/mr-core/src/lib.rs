//! mr-core: shared errors, configuration, and validated identifiers.
//!
//! This crate is the foundational dependency for all other mr-* crates.
//! It holds the unified [`Error`] taxonomy that the HTTP boundary maps to
//! status codes, the TOML-backed [`config::Config`], and the path-safe
//! identifier newtypes used to address origin resources.

pub mod config;
pub mod error;
pub mod ids;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::{RelayFileName, StreamId};
