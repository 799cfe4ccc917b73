//! Route handlers for the HTTP API.

pub mod health;
pub mod proxy;
pub mod start;
