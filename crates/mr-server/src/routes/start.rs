//! Remote start of the origin media process.

use axum::extract::State;
use axum::{Extension, Json};
use mr_core::config::Config;
use serde::{Deserialize, Serialize};

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub message: String,
    /// Relay playlist URL for every configured stream.
    pub streams: Vec<String>,
}

/// POST /start-mt
///
/// Opens a fresh session, issues the detached start command and returns as
/// soon as the remote shell has accepted it. Re-running is safe as long as
/// the configured command is; no check for a running instance is made.
pub async fn start_mt(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<StartResponse>, AppError> {
    let target = ctx.remote_target().map_err(|e| request_id.error(e))?;
    let command = ctx.config.remote.start_command.as_deref().unwrap_or_default();

    tracing::info!(destination = %target.destination(), "Starting origin media process");

    let session = ctx
        .launcher
        .open_session(&target)
        .await
        .map_err(|e| request_id.error(e))?;

    ctx.launcher
        .launch(session, command)
        .await
        .into_result()
        .map_err(|e| request_id.error(e))?;

    Ok(Json(StartResponse {
        message: "MediaMTX started successfully".into(),
        streams: stream_urls(&ctx.config),
    }))
}

/// Relay playlist URLs for the configured streams, absolute when a public
/// base URL is configured.
pub fn stream_urls(config: &Config) -> Vec<String> {
    let base = config
        .server
        .public_base_url
        .as_deref()
        .map(|b| b.trim().trim_end_matches('/'))
        .unwrap_or_default();

    config
        .origin
        .streams
        .iter()
        .map(|id| format!("{base}/proxy/stream/{id}"))
        .collect()
}
