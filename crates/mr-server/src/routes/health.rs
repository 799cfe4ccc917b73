//! Liveness and readiness.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::context::AppContext;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` when `/start-mt` can run, `degraded` otherwise.
    pub status: &'static str,
    pub timestamp: String,
    pub launch_ready: bool,
    pub origin_configured: bool,
    pub missing: Vec<&'static str>,
    pub version: &'static str,
}

/// GET /health
pub async fn health_check(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    let missing = ctx.missing_launch_fields();
    let launch_ready = missing.is_empty();

    Json(HealthResponse {
        status: if launch_ready { "ok" } else { "degraded" },
        timestamp: chrono::Utc::now().to_rfc3339(),
        launch_ready,
        origin_configured: ctx.origin_base.is_some(),
        missing,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /
pub async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "mtxrelay is running" }))
}
