//! mr-server: the public HTTP face of the relay.
//!
//! Ties the remote launcher and the HLS relay together behind one axum
//! router:
//!
//! - `POST /start-mt` starts the origin media process over SSH
//! - `GET /proxy/stream/{id}` and `GET /proxy/segment/{id}/{file}` relay HLS
//! - `GET /health` reports launch readiness
//!
//! [`start`] binds the listener and serves until SIGINT/SIGTERM.

pub mod context;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;

use std::net::SocketAddr;

use mr_core::config::Config;

use crate::context::AppContext;

/// Serve the relay until a shutdown signal arrives.
pub async fn start(ctx: AppContext) -> mr_core::Result<()> {
    let config = ctx.config.clone();
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| mr_core::Error::Config(format!("invalid server address: {e}")))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| mr_core::Error::Internal(format!("failed to bind to {addr}: {e}")))?;

    serve(listener, ctx).await
}

/// Serve on an already bound listener. Used by [`start`] and by tests that
/// bind port 0.
pub async fn serve(listener: tokio::net::TcpListener, ctx: AppContext) -> mr_core::Result<()> {
    log_startup(&ctx.config, &listener);

    let app = router::build_router(ctx);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| mr_core::Error::Io { source: e })?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn log_startup(config: &Config, listener: &tokio::net::TcpListener) {
    match listener.local_addr() {
        Ok(addr) => tracing::info!("Listening on {addr}"),
        Err(e) => tracing::debug!("Listener has no local address: {e}"),
    }

    match config.origin.base_url {
        Some(ref base) => tracing::info!("Relaying HLS from origin {base}"),
        None => tracing::warn!("origin.base_url is not set; proxy routes will fail"),
    }

    let missing = config.missing_launch_fields();
    if missing.is_empty() {
        tracing::info!("Remote launch configured for {} stream(s)", config.origin.streams.len());
    } else {
        tracing::warn!("Remote launch disabled, missing: {}", missing.join(", "));
    }
}

/// Wait for SIGINT or SIGTERM.
///
/// A handler that fails to install is logged and never fires; the other one
/// still does.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
