//! HLS relay routes.
//!
//! Playlists are read whole, rewritten and returned. Segments (and nested
//! playlists requested through the segment route) are piped straight
//! through: the response body pulls from the origin only as fast as the
//! client reads, and a client disconnect drops the origin request.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use mr_core::{Error, StreamId};
use mr_hls::{content_type_for, RelayResource, PLAYLIST_CONTENT_TYPE};

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

const NO_CACHE: &str = "no-cache";

/// GET /proxy/stream/{stream_id}
pub async fn stream_playlist(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Path(stream_id): Path<String>,
) -> Result<Response, AppError> {
    relay_playlist(&ctx, &stream_id)
        .await
        .map_err(|e| request_id.error(e))
}

async fn relay_playlist(ctx: &AppContext, raw_id: &str) -> mr_core::Result<Response> {
    let stream = StreamId::parse(raw_id)?;
    let resource = RelayResource::playlist(stream, &ctx.config.origin.playlist_name)?;
    let url = resource.origin_url(ctx.origin_base()?)?;

    let origin = ctx.fetcher.fetch(&url).await?;
    let status = origin.status();
    if !status.is_success() {
        return Err(Error::OriginStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let text = origin.text().await?;
    let rewritten = ctx.rewriter.rewrite(&text, resource.stream());
    tracing::debug!(stream = %resource.stream(), bytes = rewritten.len(), "Relayed playlist");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
            (header::CACHE_CONTROL, NO_CACHE),
        ],
        rewritten,
    )
        .into_response())
}

/// GET /proxy/segment/{stream_id}/{filename}
///
/// The origin's status is kept, including error statuses, whose bodies are
/// passed through as well. Errors before the first byte become JSON; a
/// failure after that aborts the response body.
pub async fn segment(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Path((stream_id, filename)): Path<(String, String)>,
) -> Result<Response, AppError> {
    relay_segment(&ctx, &stream_id, &filename)
        .await
        .map_err(|e| request_id.error(e))
}

async fn relay_segment(ctx: &AppContext, raw_id: &str, raw_file: &str) -> mr_core::Result<Response> {
    let resource = RelayResource::parse(raw_id, raw_file)?;
    let url = resource.origin_url(ctx.origin_base()?)?;

    let origin = ctx.fetcher.fetch(&url).await?;
    let status = origin.status();

    let content_type = if status.is_success() {
        Some(HeaderValue::from_static(content_type_for(resource.kind())))
    } else {
        tracing::debug!(url = %url, status = %status, "Passing origin error status through");
        origin
            .content_type()
            .and_then(|ct| HeaderValue::from_str(ct).ok())
    };
    let content_length = origin.headers().get(header::CONTENT_LENGTH).cloned();

    let mut response = Response::new(Body::from_stream(origin.into_byte_stream()));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    if let Some(ct) = content_type {
        headers.insert(header::CONTENT_TYPE, ct);
    }
    if let Some(len) = content_length {
        headers.insert(header::CONTENT_LENGTH, len);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));

    Ok(response)
}
