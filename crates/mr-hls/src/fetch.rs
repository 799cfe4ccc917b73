//! Bounded HTTP fetches against the origin.
//!
//! The client is built once and shared. The wait for the response head is
//! bounded by `fetch_timeout`, each body chunk by `idle_timeout`, and the
//! TCP connect by `connect_timeout`; none of them is optional.

use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use mr_core::config::OriginConfig;
use mr_core::{Error, Result};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use url::Url;

/// Performs single GET requests against the origin.
#[derive(Debug, Clone)]
pub struct OriginFetcher {
    client: reqwest::Client,
    fetch_timeout: Duration,
    idle_timeout: Duration,
}

impl OriginFetcher {
    pub fn new(
        connect_timeout: Duration,
        fetch_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("mtxrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            fetch_timeout,
            idle_timeout,
        })
    }

    pub fn from_config(origin: &OriginConfig) -> Result<Self> {
        Self::new(
            origin.connect_timeout(),
            origin.fetch_timeout(),
            origin.idle_timeout(),
        )
    }

    /// GET `url` and return once the response head has arrived.
    ///
    /// Non-success statuses are returned as-is; only transport failures and
    /// timeouts are errors.
    pub async fn fetch(&self, url: &Url) -> Result<OriginResponse> {
        tracing::debug!(url = %url, "Fetching from origin");

        let send = self.client.get(url.clone()).send();
        let response = match tokio::time::timeout(self.fetch_timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(map_reqwest_error(url, e, self.fetch_timeout)),
            Err(_elapsed) => {
                return Err(Error::timeout(
                    format!("waiting for origin response from {url}"),
                    self.fetch_timeout,
                ))
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url = %url, status = %status, "Origin returned non-success status");
        }

        Ok(OriginResponse {
            url: url.to_string(),
            status,
            headers: response.headers().clone(),
            response,
            read_timeout: self.fetch_timeout,
            idle_timeout: self.idle_timeout,
        })
    }
}

fn map_reqwest_error(url: &Url, e: reqwest::Error, after: Duration) -> Error {
    if e.is_timeout() {
        Error::timeout(format!("fetching {url}"), after)
    } else if e.is_connect() {
        Error::origin_unavailable(url.as_str(), format!("connection failed: {e}"))
    } else {
        Error::origin_unavailable(url.as_str(), e.to_string())
    }
}

/// An origin response whose body has not been read yet.
#[derive(Debug)]
pub struct OriginResponse {
    url: String,
    status: StatusCode,
    headers: HeaderMap,
    response: reqwest::Response,
    read_timeout: Duration,
    idle_timeout: Duration,
}

impl OriginResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Read the whole body as UTF-8 text. Meant for playlists, which are
    /// small; segments go through [`OriginResponse::into_byte_stream`].
    pub async fn text(self) -> Result<String> {
        let url = self.url;
        match tokio::time::timeout(self.read_timeout, self.response.text()).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(Error::origin_unavailable(url, format!("unreadable body: {e}"))),
            Err(_elapsed) => Err(Error::timeout(
                format!("reading playlist body from {url}"),
                self.read_timeout,
            )),
        }
    }

    /// Stream the body chunk by chunk.
    ///
    /// Nothing is buffered beyond the chunk in flight: the next chunk is only
    /// requested from the origin when the consumer polls. Dropping the stream
    /// drops the origin connection. A chunk that takes longer than the idle
    /// timeout ends the stream with an error.
    pub fn into_byte_stream(self) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
        let url = self.url;
        let idle = self.idle_timeout;
        let mut body = Box::pin(self.response.bytes_stream());

        async_stream::try_stream! {
            loop {
                let next = tokio::time::timeout(idle, body.next()).await.map_err(|_| {
                    tracing::warn!(url = %url, "Origin stalled mid-body for {idle:?}");
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "origin stalled")
                })?;

                match next {
                    Some(chunk) => {
                        let chunk = chunk.map_err(|e| {
                            tracing::warn!(url = %url, "Origin body failed mid-stream: {e}");
                            std::io::Error::new(std::io::ErrorKind::Other, e)
                        })?;
                        yield chunk;
                    }
                    None => break,
                }
            }
        }
    }
}
