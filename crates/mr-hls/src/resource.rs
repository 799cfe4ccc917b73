//! Mapping of relay requests onto origin URLs.

use mr_core::ids::ResourceKind;
use mr_core::{Error, RelayFileName, Result, StreamId};
use url::Url;

/// One origin resource addressed through the relay: `{base}/{stream}/{file}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResource {
    stream: StreamId,
    file: RelayFileName,
}

impl RelayResource {
    pub fn new(stream: StreamId, file: RelayFileName) -> Self {
        Self { stream, file }
    }

    /// Validate raw path components from a request.
    pub fn parse(stream: &str, file: &str) -> Result<Self> {
        Ok(Self::new(StreamId::parse(stream)?, RelayFileName::parse(file)?))
    }

    /// The configured top-level playlist of `stream`.
    ///
    /// An invalid `playlist_name` is a configuration problem, not a client one.
    pub fn playlist(stream: StreamId, playlist_name: &str) -> Result<Self> {
        let file = RelayFileName::parse(playlist_name).map_err(|_| {
            Error::Config(format!("origin.playlist_name {playlist_name:?} is not a valid playlist name"))
        })?;
        Ok(Self::new(stream, file))
    }

    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    pub fn kind(&self) -> ResourceKind {
        self.file.kind()
    }

    /// Resolve against the origin base URL.
    ///
    /// Path segments are appended, so a base with a path prefix
    /// (`http://origin/hls/`) keeps it.
    pub fn origin_url(&self, base: &Url) -> Result<Url> {
        let mut url = base.clone();
        url.set_query(None);
        url.set_fragment(None);
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                Error::Config(format!("origin.base_url {base} cannot carry a path"))
            })?;
            segments
                .pop_if_empty()
                .push(self.stream.as_str())
                .push(self.file.as_str());
        }
        Ok(url)
    }
}
