//! mr-hls: the HLS relay protocol layer.
//!
//! - [`PlaylistRewriter`] rewrites bare playlist/segment references so they
//!   are re-requested through the relay.
//! - [`RelayResource`] maps a validated `(stream, filename)` pair onto the
//!   origin's URL space.
//! - [`OriginFetcher`] performs bounded GETs against the origin and exposes
//!   the body as a byte stream.

pub mod fetch;
pub mod playlist;
pub mod resource;

pub use fetch::{OriginFetcher, OriginResponse};
pub use playlist::{PlaylistRewriter, PROXY_SEGMENT_PREFIX};
pub use resource::RelayResource;

use mr_core::ids::ResourceKind;

/// MIME type for HLS playlists.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// MIME type for MPEG-TS segments.
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// Content type served for a resource of the given kind.
pub fn content_type_for(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Playlist => PLAYLIST_CONTENT_TYPE,
        ResourceKind::Segment => SEGMENT_CONTENT_TYPE,
    }
}
