//! Playlist reference rewriting.
//!
//! Only URI lines are touched, and only when the URI is a bare filename the
//! relay can serve. Everything else, including the line endings, is copied
//! through byte-for-byte.

use mr_core::{RelayFileName, StreamId};

/// Path prefix of the relay's segment route.
pub const PROXY_SEGMENT_PREFIX: &str = "/proxy/segment";

/// Rewrites playlist references to relay-local paths.
///
/// Stateless; one instance can be shared by any number of requests.
#[derive(Debug, Clone)]
pub struct PlaylistRewriter {
    prefix: String,
}

impl Default for PlaylistRewriter {
    fn default() -> Self {
        Self::new(PROXY_SEGMENT_PREFIX)
    }
}

impl PlaylistRewriter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Rewrite every bare `*.m3u8` / `*.ts` reference in `text` to
    /// `{prefix}/{stream}/{filename}`, keeping query strings and fragments.
    ///
    /// Applying it to its own output is a no-op.
    pub fn rewrite(&self, text: &str, stream: &StreamId) -> String {
        let mut out = String::with_capacity(text.len() + 128);

        for line in text.split_inclusive('\n') {
            let (body, ending) = split_line_ending(line);
            match self.rewrite_line(body, stream) {
                Some(rewritten) => out.push_str(&rewritten),
                None => out.push_str(body),
            }
            out.push_str(ending);
        }

        out
    }

    /// Relay path for `file` under `stream`.
    pub fn relay_path(&self, stream: &StreamId, file: &RelayFileName) -> String {
        format!("{}/{}/{}", self.prefix, stream, file)
    }

    fn rewrite_line(&self, line: &str, stream: &StreamId) -> Option<String> {
        let uri = line.trim();
        if uri.is_empty() || uri.starts_with('#') {
            return None;
        }

        let start = line.len() - line.trim_start().len();
        let end = start + uri.len();

        let split = uri.find(['?', '#']).unwrap_or(uri.len());
        let (path, suffix) = uri.split_at(split);

        // Already relayed, absolute, or nested under a directory.
        if path.starts_with(&self.prefix) || path.contains('/') {
            return None;
        }

        let file = RelayFileName::parse(path).ok()?;

        Some(format!(
            "{}{}{}{}",
            &line[..start],
            self.relay_path(stream, &file),
            suffix,
            &line[end..]
        ))
    }
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}
