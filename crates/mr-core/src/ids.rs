//! Path-safe identifiers for origin resources.
//!
//! Both types are only constructible through validation, so any value that
//! reaches URL construction is already known not to contain path separators
//! or parent-directory components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const MAX_STREAM_ID_LEN: usize = 64;
const MAX_FILE_NAME_LEN: usize = 128;

/// Name of one stream published by the origin (e.g. `stream1`).
///
/// Accepts 1 to 64 ASCII alphanumerics, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId(String);

impl StreamId {
    /// Validate and wrap a stream identifier.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw.len() > MAX_STREAM_ID_LEN {
            return Err(Error::Validation(format!(
                "stream id must be 1-{MAX_STREAM_ID_LEN} characters"
            )));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(Error::Validation(format!("invalid stream id: {raw:?}")));
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Kind of origin resource a [`RelayFileName`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// An HLS playlist (`.m3u8`).
    Playlist,
    /// An MPEG-TS media segment (`.ts`).
    Segment,
}

/// A playlist or segment filename that is safe to append to an origin path.
///
/// Must be a single path component of ASCII alphanumerics, `_`, `-` and `.`,
/// must not start with `.` or contain `..`, and must end in `.m3u8` or `.ts`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelayFileName {
    name: String,
    kind: ResourceKind,
}

impl RelayFileName {
    /// Validate and wrap a filename.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw.len() > MAX_FILE_NAME_LEN {
            return Err(Error::Validation(format!(
                "filename must be 1-{MAX_FILE_NAME_LEN} characters"
            )));
        }
        if raw.contains('/') || raw.contains('\\') || raw.contains("..") || raw.starts_with('.')
        {
            return Err(Error::Validation(format!("invalid filename: {raw:?}")));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
        {
            return Err(Error::Validation(format!("invalid filename: {raw:?}")));
        }

        let kind = match raw.rsplit_once('.') {
            Some((stem, "m3u8")) if !stem.is_empty() => ResourceKind::Playlist,
            Some((stem, "ts")) if !stem.is_empty() => ResourceKind::Segment,
            _ => {
                return Err(Error::Validation(format!(
                    "unsupported extension: {raw:?} (expected .m3u8 or .ts)"
                )))
            }
        };

        Ok(Self {
            name: raw.to_owned(),
            kind,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

macro_rules! string_id_impls {
    ($($name:ident => $field:tt),+ $(,)?) => {
        $(
            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }

            impl FromStr for $name {
                type Err = Error;

                fn from_str(s: &str) -> Result<Self> {
                    Self::parse(s)
                }
            }

            impl TryFrom<String> for $name {
                type Error = Error;

                fn try_from(s: String) -> Result<Self> {
                    Self::parse(&s)
                }
            }

            impl From<$name> for String {
                fn from(id: $name) -> Self {
                    id.$field
                }
            }

            impl AsRef<str> for $name {
                fn as_ref(&self) -> &str {
                    self.as_str()
                }
            }
        )+
    };
}

string_id_impls! {
    StreamId => 0,
    RelayFileName => name,
}
