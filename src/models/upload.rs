//! Upload session models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default lifetime of an upload session.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 3600;

/// Handle scoping a sequence of range uploads to one remote item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: String,
    pub item_id: String,
    /// Absolute URL accepting range PUTs, when the store is reached over HTTP.
    pub upload_url: Option<String>,
    pub expiration: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(item_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            item_id: item_id.into(),
            upload_url: None,
            expiration: Utc::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expiration
    }
}

/// Placement descriptor for one range upload: bytes `start..=end` of an
/// object that is `total` bytes long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    start: u64,
    end: u64,
    total: u64,
}

impl ContentRange {
    /// Returns None unless `start <= end < total`.
    pub fn new(start: u64, end: u64, total: u64) -> Option<Self> {
        if start > end || end >= total {
            return None;
        }
        Some(Self { start, end, total })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last byte carried, inclusive.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Length of the whole object.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of bytes the range carries.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Formats the range as a `Content-Range` header value.
    pub fn to_header(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }

    /// Parses a `Content-Range` header value of the form `bytes S-E/T`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().strip_prefix("bytes ")?;
        let (span, total) = value.split_once('/')?;
        let (start, end) = span.split_once('-')?;
        Self::new(
            start.trim().parse().ok()?,
            end.trim().parse().ok()?,
            total.trim().parse().ok()?,
        )
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_header())
    }
}
