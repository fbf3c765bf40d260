//! Catalog wire format.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One map as listed by a catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapItem {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub difficulties: Option<Vec<String>>,
    #[serde(default)]
    pub mapper: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
}

impl MapItem {
    /// Publish time as unix seconds, if present and parseable.
    pub fn published_at_sec(&self) -> Option<i64> {
        self.published_at.as_deref().and_then(parse_timestamp)
    }

    /// Non-empty content hash.
    pub fn content_hash(&self) -> Option<&str> {
        self.hash.as_deref().map(str::trim).filter(|h| !h.is_empty())
    }

    /// Trimmed file name, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.filename.as_deref().map(str::trim).filter(|f| !f.is_empty())
    }
}

/// One page of a catalog listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MapPage {
    #[serde(default)]
    pub data: Vec<MapItem>,

    /// Total number of pages for the query.
    #[serde(default)]
    pub pagecount: u32,
}

/// Parse a catalog timestamp leniently.
///
/// Accepts RFC 3339 and naive `YYYY-MM-DDTHH:MM:SS[.fff]` or
/// `YYYY-MM-DD HH:MM:SS` forms, the latter taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc().timestamp())
}

/// Format unix seconds as `YYYY-MM-DDTHH:MM:SS.fffZ` for catalog filters.
pub fn format_iso(sec: i64) -> String {
    to_utc(sec).format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Format unix seconds as `YYYY-MM-DDTHH:MM:SS`.
pub fn format_plain(sec: i64) -> String {
    to_utc(sec).format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn to_utc(sec: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(sec, 0).unwrap_or(DateTime::UNIX_EPOCH)
}
