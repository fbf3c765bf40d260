//! Filename-keyed map metadata with online fallback.
//!
//! Lookups go cache, then the primary catalog, then (optionally) the
//! secondary catalog. An entry with a known publish time is authoritative;
//! a partial entry is only returned when the remote tiers come up empty.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::catalog::item::{MapItem, MapPage};
use crate::http::Fetch;
use crate::store::fs;

/// Metadata for one map, keyed by its trimmed file name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedMetadata {
    #[serde(default, alias = "FileName")]
    pub file_name: String,
    #[serde(default, alias = "DownloadedPath")]
    pub downloaded_path: Option<PathBuf>,
    #[serde(default, alias = "Hash")]
    pub hash: Option<String>,
    #[serde(default, alias = "MapName")]
    pub map_name: Option<String>,
    #[serde(default, alias = "SongArtist")]
    pub song_artist: Option<String>,
    #[serde(default, alias = "Duration")]
    pub duration: Option<String>,
    #[serde(default, alias = "Mapper")]
    pub mapper: Option<String>,
    /// Unix seconds, 0 if unknown.
    #[serde(default, alias = "PublishedAtTimestampSec")]
    pub published_at_sec: i64,
    /// `None` when the supported difficulties are unknown.
    #[serde(default, alias = "SupportedDifficulties")]
    pub difficulties: Option<Vec<String>>,
}

impl CachedMetadata {
    /// Entries with a publish time are complete and need no remote check.
    pub fn is_fresh(&self) -> bool {
        self.published_at_sec > 0
    }

    pub fn from_item(item: &MapItem) -> Self {
        Self {
            file_name: item.file_name().unwrap_or_default().to_string(),
            downloaded_path: None,
            hash: item.content_hash().map(str::to_string),
            map_name: item.title.clone(),
            song_artist: item.artist.clone(),
            duration: item.duration.clone(),
            mapper: item.mapper.clone(),
            published_at_sec: item.published_at_sec().unwrap_or(0),
            difficulties: item.difficulties.clone(),
        }
    }

    /// True if the entry supports any of `wanted`. Unknown difficulties never match.
    pub fn matches_difficulties(&self, wanted: &[String]) -> bool {
        match &self.difficulties {
            Some(have) => have
                .iter()
                .any(|d| wanted.iter().any(|w| w.eq_ignore_ascii_case(d))),
            None => false,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(default)]
    metadata_by_file_name: HashMap<String, CachedMetadata>,
}

/// In-memory metadata cache backed by a JSON file.
pub struct MetadataCache {
    path: PathBuf,
    fetch: Arc<dyn Fetch>,
    primary_url: Option<String>,
    secondary_url: Option<String>,
    entries: HashMap<String, CachedMetadata>,
    dirty: bool,
}

impl MetadataCache {
    /// Cache backed by `path` with no remote tiers.
    pub fn new(path: PathBuf, fetch: Arc<dyn Fetch>) -> Self {
        Self {
            path,
            fetch,
            primary_url: None,
            secondary_url: None,
            entries: HashMap::new(),
            dirty: false,
        }
    }

    /// Enable lookups against the primary catalog at `base`.
    pub fn with_primary(mut self, base: impl Into<String>) -> Self {
        self.primary_url = Some(base.into());
        self
    }

    /// Enable lookups against the secondary catalog at `base`.
    pub fn with_secondary(mut self, base: impl Into<String>) -> Self {
        self.secondary_url = Some(base.into());
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache-only lookup.
    pub fn peek(&self, file_name: &str) -> Option<&CachedMetadata> {
        self.entries.get(file_name.trim())
    }

    /// Add an entry. Existing entries are only replaced when `overwrite` is set.
    pub fn add(&mut self, metadata: CachedMetadata, overwrite: bool) -> bool {
        let key = metadata.file_name.trim().to_string();
        if key.is_empty() {
            return false;
        }
        if !overwrite && self.entries.contains_key(&key) {
            return false;
        }

        self.entries.insert(key, metadata);
        self.dirty = true;
        true
    }

    /// Record where a map ended up on disk.
    pub fn set_downloaded_path(&mut self, file_name: &str, path: PathBuf) {
        if let Some(entry) = self.entries.get_mut(file_name.trim()) {
            entry.downloaded_path = Some(path);
            self.dirty = true;
        }
    }

    /// Look up metadata for `file_name`, consulting remote tiers unless a fresh entry is cached.
    ///
    /// Each enabled tier is tried at most once, bounded by `timeout`.
    pub async fn get(&mut self, file_name: &str, timeout: Duration) -> Option<CachedMetadata> {
        let key = file_name.trim();
        let cached = self.entries.get(key).cloned();
        if let Some(entry) = cached.as_ref().filter(|e| e.is_fresh()) {
            return Some(entry.clone());
        }

        let escaped = urlencoding::encode(key);
        let mut found = None;

        if let Some(base) = &self.primary_url {
            let url = format!("{}/api/beatmaps?s={{\"filename\":\"{}\"}}", base, escaped);
            match self.fetch.get_string(&url, timeout).await {
                Ok(body) if !body.trim().is_empty() => match serde_json::from_str::<MapPage>(&body) {
                    Ok(page) if page.data.len() == 1 => {
                        found = Some(CachedMetadata::from_item(&page.data[0]));
                    }
                    Ok(page) => {
                        debug!(file = %key, matches = page.data.len(), "No unique primary match");
                    }
                    Err(e) => warn!(file = %key, error = %e, "Unreadable primary metadata"),
                },
                Ok(_) => {}
                Err(e) => warn!(file = %key, error = %e, "Primary metadata lookup failed"),
            }
        }

        if found.is_none() {
            if let Some(base) = &self.secondary_url {
                let url = format!("{}/beatmaps/{}", base, escaped);
                match self.fetch.get_string(&url, timeout).await {
                    Ok(body) if !body.trim().is_empty() => {
                        match serde_json::from_str::<CachedMetadata>(&body) {
                            Ok(meta) => found = Some(meta),
                            Err(e) => warn!(file = %key, error = %e, "Unreadable secondary metadata"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(file = %key, error = %e, "Secondary metadata lookup failed"),
                }
            }
        }

        match found {
            Some(mut meta) => {
                if meta.file_name.trim().is_empty() {
                    meta.file_name = key.to_string();
                }
                // Keep the local location the remote record cannot know.
                if meta.downloaded_path.is_none() {
                    meta.downloaded_path = cached.and_then(|c| c.downloaded_path);
                }
                self.add(meta.clone(), true);
                Some(meta)
            }
            None => cached,
        }
    }

    /// Save to disk if anything changed. Returns false on failure.
    pub fn persist(&mut self) -> bool {
        if !self.dirty {
            return true;
        }
        self.dirty = false;
        debug!(entries = self.entries.len(), "Persisting map metadata");

        let doc = CacheDocumentRef {
            metadata_by_file_name: &self.entries,
        };
        let result = serde_json::to_vec_pretty(&doc)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write_atomic(&self.path, &json).map_err(|e| e.to_string()));

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to save metadata cache");
                self.dirty = true;
                false
            }
        }
    }

    /// Load from disk. A missing or unreadable file leaves the cache empty.
    pub fn load(&mut self) {
        let doc = match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice::<CacheDocument>(&bytes).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "Corrupt metadata cache, starting empty");
                CacheDocument::default()
            }),
            Err(_) => CacheDocument::default(),
        };

        self.entries = doc.metadata_by_file_name;
        for (key, entry) in self.entries.iter_mut() {
            if entry.file_name.trim().is_empty() {
                entry.file_name = key.clone();
            }
        }
        self.dirty = false;
        info!(entries = self.entries.len(), "Metadata cache loaded");
    }
}

#[derive(Serialize)]
struct CacheDocumentRef<'a> {
    metadata_by_file_name: &'a HashMap<String, CachedMetadata>,
}
