//! Content-addressed registry of local map files.
//!
//! Keeps at most one [`MapRecord`] per content hash and one per file path,
//! persisted as a single JSON document rewritten through a temp file and a
//! rename. Mutations set a dirty flag so periodic saves are cheap when
//! nothing changed.

pub mod fs;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::catalog::item::MapItem;
use crate::inspect::MapInspector;

use self::fs::WriteError;

/// Files processed between checkpoint saves during a disk refresh.
const REFRESH_CHECKPOINT: usize = 100;

/// Errors that can occur in store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Write error: {0}")]
    Write(#[from] WriteError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A map file known to be on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapRecord {
    /// Catalog id, 0 if unknown.
    #[serde(default)]
    pub id: i64,
    pub hash: String,
    pub file_path: PathBuf,
    /// Publish time in unix seconds, 0 if unknown.
    #[serde(default)]
    pub published_at_sec: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub mapper: String,
    #[serde(default)]
    pub difficulties: Vec<String>,
}

impl MapRecord {
    /// Build a record for a catalog item saved at `file_path`.
    pub fn from_item(item: &MapItem, hash: String, file_path: PathBuf) -> Self {
        Self {
            id: item.id,
            hash,
            file_path,
            published_at_sec: item.published_at_sec().unwrap_or(0),
            title: item.title.clone().unwrap_or_default(),
            artist: item.artist.clone().unwrap_or_default(),
            mapper: item.mapper.clone().unwrap_or_default(),
            difficulties: item.difficulties.clone().unwrap_or_default(),
        }
    }
}

/// On-disk document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    maps: Vec<MapRecord>,
    #[serde(default)]
    last_fetch_timestamp_sec: i64,
}

/// Durable registry of local maps, indexed by hash and by path.
pub struct LocalStore {
    path: PathBuf,
    maps: Vec<MapRecord>,
    by_hash: HashMap<String, usize>,
    by_path: HashMap<PathBuf, usize>,
    last_fetch_sec: i64,
    dirty: bool,
}

impl LocalStore {
    /// Create an empty store backed by `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            maps: Vec::new(),
            by_hash: HashMap::new(),
            by_path: HashMap::new(),
            last_fetch_sec: 0,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_from_path(&self, path: &Path) -> Option<&MapRecord> {
        self.by_path.get(path).map(|&i| &self.maps[i])
    }

    pub fn get_from_hash(&self, hash: &str) -> Option<&MapRecord> {
        self.by_hash.get(hash).map(|&i| &self.maps[i])
    }

    pub fn contains_hash(&self, hash: &str) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn records(&self) -> &[MapRecord] {
        &self.maps
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Insert a record, replacing any record with the same path or hash.
    pub fn insert(&mut self, record: MapRecord) {
        if let Some(&idx) = self.by_path.get(&record.file_path) {
            debug!(path = %record.file_path.display(), "Replacing map with existing path");
            self.remove_at(idx);
        }
        if let Some(&idx) = self.by_hash.get(&record.hash) {
            debug!(hash = %record.hash, "Replacing map with matching hash");
            self.remove_at(idx);
        }

        let idx = self.maps.len();
        self.by_path.insert(record.file_path.clone(), idx);
        self.by_hash.insert(record.hash.clone(), idx);
        self.maps.push(record);
        self.dirty = true;
    }

    /// Remove every record whose hash is not in `present`.
    pub fn reconcile(&mut self, present: &HashSet<String>) -> usize {
        let before = self.maps.len();
        self.maps.retain(|record| {
            let keep = present.contains(&record.hash);
            if !keep {
                debug!(path = %record.file_path.display(), "Map missing on disk, removing");
            }
            keep
        });

        let removed = before - self.maps.len();
        if removed > 0 {
            self.rebuild_indices();
            self.dirty = true;
        }
        removed
    }

    /// Catalog items whose hash is not yet stored. Items without a hash are dropped.
    pub fn filter_out_existing(&self, items: Vec<MapItem>) -> Vec<MapItem> {
        items
            .into_iter()
            .filter(|item| match item.content_hash() {
                Some(hash) => !self.contains_hash(hash),
                None => false,
            })
            .collect()
    }

    /// Unix seconds of the last completed full fetch, 0 if never.
    pub fn last_fetch(&self) -> i64 {
        self.last_fetch_sec
    }

    pub fn set_last_fetch(&mut self, sec: i64) {
        self.last_fetch_sec = sec;
        self.dirty = true;
    }

    /// Save to disk. Skipped when clean unless `force` is set.
    ///
    /// Returns false on failure, in which case the store stays dirty.
    pub fn persist(&mut self, force: bool) -> bool {
        if !force && !self.dirty {
            debug!("Skipping store save, not dirty");
            return true;
        }

        let was_dirty = self.dirty;
        self.dirty = false;

        match self.write() {
            Ok(()) => {
                debug!(maps = self.maps.len(), "Store saved");
                true
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to save store");
                self.dirty = was_dirty || force;
                false
            }
        }
    }

    fn write(&self) -> Result<()> {
        let doc = StoreDocumentRef {
            maps: &self.maps,
            last_fetch_timestamp_sec: self.last_fetch_sec,
        };
        let json = serde_json::to_vec_pretty(&doc)?;
        fs::write_atomic(&self.path, &json)?;
        Ok(())
    }

    /// Load from disk, creating an empty file first if none exists.
    ///
    /// A document that fails to parse leaves the store empty.
    pub fn load(&mut self) {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "Store file missing, creating");
            self.persist(true);
        }

        match self.read() {
            Ok(doc) => {
                self.maps = doc.maps;
                self.last_fetch_sec = doc.last_fetch_timestamp_sec;
                self.rebuild_indices();
                info!(maps = self.maps.len(), "Store loaded");
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to load store");
                self.maps.clear();
                self.last_fetch_sec = 0;
                self.rebuild_indices();
            }
        }
    }

    fn read(&self) -> Result<StoreDocument> {
        let bytes = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Bring the store in line with the map files in `content_dir`.
    ///
    /// Known paths keep their record, new files are inspected and added, and
    /// records whose files are gone are dropped.
    pub async fn refresh_from_disk(
        &mut self,
        content_dir: &Path,
        extension: &str,
        inspector: &dyn MapInspector,
    ) -> Result<()> {
        tokio::fs::create_dir_all(content_dir).await?;

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(content_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches = path
                .file_name()
                .map(|n| n.to_string_lossy().ends_with(extension))
                .unwrap_or(false);
            if matches && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }

        info!(files = files.len(), dir = %content_dir.display(), "Refreshing store from disk");

        let mut seen = HashSet::with_capacity(files.len());
        for (i, path) in files.iter().enumerate() {
            if let Some(existing) = self.get_from_path(path) {
                seen.insert(existing.hash.clone());
            } else {
                match inspector.inspect(path) {
                    Ok(mut record) => {
                        record.file_path = path.clone();
                        seen.insert(record.hash.clone());
                        self.insert(record);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to inspect map, skipping");
                    }
                }
            }

            if (i + 1) % REFRESH_CHECKPOINT == 0 {
                debug!(processed = i + 1, "Refresh checkpoint");
                self.persist(false);
                tokio::task::yield_now().await;
            }
        }

        let removed = self.reconcile(&seen);
        if removed > 0 {
            info!(removed, "Removed maps no longer on disk");
        }
        self.persist(false);
        Ok(())
    }

    fn remove_at(&mut self, idx: usize) {
        let removed = self.maps.swap_remove(idx);
        self.by_path.remove(&removed.file_path);
        self.by_hash.remove(&removed.hash);

        // The former last element now sits at idx.
        if let Some(moved) = self.maps.get(idx) {
            self.by_path.insert(moved.file_path.clone(), idx);
            self.by_hash.insert(moved.hash.clone(), idx);
        }
    }

    fn rebuild_indices(&mut self) {
        self.by_path.clear();
        self.by_hash.clear();

        // Later duplicates win, matching insert semantics.
        let mut deduped: Vec<MapRecord> = Vec::with_capacity(self.maps.len());
        for record in std::mem::take(&mut self.maps) {
            if let Some(&idx) = self.by_path.get(&record.file_path) {
                self.swap_out(&mut deduped, idx);
            }
            if let Some(&idx) = self.by_hash.get(&record.hash) {
                self.swap_out(&mut deduped, idx);
            }
            let idx = deduped.len();
            self.by_path.insert(record.file_path.clone(), idx);
            self.by_hash.insert(record.hash.clone(), idx);
            deduped.push(record);
        }
        self.maps = deduped;
    }

    fn swap_out(&mut self, maps: &mut Vec<MapRecord>, idx: usize) {
        let removed = maps.swap_remove(idx);
        self.by_path.remove(&removed.file_path);
        self.by_hash.remove(&removed.hash);
        if let Some(moved) = maps.get(idx) {
            self.by_path.insert(moved.file_path.clone(), idx);
            self.by_hash.insert(moved.hash.clone(), idx);
        }
    }
}

#[derive(Serialize)]
struct StoreDocumentRef<'a> {
    maps: &'a [MapRecord],
    last_fetch_timestamp_sec: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeInspector;

    fn record(hash: &str, path: &str) -> MapRecord {
        MapRecord {
            hash: hash.to_string(),
            file_path: PathBuf::from(path),
            ..Default::default()
        }
    }

    fn assert_consistent(store: &LocalStore) {
        let hashes: HashSet<_> = store.records().iter().map(|r| &r.hash).collect();
        let paths: HashSet<_> = store.records().iter().map(|r| &r.file_path).collect();
        assert_eq!(hashes.len(), store.len());
        assert_eq!(paths.len(), store.len());
        for r in store.records() {
            assert_eq!(store.get_from_hash(&r.hash), Some(r));
            assert_eq!(store.get_from_path(&r.file_path), Some(r));
        }
    }

    #[test]
    fn test_hash_and_path_replacement() {
        let mut store = LocalStore::new(PathBuf::from("unused.json"));

        store.insert(record("abc", "a.map"));
        store.insert(record("abc", "b.map"));

        assert_eq!(store.len(), 1);
        assert!(store.get_from_path(Path::new("a.map")).is_none());
        assert_eq!(
            store.get_from_hash("abc").map(|r| r.file_path.clone()),
            Some(PathBuf::from("b.map"))
        );

        store.insert(record("def", "b.map"));
        assert_eq!(store.len(), 1);
        assert!(store.get_from_hash("abc").is_none());
        assert_consistent(&store);
    }

    #[test]
    fn test_insert_evicting_two_records() {
        let mut store = LocalStore::new(PathBuf::from("unused.json"));
        store.insert(record("h1", "one.map"));
        store.insert(record("h2", "two.map"));
        store.insert(record("h3", "three.map"));

        // Collides with h1 by path and h3 by hash.
        store.insert(record("h3", "one.map"));

        assert_eq!(store.len(), 2);
        assert!(store.get_from_path(Path::new("three.map")).is_none());
        assert_consistent(&store);
    }

    #[test]
    fn test_reconcile_only_dirty_on_removal() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LocalStore::new(dir.path().join("db.json"));
        store.insert(record("keep", "k.map"));
        store.insert(record("gone", "g.map"));
        assert!(store.persist(false));
        assert!(!store.is_dirty());

        let present: HashSet<String> = ["keep".to_string(), "gone".to_string()].into();
        assert_eq!(store.reconcile(&present), 0);
        assert!(!store.is_dirty());

        let present: HashSet<String> = ["keep".to_string()].into();
        assert_eq!(store.reconcile(&present), 1);
        assert!(store.is_dirty());
        assert!(store.get_from_hash("gone").is_none());
        assert_consistent(&store);
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        let mut store = LocalStore::new(path.clone());
        store.insert(record("abc", "a.map"));
        store.set_last_fetch(1_700_000_000);
        assert!(store.persist(false));

        let mut loaded = LocalStore::new(path.clone());
        loaded.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.last_fetch(), 1_700_000_000);
        assert!(loaded.get_from_path(Path::new("a.map")).is_some());

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(json["maps"].is_array());
        assert_eq!(json["last_fetch_timestamp_sec"], 1_700_000_000);
    }

    #[test]
    fn test_load_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.json");

        let mut store = LocalStore::new(path.clone());
        store.load();

        assert!(path.exists());
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let mut store = LocalStore::new(path);
        store.load();
        assert!(store.is_empty());
    }

    #[test]
    fn test_persist_failure_keeps_canonical_file_and_dirty_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        let mut store = LocalStore::new(path.clone());
        store.insert(record("abc", "a.map"));
        assert!(store.persist(false));
        let before = std::fs::read(&path).unwrap();

        // Swap the canonical file for a non-empty directory so the rename fails.
        let moved = dir.path().join("db.json.bak");
        std::fs::rename(&path, &moved).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();

        store.insert(record("def", "d.map"));
        assert!(!store.persist(false));
        assert!(store.is_dirty());
        assert!(path.join("keep").exists());

        // Restore and retry: the pending change lands.
        std::fs::remove_dir_all(&path).unwrap();
        std::fs::rename(&moved, &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert!(store.persist(false));

        let mut loaded = LocalStore::new(path);
        loaded.load();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_filter_out_existing() {
        let mut store = LocalStore::new(PathBuf::from("unused.json"));
        store.insert(record("have", "have.map"));

        let items = vec![
            MapItem { hash: Some("have".into()), ..Default::default() },
            MapItem { hash: Some("new".into()), ..Default::default() },
            MapItem { hash: None, ..Default::default() },
            MapItem { hash: Some("  ".into()), ..Default::default() },
        ];

        let remaining = store.filter_out_existing(items);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].hash.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_refresh_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let content = dir.path().join("content");
        std::fs::create_dir_all(&content).unwrap();
        std::fs::write(content.join("a.synth"), b"aaa").unwrap();
        std::fs::write(content.join("b.synth"), b"bbb").unwrap();
        std::fs::write(content.join("bad.synth"), b"").unwrap();
        std::fs::write(content.join("notes.txt"), b"ignored").unwrap();

        let mut store = LocalStore::new(dir.path().join("db.json"));
        store.insert(record("stale", content.join("deleted.synth").to_str().unwrap()));

        let inspector = FakeInspector::default();
        store.refresh_from_disk(&content, ".synth", &inspector).await.unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get_from_hash("stale").is_none());
        assert!(store.get_from_path(&content.join("a.synth")).is_some());
        assert_eq!(inspector.calls(), 3);

        // Second run inspects nothing new.
        store.refresh_from_disk(&content, ".synth", &inspector).await.unwrap();
        assert_eq!(inspector.calls(), 4);
        assert_eq!(store.len(), 2);
        assert_consistent(&store);
    }
}
