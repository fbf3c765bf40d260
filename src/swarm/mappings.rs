//! Offline publish times for maps, keyed by file name and by hash.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, error, warn};

use crate::catalog::item::MapItem;

#[derive(Debug, Default)]
pub struct TimestampMappings {
    by_hash: HashMap<String, i64>,
    by_file_name: HashMap<String, i64>,
}

impl TimestampMappings {
    /// Read a JSON list of catalog items. Missing or unreadable files give empty mappings.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "No timestamp mapping file");
                return Self::default();
            }
        };

        match serde_json::from_slice::<Vec<MapItem>>(&bytes) {
            Ok(items) => {
                let mappings = Self::from_items(items);
                debug!(entries = mappings.len(), "Timestamp mappings loaded");
                mappings
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read timestamp mappings");
                Self::default()
            }
        }
    }

    pub fn from_items(items: impl IntoIterator<Item = MapItem>) -> Self {
        let mut mappings = Self::default();
        for item in items {
            mappings.add(&item);
        }
        mappings
    }

    /// Register one item. Items without a hash or publish time are ignored,
    /// and the first entry for a hash wins.
    pub fn add(&mut self, item: &MapItem) {
        let Some(hash) = item.content_hash() else {
            return;
        };
        let Some(published) = item.published_at_sec() else {
            return;
        };

        if let Some(existing) = self.by_hash.get(hash) {
            error!(hash, existing, duplicate = published, "Duplicate timestamp mapping for hash");
            return;
        }
        self.by_hash.insert(hash.to_string(), published);

        if let Some(name) = item.file_name() {
            self.by_file_name.entry(name.to_string()).or_insert(published);
        }
    }

    pub fn published_at_for_hash(&self, hash: &str) -> Option<i64> {
        self.by_hash.get(hash).copied()
    }

    pub fn published_at_for_filename(&self, file_name: &str) -> Option<i64> {
        self.by_file_name.get(file_name.trim()).copied()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(hash: Option<&str>, name: &str, published: &str) -> MapItem {
        MapItem {
            hash: hash.map(str::to_string),
            filename: Some(name.to_string()),
            published_at: Some(published.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_entry_wins() {
        let mappings = TimestampMappings::from_items(vec![
            item(Some("h1"), "a.synth", "2023-01-01T00:00:00Z"),
            item(Some("h1"), "b.synth", "2024-01-01T00:00:00Z"),
            item(None, "c.synth", "2024-01-01T00:00:00Z"),
        ]);

        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings.published_at_for_hash("h1"), Some(1_672_531_200));
        assert_eq!(mappings.published_at_for_filename(" a.synth "), Some(1_672_531_200));
        assert_eq!(mappings.published_at_for_filename("b.synth"), None);
        assert_eq!(mappings.published_at_for_filename("c.synth"), None);
    }

    #[test]
    fn test_load_missing_or_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TimestampMappings::load(&dir.path().join("missing.json")).is_empty());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, b"[{").unwrap();
        assert!(TimestampMappings::load(&corrupt).is_empty());

        let good = dir.path().join("good.json");
        std::fs::write(
            &good,
            br#"[{"hash":"h","filename":"a.synth","published_at":"2023-01-01T00:00:00Z"}]"#,
        )
        .unwrap();
        assert_eq!(TimestampMappings::load(&good).len(), 1);
    }
}
