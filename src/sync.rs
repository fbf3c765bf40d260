//! Ordered fallback across map sources.
//!
//! The orchestrator owns the local store and the metadata cache and lends
//! them to one source at a time. Sources run in priority order and the first
//! one that completes ends the sync.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::catalog::{CatalogSource, PrimaryCatalog, SecondaryCatalog};
use crate::config::SyncConfig;
use crate::http::Fetch;
use crate::inspect::MapInspector;
use crate::metadata::MetadataCache;
use crate::store::{fs, LocalStore};
use crate::swarm::{SwarmEngine, SwarmSource};

/// Mutable state a source records its downloads into.
pub struct SyncContext<'a> {
    pub store: &'a mut LocalStore,
    pub metadata: &'a mut MetadataCache,
}

impl<'a> SyncContext<'a> {
    pub fn new(store: &'a mut LocalStore, metadata: &'a mut MetadataCache) -> Self {
        Self { store, metadata }
    }
}

/// A place maps can be downloaded from.
#[async_trait]
pub trait MapSource: Send {
    fn name(&self) -> &str;

    /// Download every map published at or after `since` (unix seconds) that
    /// is not already present, optionally limited to maps supporting one of
    /// `difficulties`.
    ///
    /// Returns true when the source completed, including when there was
    /// nothing to download.
    async fn download_since(
        &mut self,
        ctx: &mut SyncContext<'_>,
        since: i64,
        difficulties: Option<&[String]>,
    ) -> bool;
}

/// Drives the configured sources against one local collection.
pub struct SyncOrchestrator {
    store: LocalStore,
    metadata: MetadataCache,
    sources: Vec<Box<dyn MapSource>>,
    inspector: Arc<dyn MapInspector>,
    content_dir: PathBuf,
    map_extension: String,
    swarm_download_dir: Option<PathBuf>,
}

impl SyncOrchestrator {
    /// Orchestrator over explicit parts. Sources are tried in the given order.
    pub fn new(
        store: LocalStore,
        metadata: MetadataCache,
        sources: Vec<Box<dyn MapSource>>,
        inspector: Arc<dyn MapInspector>,
        content_dir: PathBuf,
        map_extension: impl Into<String>,
    ) -> Self {
        Self {
            store,
            metadata,
            sources,
            inspector,
            content_dir,
            map_extension: map_extension.into(),
            swarm_download_dir: None,
        }
    }

    /// Build the standard source chain (primary, secondary, swarm) from config.
    ///
    /// The swarm source is only added when an engine is supplied.
    pub fn from_config(
        config: &SyncConfig,
        fetch: Arc<dyn Fetch>,
        inspector: Arc<dyn MapInspector>,
        engine: Option<Arc<dyn SwarmEngine>>,
    ) -> Self {
        let store = LocalStore::new(config.store_path());

        let mut metadata = MetadataCache::new(config.metadata_cache_path(), fetch.clone());
        if config.sources.primary {
            metadata = metadata.with_primary(config.primary_url.clone());
        }
        if config.sources.secondary_metadata {
            metadata = metadata.with_secondary(config.secondary_url.clone());
        }

        let mut sources: Vec<Box<dyn MapSource>> = Vec::new();
        if config.sources.primary {
            sources.push(Box::new(CatalogSource::new(
                Box::new(PrimaryCatalog::new(config.primary_url.clone())),
                fetch.clone(),
                config.catalog.clone(),
                &config.temp_dir,
                config.content_dir.clone(),
            )));
        }
        if config.sources.secondary {
            sources.push(Box::new(CatalogSource::new(
                Box::new(SecondaryCatalog::new(config.secondary_url.clone())),
                fetch.clone(),
                config.catalog.clone(),
                &config.temp_dir,
                config.content_dir.clone(),
            )));
        }
        let mut swarm_download_dir = None;
        match engine {
            Some(engine) if config.sources.swarm => {
                swarm_download_dir = Some(config.swarm_download_dir.clone());
                sources.push(Box::new(SwarmSource::new(
                    config,
                    engine,
                    fetch,
                    inspector.clone(),
                )));
            }
            None if config.sources.swarm => {
                warn!("Swarm source enabled but no swarm engine available, skipping");
            }
            _ => {}
        }

        Self {
            store,
            metadata,
            sources,
            inspector,
            content_dir: config.content_dir.clone(),
            map_extension: config.map_extension.clone(),
            swarm_download_dir,
        }
    }

    /// Directory the swarm session downloads into, emptied on initialize.
    pub fn with_swarm_download_dir(mut self, dir: PathBuf) -> Self {
        self.swarm_download_dir = Some(dir);
        self
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Load persisted state and reconcile it with the content directory.
    pub async fn initialize(&mut self) {
        self.store.load();
        if let Err(e) = self
            .store
            .refresh_from_disk(&self.content_dir, &self.map_extension, self.inspector.as_ref())
            .await
        {
            error!(dir = %self.content_dir.display(), error = %e, "Failed to scan content directory");
        }

        self.metadata.load();

        // The swarm moves finished files out, so leftovers are stale.
        if let Some(dir) = &self.swarm_download_dir {
            if let Err(e) = fs::reset_dir(dir) {
                warn!(dir = %dir.display(), error = %e, "Failed to empty swarm download directory");
            }
        }

        info!(maps = self.store.len(), metadata = self.metadata.len(), "Sync initialized");
    }

    /// Try each source in order until one completes.
    pub async fn try_sync(&mut self, since: i64, difficulties: Option<&[String]>) -> bool {
        if self.sources.is_empty() {
            warn!("No map sources configured");
            return false;
        }

        let mut ctx = SyncContext::new(&mut self.store, &mut self.metadata);
        for source in self.sources.iter_mut() {
            info!(source = source.name(), since, "Trying source");
            if source.download_since(&mut ctx, since, difficulties).await {
                info!(source = source.name(), maps = ctx.store.len(), "Sync complete");
                return true;
            }
            warn!(source = source.name(), "Source failed, falling back");
        }

        error!("All map sources failed");
        false
    }

    /// Sync everything newer than the last completed sync and advance the marker.
    pub async fn sync_incremental(&mut self, difficulties: Option<&[String]>) -> bool {
        let started = fs::now_sec();
        let since = self.store.last_fetch();

        if !self.try_sync(since, difficulties).await {
            return false;
        }

        self.store.set_last_fetch(started);
        if !self.store.persist(true) {
            // The in-memory store stays authoritative; the next save retries.
            warn!("Sync succeeded but the store could not be saved");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeInspector, Harness, RecordingSource};
    use std::sync::atomic::Ordering;

    fn orchestrator(harness: &Harness, sources: Vec<Box<dyn MapSource>>) -> SyncOrchestrator {
        SyncOrchestrator::new(
            harness.store(),
            harness.metadata(Arc::new(crate::testing::ScriptedFetch::default())),
            sources,
            Arc::new(FakeInspector::default()),
            harness.content_dir(),
            ".synth",
        )
    }

    #[tokio::test]
    async fn test_first_success_stops_fallback() {
        let harness = Harness::new();
        let primary = RecordingSource::new("primary", true);
        let secondary = RecordingSource::new("secondary", true);
        let swarm = RecordingSource::new("swarm", true);
        let (p, s, w) = (primary.calls(), secondary.calls(), swarm.calls());

        let mut sync = orchestrator(
            &harness,
            vec![Box::new(primary), Box::new(secondary), Box::new(swarm)],
        );
        sync.initialize().await;

        assert!(sync.try_sync(0, None).await);
        assert_eq!(p.load(Ordering::SeqCst), 1);
        assert_eq!(s.load(Ordering::SeqCst), 0);
        assert_eq!(w.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_through_in_order() {
        let harness = Harness::new();
        let primary = RecordingSource::new("primary", false);
        let secondary = RecordingSource::new("secondary", true);
        let swarm = RecordingSource::new("swarm", true);
        let (p, s, w) = (primary.calls(), secondary.calls(), swarm.calls());

        let mut sync = orchestrator(
            &harness,
            vec![Box::new(primary), Box::new(secondary), Box::new(swarm)],
        );

        assert!(sync.try_sync(0, None).await);
        assert_eq!(p.load(Ordering::SeqCst), 1);
        assert_eq!(s.load(Ordering::SeqCst), 1);
        assert_eq!(w.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_failing_or_none_configured() {
        let harness = Harness::new();
        let mut none = orchestrator(&harness, Vec::new());
        assert!(!none.try_sync(0, None).await);

        let mut failing = orchestrator(
            &harness,
            vec![
                Box::new(RecordingSource::new("a", false)),
                Box::new(RecordingSource::new("b", false)),
            ],
        );
        assert!(!failing.try_sync(0, None).await);
    }

    #[tokio::test]
    async fn test_incremental_advances_last_fetch_only_on_success() {
        let harness = Harness::new();
        let failing = RecordingSource::new("a", false);
        let mut sync = orchestrator(&harness, vec![Box::new(failing)]);
        sync.initialize().await;
        assert!(!sync.sync_incremental(None).await);
        assert_eq!(sync.store().last_fetch(), 0);

        let ok = RecordingSource::new("b", true);
        let seen = ok.last_since();
        let mut sync = orchestrator(&harness, vec![Box::new(ok)]);
        sync.initialize().await;
        assert!(sync.sync_incremental(None).await);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        let marker = sync.store().last_fetch();
        assert!(marker > 0);

        // The next run starts from the recorded marker.
        let again = RecordingSource::new("c", true);
        let seen = again.last_since();
        let mut sync = orchestrator(&harness, vec![Box::new(again)]);
        sync.initialize().await;
        assert!(sync.sync_incremental(None).await);
        assert_eq!(seen.load(Ordering::SeqCst), marker);
    }

    #[tokio::test]
    async fn test_incremental_succeeds_when_final_save_fails() {
        let harness = Harness::new();
        let ok = RecordingSource::new("a", true);
        let calls = ok.calls();
        let mut sync = orchestrator(&harness, vec![Box::new(ok)]);
        sync.initialize().await;

        // A non-empty directory where the store file belongs cannot be replaced.
        let store_path = harness.config().store_path();
        let _ = std::fs::remove_file(&store_path);
        std::fs::create_dir_all(store_path.join("blocker")).unwrap();

        assert!(sync.sync_incremental(None).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sync.store().last_fetch() > 0);
        assert!(sync.store().is_dirty());
    }

    #[tokio::test]
    async fn test_initialize_scans_disk_and_empties_swarm_dir() {
        let harness = Harness::new();
        std::fs::write(harness.content_dir().join("a.synth"), b"aaa").unwrap();
        let swarm_dir = harness.root().join("SongDl");
        std::fs::create_dir_all(&swarm_dir).unwrap();
        std::fs::write(swarm_dir.join("leftover.synth"), b"x").unwrap();

        let mut sync = orchestrator(&harness, Vec::new()).with_swarm_download_dir(swarm_dir.clone());
        sync.initialize().await;

        assert_eq!(sync.store().len(), 1);
        assert!(swarm_dir.is_dir());
        assert!(!swarm_dir.join("leftover.synth").exists());
    }

    #[test]
    fn test_from_config_respects_toggles() {
        let harness = Harness::new();
        let config = harness.config();
        let fetch: Arc<dyn Fetch> = Arc::new(crate::testing::ScriptedFetch::default());

        let sync = SyncOrchestrator::from_config(
            &config,
            fetch.clone(),
            Arc::new(FakeInspector::default()),
            None,
        );
        assert_eq!(sync.source_names(), vec!["primary", "secondary"]);

        let mut only_secondary = config.clone();
        only_secondary.sources.primary = false;
        let sync = SyncOrchestrator::from_config(
            &only_secondary,
            fetch,
            Arc::new(FakeInspector::default()),
            Some(Arc::new(crate::testing::ScriptedEngine::default())),
        );
        assert_eq!(sync.source_names(), vec!["secondary", "swarm"]);
    }
}
