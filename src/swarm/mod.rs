//! Swarm (torrent) map source.
//!
//! The last resort when both catalogs are down. A locator is resolved to a
//! descriptor listing every map file in the swarm; a session is opened with
//! all files deselected, then only maps that are missing locally and pass
//! the cutoff and difficulty filters are selected. The session is polled
//! until it finishes, and completed files are inspected and moved into the
//! content directory.
//!
//! # Phases
//!
//! ```text
//! Uninitialized -> ResolvingDescriptor -> Ready -> Selecting -> Downloading -> Finished
//! ```

pub mod descriptor;
pub mod engine;
pub mod locator;
pub mod mappings;
#[cfg(feature = "rqbit")]
pub mod rqbit;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{SwarmSettings, SyncConfig};
use crate::http::Fetch;
use crate::inspect::MapInspector;
use crate::metadata::CachedMetadata;
use crate::store::fs::{self, WriteError};
use crate::sync::{MapSource, SyncContext};

pub use engine::{
    FilePriority, SessionStatus, SwarmDescriptor, SwarmEngine, SwarmFile, SwarmFileEntry,
    SwarmSession, SwarmState,
};
pub use descriptor::TorrentLayout;
pub use locator::LocatorRepo;
pub use mappings::TimestampMappings;

/// Log metadata refresh progress every this many descriptor entries.
const REFRESH_LOG_EVERY: usize = 500;

/// Yield to the runtime every this many finished files.
const FINISH_YIELD_EVERY: usize = 10;

/// Errors that can occur in swarm operations.
#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    #[error("No locator available")]
    NoLocator,

    #[error("Descriptor fetch timed out after {0:?}")]
    DescriptorTimeout(Duration),

    #[error("Invalid descriptor: {0}")]
    Descriptor(String),

    #[error("Session error: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, SwarmError>;

/// How a download session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SwarmOutcome {
    /// Everything selected is downloaded and the session started seeding.
    Seeding,
    /// The session stopped with all selected data present.
    Stopped,
    Error(String),
}

impl SwarmOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Seeding | Self::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwarmPhase {
    Uninitialized,
    ResolvingDescriptor,
    Ready,
    Selecting,
    Downloading,
    Finished(SwarmOutcome),
}

/// Counts from moving finished files into place.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PostDownloadReport {
    pub moved: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// A file selected for download, with the metadata that selected it.
struct Selected {
    file: SwarmFile,
    file_name: String,
    target: PathBuf,
    metadata: CachedMetadata,
}

pub struct SwarmSource {
    engine: Arc<dyn SwarmEngine>,
    locator: LocatorRepo,
    inspector: Arc<dyn MapInspector>,
    settings: SwarmSettings,
    content_dir: PathBuf,
    download_dir: PathBuf,
    descriptor_cache_path: PathBuf,
    mapping_file: Option<PathBuf>,
    map_extension: String,
    mappings: TimestampMappings,
    descriptor: Option<SwarmDescriptor>,
    phase: SwarmPhase,
}

impl SwarmSource {
    pub fn new(
        config: &SyncConfig,
        engine: Arc<dyn SwarmEngine>,
        fetch: Arc<dyn Fetch>,
        inspector: Arc<dyn MapInspector>,
    ) -> Self {
        let locator = LocatorRepo::new(
            fetch,
            config.swarm.locator_url.clone(),
            config.swarm.locator_timeout,
            config.locator_cache_path(),
            config.descriptor_cache_path(),
            config.swarm.fallback_locator.clone(),
        );

        Self {
            engine,
            locator,
            inspector,
            settings: config.swarm.clone(),
            content_dir: config.content_dir.clone(),
            download_dir: config.swarm_download_dir.clone(),
            descriptor_cache_path: config.descriptor_cache_path(),
            mapping_file: config.mapping_file.clone(),
            map_extension: config.map_extension.clone(),
            mappings: TimestampMappings::default(),
            descriptor: None,
            phase: SwarmPhase::Uninitialized,
        }
    }

    pub fn phase(&self) -> &SwarmPhase {
        &self.phase
    }

    pub fn is_initialized(&self) -> bool {
        self.descriptor.is_some()
    }

    /// Resolve the descriptor and seed the metadata cache with its files.
    pub async fn initialize(&mut self, ctx: &mut SyncContext<'_>) -> Result<()> {
        self.phase = SwarmPhase::ResolvingDescriptor;

        let descriptor = match self.resolve_descriptor().await {
            Ok(d) => d,
            Err(e) => {
                self.phase = SwarmPhase::Uninitialized;
                return Err(e);
            }
        };
        info!(files = descriptor.files.len(), "Swarm descriptor ready");

        if let Some(path) = self.mapping_file.as_deref() {
            self.mappings = TimestampMappings::load(path);
        }
        self.refresh_metadata(ctx, &descriptor).await;
        self.descriptor = Some(descriptor);
        self.phase = SwarmPhase::Ready;
        Ok(())
    }

    async fn resolve_descriptor(&self) -> Result<SwarmDescriptor> {
        // Resolving the locator first may invalidate the cached descriptor.
        let locator = self.locator.resolve().await;

        if let Some(descriptor) = self.cached_descriptor() {
            debug!("Using cached swarm descriptor");
            return Ok(descriptor);
        }

        let locator = locator.ok_or(SwarmError::NoLocator)?;
        let timeout = self.settings.descriptor_timeout;
        debug!("Fetching swarm descriptor from locator");
        let raw = tokio::time::timeout(timeout, self.engine.fetch_descriptor(&locator, timeout))
            .await
            .map_err(|_| SwarmError::DescriptorTimeout(timeout))??;

        let descriptor = self.engine.parse_descriptor(raw.clone())?;
        if let Err(e) = fs::write_atomic(&self.descriptor_cache_path, &raw) {
            warn!(error = %e, "Failed to cache swarm descriptor");
        }
        Ok(descriptor)
    }

    fn cached_descriptor(&self) -> Option<SwarmDescriptor> {
        let raw = std::fs::read(&self.descriptor_cache_path).ok()?;
        match self.engine.parse_descriptor(Bytes::from(raw)) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                warn!(error = %e, "Cached swarm descriptor unreadable, refetching");
                None
            }
        }
    }

    /// Make sure every map file in the descriptor has a metadata entry.
    async fn refresh_metadata(&self, ctx: &mut SyncContext<'_>, descriptor: &SwarmDescriptor) {
        let total = descriptor.files.len();
        let mut maps = 0usize;
        for (i, entry) in descriptor.files.iter().enumerate() {
            if i % REFRESH_LOG_EVERY == 0 {
                debug!(processed = i, total, "Refreshing swarm metadata");
            }

            let Some(file_name) = self.map_file_name(&entry.path) else {
                continue;
            };
            maps += 1;

            let published = self.mappings.published_at_for_filename(&file_name);
            match ctx.metadata.peek(&file_name) {
                None => {
                    ctx.metadata.add(
                        CachedMetadata {
                            file_name: file_name.clone(),
                            downloaded_path: Some(self.content_dir.join(&file_name)),
                            published_at_sec: published.unwrap_or(0),
                            ..Default::default()
                        },
                        false,
                    );
                }
                Some(existing) if !existing.is_fresh() => {
                    if let Some(published) = published {
                        let mut upgraded = existing.clone();
                        upgraded.published_at_sec = published;
                        ctx.metadata.add(upgraded, true);
                    }
                }
                Some(_) => {}
            }

            if self.settings.remote_metadata
                && !ctx.metadata.peek(&file_name).map_or(false, |m| m.is_fresh())
            {
                ctx.metadata
                    .get(&file_name, self.settings.metadata_lookup_timeout)
                    .await;
            }
        }

        info!(files = total, maps, "Swarm metadata refreshed");
        ctx.metadata.persist();
    }

    /// Trimmed base name of a descriptor path, if it is a map file.
    fn map_file_name(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if !trimmed.ends_with(&self.map_extension) {
            return None;
        }
        Path::new(trimmed)
            .file_name()
            .map(|n| n.to_string_lossy().trim().to_string())
    }

    fn is_present(&self, ctx: &SyncContext<'_>, metadata: &CachedMetadata, target: &Path) -> bool {
        let by_hash = metadata
            .hash
            .as_deref()
            .map_or(false, |h| ctx.store.contains_hash(h));
        by_hash || ctx.store.get_from_path(target).is_some() || target.exists()
    }

    async fn select(
        &self,
        ctx: &SyncContext<'_>,
        session: &mut dyn SwarmSession,
        since: i64,
        difficulties: Option<&[String]>,
    ) -> Result<Vec<Selected>> {
        let files = session.files();
        for file in &files {
            session.set_priority(file.index, FilePriority::DoNotDownload).await?;
        }
        debug!(files = files.len(), "All swarm files deselected");

        let mut selected = Vec::new();
        let mut already_present = 0usize;
        for file in files {
            let Some(file_name) = self.map_file_name(&file.path) else {
                continue;
            };
            let Some(metadata) = ctx.metadata.peek(&file_name) else {
                debug!(file = %file_name, "No metadata, skipping");
                continue;
            };
            let target = self.content_dir.join(&file_name);

            if self.is_present(ctx, metadata, &target) {
                already_present += 1;
                continue;
            }
            if metadata.published_at_sec < since {
                continue;
            }
            if let Some(wanted) = difficulties {
                if !metadata.matches_difficulties(wanted) {
                    debug!(file = %file_name, "No matching difficulty, skipping");
                    continue;
                }
            }

            session.set_priority(file.index, FilePriority::Normal).await?;
            selected.push(Selected {
                metadata: metadata.clone(),
                file,
                file_name,
                target,
            });
        }

        info!(
            selected = selected.len(),
            already_present, "Swarm files selected"
        );
        Ok(selected)
    }

    /// Start the session and poll it until it finishes or the deadline passes.
    async fn wait_for_download(&self, session: &mut dyn SwarmSession) -> Result<SwarmOutcome> {
        session.start().await?;

        let poll_interval = self.settings.poll_interval;
        let polling = async {
            let mut last_logged = -1.0f64;
            loop {
                let status = session.status();
                match status.state {
                    SwarmState::Error(message) => return SwarmOutcome::Error(message),
                    SwarmState::Stopped if status.progress >= 100.0 => return SwarmOutcome::Stopped,
                    SwarmState::Stopped => {
                        return SwarmOutcome::Error(format!(
                            "stopped at {:.1}%",
                            status.progress
                        ))
                    }
                    SwarmState::Seeding => return SwarmOutcome::Seeding,
                    SwarmState::Downloading if status.progress - last_logged >= 1.0 => {
                        debug!(progress = status.progress as u32, "Swarm download progress");
                        last_logged = status.progress;
                    }
                    _ => {}
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        let outcome = match tokio::time::timeout(self.settings.download_deadline, polling).await {
            Ok(outcome) => outcome,
            Err(_) => SwarmOutcome::Error(format!(
                "deadline of {:?} exceeded",
                self.settings.download_deadline
            )),
        };

        // Stop once done so the session does not keep seeding.
        if !matches!(outcome, SwarmOutcome::Stopped) {
            if let Err(e) = session.stop().await {
                warn!(error = %e, "Failed to stop swarm session");
            }
        }
        Ok(outcome)
    }

    /// Move finished files into the content directory and record them.
    async fn finish_downloads(
        &self,
        ctx: &mut SyncContext<'_>,
        selected: Vec<Selected>,
    ) -> PostDownloadReport {
        let mut report = PostDownloadReport::default();

        for (i, item) in selected.into_iter().enumerate() {
            if i > 0 && i % FINISH_YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }

            let complete = &item.file.complete_path;
            if complete.exists() {
                let mut record = match self.inspector.inspect(complete) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(path = %complete.display(), error = %e, "Downloaded map unreadable, deleting");
                        fs::remove_quietly(complete);
                        report.deleted += 1;
                        continue;
                    }
                };

                if let Err(e) = fs::move_overwrite(complete, &item.target) {
                    warn!(path = %complete.display(), error = %e, "Failed to move map into place");
                    report.failed += 1;
                    continue;
                }

                let published = match item.metadata.published_at_sec {
                    0 => self.mappings.published_at_for_hash(&record.hash).unwrap_or(0),
                    known => known,
                };
                if published > 0 {
                    if let Err(e) = fs::stamp_mtime(&item.target, published) {
                        warn!(path = %item.target.display(), error = %e, "Failed to set modified time");
                    }
                    if record.published_at_sec == 0 {
                        record.published_at_sec = published;
                    }
                }

                record.file_path = item.target.clone();
                ctx.store.insert(record);
                ctx.metadata.set_downloaded_path(&item.file_name, item.target);
                report.moved += 1;
            } else if item.file.incomplete_path.exists() {
                warn!(path = %item.file.incomplete_path.display(), "Incomplete download, deleting");
                fs::remove_quietly(&item.file.incomplete_path);
                report.deleted += 1;
            } else {
                warn!(file = %item.file.path, "Download not found, skipping");
                report.failed += 1;
            }
        }

        ctx.store.persist(true);
        ctx.metadata.persist();

        info!(
            moved = report.moved,
            deleted = report.deleted,
            failed = report.failed,
            "Swarm files processed"
        );
        report
    }

    async fn run(
        &mut self,
        ctx: &mut SyncContext<'_>,
        since: i64,
        difficulties: Option<&[String]>,
    ) -> Result<bool> {
        if !self.is_initialized() {
            info!("Setting up swarm source");
            self.initialize(ctx).await?;
        }
        let descriptor = self
            .descriptor
            .as_ref()
            .ok_or_else(|| SwarmError::Descriptor("not resolved".to_string()))?;

        self.phase = SwarmPhase::Selecting;
        let mut session = self
            .engine
            .open_session(descriptor, &self.download_dir)
            .await?;
        let selected = self
            .select(ctx, session.as_mut(), since, difficulties)
            .await?;

        if selected.is_empty() {
            info!("No swarm maps to download, up to date");
            self.phase = SwarmPhase::Ready;
            return Ok(true);
        }

        self.phase = SwarmPhase::Downloading;
        info!(files = selected.len(), "Starting swarm download");
        let outcome = self.wait_for_download(session.as_mut()).await?;
        self.phase = SwarmPhase::Finished(outcome.clone());

        if let SwarmOutcome::Error(message) = &outcome {
            error!(error = %message, "Swarm download failed");
            return Ok(false);
        }

        self.finish_downloads(ctx, selected).await;
        Ok(true)
    }
}

#[async_trait]
impl MapSource for SwarmSource {
    fn name(&self) -> &str {
        "swarm"
    }

    async fn download_since(
        &mut self,
        ctx: &mut SyncContext<'_>,
        since: i64,
        difficulties: Option<&[String]>,
    ) -> bool {
        match self.run(ctx, since, difficulties).await {
            Ok(success) => success,
            Err(e) => {
                error!(error = %e, "Swarm sync failed");
                self.phase = SwarmPhase::Finished(SwarmOutcome::Error(e.to_string()));
                false
            }
        }
    }
}
