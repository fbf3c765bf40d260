//! Paginated catalog sources.
//!
//! A [`CatalogSource`] lists everything published after a cutoff, skips maps
//! already in the local store, and downloads the rest through a bounded
//! FIFO queue. Listing is all-or-nothing: one failed page fails the source so
//! the orchestrator can fall through to the next one. Individual downloads
//! are allowed to fail.

pub mod item;
pub mod primary;
pub mod secondary;
pub mod queue;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::CatalogSettings;
use crate::http::{Fetch, FetchError};
use crate::metadata::CachedMetadata;
use crate::store::{fs, MapRecord};
use crate::sync::{MapSource, SyncContext};

pub use item::{MapItem, MapPage};
pub use primary::PrimaryCatalog;
pub use queue::DownloadQueue;
pub use secondary::SecondaryCatalog;

/// Errors from listing or downloading.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Invalid page: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Empty response body")]
    EmptyBody,

    #[error("Item has no {0}")]
    MissingField(&'static str),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// URL scheme of one catalog.
pub trait CatalogApi: Send + Sync {
    /// Short name used in logs and for the scratch directory.
    fn name(&self) -> &str;

    /// Listing URL for one page, sorted by publish time descending.
    fn page_url(
        &self,
        page_size: usize,
        page_index: u32,
        since: i64,
        difficulties: Option<&[String]>,
    ) -> String;

    /// Absolute download URL for an item, if it has one.
    fn download_url_for(&self, item: &MapItem) -> Option<String>;
}

/// A finished download waiting to be registered.
struct Downloaded {
    item: MapItem,
    hash: String,
    file_name: String,
    path: PathBuf,
}

/// Catalog-backed map source.
pub struct CatalogSource {
    api: Box<dyn CatalogApi>,
    fetch: Arc<dyn Fetch>,
    settings: CatalogSettings,
    temp_dir: PathBuf,
    content_dir: PathBuf,
}

impl CatalogSource {
    /// `temp_root` gets a per-catalog subdirectory for in-progress downloads.
    pub fn new(
        api: Box<dyn CatalogApi>,
        fetch: Arc<dyn Fetch>,
        settings: CatalogSettings,
        temp_root: &Path,
        content_dir: PathBuf,
    ) -> Self {
        let temp_dir = temp_root.join(api.name());
        Self {
            api,
            fetch,
            settings,
            temp_dir,
            content_dir,
        }
    }

    /// Fetch and parse one page.
    pub async fn fetch_page(
        &self,
        page_index: u32,
        since: i64,
        difficulties: Option<&[String]>,
    ) -> Result<MapPage> {
        let url = self
            .api
            .page_url(self.settings.page_size, page_index, since, difficulties);
        let body = self.fetch.get_string(&url, self.settings.page_timeout).await?;
        if body.trim().is_empty() {
            return Err(CatalogError::EmptyBody);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Every item published after `since`. Fails if any page fails.
    pub async fn list_since(
        &self,
        since: i64,
        difficulties: Option<&[String]>,
    ) -> Result<Vec<MapItem>> {
        let mut items = Vec::new();
        let mut page_count = 1;
        let mut page_index = 1;

        while page_index <= page_count {
            let page = self.fetch_page(page_index, since, difficulties).await?;
            debug!(
                catalog = self.api.name(),
                page = page_index,
                pages = page.pagecount,
                items = page.data.len(),
                "Page retrieved"
            );
            items.extend(page.data);
            page_count = page.pagecount;
            page_index += 1;
        }

        Ok(items)
    }

    async fn run(
        &self,
        ctx: &mut SyncContext<'_>,
        since: i64,
        difficulties: Option<&[String]>,
    ) -> Result<()> {
        fs::reset_dir(&self.temp_dir)?;

        let listed = self.list_since(since, difficulties).await?;
        let wanted = ctx.store.filter_out_existing(listed);
        info!(
            catalog = self.api.name(),
            new = wanted.len(),
            "Maps to download"
        );

        let total = wanted.len();
        let mut queue = DownloadQueue::new(self.settings.parallel_downloads);
        let mut admitted = 0usize;
        let mut saved = 0usize;

        for item in wanted {
            admitted += 1;
            debug!(
                progress = %format!("{}/{}", admitted, total),
                id = item.id,
                title = item.title.as_deref().unwrap_or(""),
                "Queueing download"
            );

            let download = download_one(
                self.fetch.as_ref(),
                self.api.as_ref(),
                item,
                &self.temp_dir,
                &self.content_dir,
                self.settings.map_timeout,
            );
            if let Some(done) = queue.push(download).await {
                saved += register(ctx, done);
            }

            if admitted % self.settings.checkpoint_every.max(1) == 0 {
                debug!(admitted, "Checkpoint, draining downloads");
                for done in queue.drain().await {
                    saved += register(ctx, done);
                }
                ctx.store.persist(true);
                ctx.metadata.persist();
            }
        }

        for done in queue.drain().await {
            saved += register(ctx, done);
        }
        ctx.store.persist(true);
        ctx.metadata.persist();

        info!(
            catalog = self.api.name(),
            saved,
            failed = total - saved,
            "Catalog download finished"
        );
        Ok(())
    }
}

#[async_trait]
impl MapSource for CatalogSource {
    fn name(&self) -> &str {
        self.api.name()
    }

    async fn download_since(
        &mut self,
        ctx: &mut SyncContext<'_>,
        since: i64,
        difficulties: Option<&[String]>,
    ) -> bool {
        match self.run(ctx, since, difficulties).await {
            Ok(()) => true,
            Err(e) => {
                error!(catalog = self.api.name(), error = %e, "Catalog sync failed");
                false
            }
        }
    }
}

/// Record a finished download. Returns 1 if it was saved.
fn register(ctx: &mut SyncContext<'_>, done: Result<Downloaded>) -> usize {
    match done {
        Ok(map) => {
            let mut metadata = CachedMetadata::from_item(&map.item);
            metadata.file_name = map.file_name;
            metadata.downloaded_path = Some(map.path.clone());

            ctx.store
                .insert(MapRecord::from_item(&map.item, map.hash, map.path));
            ctx.metadata.add(metadata, true);
            1
        }
        Err(e) => {
            warn!(error = %e, "Map download failed, skipping");
            0
        }
    }
}

async fn download_one(
    fetch: &dyn Fetch,
    api: &dyn CatalogApi,
    item: MapItem,
    temp_dir: &Path,
    content_dir: &Path,
    timeout: Duration,
) -> Result<Downloaded> {
    let hash = item
        .content_hash()
        .ok_or(CatalogError::MissingField("hash"))?
        .to_string();
    // Base name only; names must stay inside the content directory.
    let file_name = item
        .file_name()
        .and_then(|f| Path::new(f).file_name())
        .map(|f| f.to_string_lossy().into_owned())
        .ok_or(CatalogError::MissingField("filename"))?;
    let url = api
        .download_url_for(&item)
        .ok_or(CatalogError::MissingField("download_url"))?;

    let bytes = fetch.get_bytes(&url, timeout).await?;
    if bytes.is_empty() {
        return Err(CatalogError::EmptyBody);
    }

    // Unique per download; republished maps can share a file name.
    let temp_path = tempfile::Builder::new()
        .prefix(&format!("{}-", item.id))
        .tempfile_in(temp_dir)?
        .into_temp_path();
    tokio::fs::write(&temp_path, &bytes).await?;

    let final_path = content_dir.join(&file_name);
    fs::move_overwrite(&temp_path, &final_path)?;
    if let Some(published) = item.published_at_sec() {
        if let Err(e) = fs::stamp_mtime(&final_path, published) {
            warn!(path = %final_path.display(), error = %e, "Failed to set modified time");
        }
    }

    Ok(Downloaded {
        item,
        hash,
        file_name,
        path: final_path,
    })
}
