//! [`SwarmEngine`] backed by a librqbit session.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use librqbit::{
    AddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrentHandle, Session,
    SessionOptions, TorrentStatsState,
};
use tracing::{debug, info};

use super::descriptor::TorrentLayout;
use super::{
    FilePriority, SessionStatus, SwarmDescriptor, SwarmEngine, SwarmError, SwarmFile,
    SwarmSession, SwarmState,
};

fn session_error(e: anyhow::Error) -> SwarmError {
    SwarmError::Session(format!("{e:#}"))
}

pub struct RqbitEngine {
    session: Arc<Session>,
}

impl RqbitEngine {
    pub async fn new(download_dir: &Path) -> Result<Self, SwarmError> {
        tokio::fs::create_dir_all(download_dir).await?;
        let session = Session::new_with_opts(download_dir.to_path_buf(), SessionOptions::default())
            .await
            .map_err(session_error)?;
        info!(dir = %download_dir.display(), "Swarm session ready");
        Ok(Self { session })
    }
}

#[async_trait]
impl SwarmEngine for RqbitEngine {
    async fn fetch_descriptor(&self, locator: &str, timeout: Duration) -> Result<Bytes, SwarmError> {
        let options = AddTorrentOptions {
            list_only: true,
            ..Default::default()
        };
        let add = self
            .session
            .add_torrent(AddTorrent::from_url(locator), Some(options));
        let response = tokio::time::timeout(timeout, add)
            .await
            .map_err(|_| SwarmError::DescriptorTimeout(timeout))?
            .map_err(session_error)?;

        match response {
            AddTorrentResponse::ListOnly(listed) => Ok(listed.torrent_bytes),
            _ => Err(SwarmError::Descriptor(
                "locator resolved to a running torrent".to_string(),
            )),
        }
    }

    fn parse_descriptor(&self, raw: Bytes) -> Result<SwarmDescriptor, SwarmError> {
        let layout = TorrentLayout::parse(&raw)?;
        Ok(SwarmDescriptor {
            files: layout.files,
            raw,
        })
    }

    async fn open_session(
        &self,
        descriptor: &SwarmDescriptor,
        download_dir: &Path,
    ) -> Result<Box<dyn SwarmSession>, SwarmError> {
        let layout = TorrentLayout::parse(&descriptor.raw)?;
        let root = layout.root(download_dir);

        // Pieces are written in place, so a partial file sits at its final path.
        let files = layout
            .files
            .iter()
            .enumerate()
            .map(|(index, entry)| SwarmFile {
                index,
                path: entry.path.clone(),
                complete_path: root.join(&entry.path),
                incomplete_path: root.join(&entry.path),
            })
            .collect();

        Ok(Box::new(RqbitSession {
            session: self.session.clone(),
            raw: descriptor.raw.clone(),
            output: root,
            files,
            selected: BTreeSet::new(),
            handle: None,
        }))
    }
}

struct RqbitSession {
    session: Arc<Session>,
    raw: Bytes,
    output: PathBuf,
    files: Vec<SwarmFile>,
    selected: BTreeSet<usize>,
    handle: Option<ManagedTorrentHandle>,
}

#[async_trait]
impl SwarmSession for RqbitSession {
    fn files(&self) -> Vec<SwarmFile> {
        self.files.clone()
    }

    async fn set_priority(&mut self, index: usize, priority: FilePriority) -> Result<(), SwarmError> {
        if index >= self.files.len() {
            return Err(SwarmError::Session(format!("no file {index}")));
        }
        if self.handle.is_some() {
            return Err(SwarmError::Session(
                "file selection is fixed once the session starts".to_string(),
            ));
        }
        match priority {
            FilePriority::Normal => self.selected.insert(index),
            FilePriority::DoNotDownload => self.selected.remove(&index),
        };
        Ok(())
    }

    async fn start(&mut self) -> Result<(), SwarmError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let options = AddTorrentOptions {
            only_files: Some(self.selected.iter().copied().collect()),
            overwrite: true,
            output_folder: Some(self.output.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let response = self
            .session
            .add_torrent(AddTorrent::from_bytes(self.raw.clone()), Some(options))
            .await
            .map_err(session_error)?;

        let handle = match response {
            AddTorrentResponse::Added(_, handle) | AddTorrentResponse::AlreadyManaged(_, handle) => {
                handle
            }
            AddTorrentResponse::ListOnly(_) => {
                return Err(SwarmError::Session("torrent was only listed".to_string()))
            }
        };
        debug!(files = self.selected.len(), "Swarm torrent added");
        self.handle = Some(handle);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SwarmError> {
        if let Some(handle) = &self.handle {
            self.session.pause(handle).await.map_err(session_error)?;
        }
        Ok(())
    }

    fn status(&self) -> SessionStatus {
        let Some(handle) = &self.handle else {
            return SessionStatus {
                state: SwarmState::Starting,
                progress: 0.0,
            };
        };

        let stats = handle.stats();
        let progress = if stats.total_bytes == 0 {
            100.0
        } else {
            stats.progress_bytes as f64 * 100.0 / stats.total_bytes as f64
        };
        let state = match stats.state {
            TorrentStatsState::Initializing => SwarmState::Starting,
            TorrentStatsState::Live if stats.finished => SwarmState::Seeding,
            TorrentStatsState::Live => SwarmState::Downloading,
            TorrentStatsState::Paused => SwarmState::Stopped,
            TorrentStatsState::Error => SwarmState::Error(
                stats.error.clone().unwrap_or_else(|| "unknown torrent error".to_string()),
            ),
        };
        SessionStatus { state, progress }
    }
}
