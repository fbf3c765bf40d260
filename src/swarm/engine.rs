//! Boundary to a swarm (torrent) client library.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::SwarmError;

/// One file listed in a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmFileEntry {
    /// Path relative to the swarm root.
    pub path: String,
    pub length: u64,
}

/// Parsed descriptor plus the raw bytes it was parsed from.
#[derive(Debug, Clone)]
pub struct SwarmDescriptor {
    pub files: Vec<SwarmFileEntry>,
    pub raw: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePriority {
    DoNotDownload,
    Normal,
}

/// A file inside an open session.
#[derive(Debug, Clone)]
pub struct SwarmFile {
    pub index: usize,
    /// Path relative to the swarm root.
    pub path: String,
    /// Where the file sits once fully downloaded.
    pub complete_path: PathBuf,
    /// Where a partial download sits.
    pub incomplete_path: PathBuf,
}

/// Session state as reported by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum SwarmState {
    Starting,
    Downloading,
    Seeding,
    Stopped,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: SwarmState,
    /// Percentage of selected data downloaded, 0 to 100.
    pub progress: f64,
}

/// Factory for descriptors and download sessions.
#[async_trait]
pub trait SwarmEngine: Send + Sync {
    /// Resolve a locator to raw descriptor bytes.
    async fn fetch_descriptor(&self, locator: &str, timeout: Duration) -> Result<Bytes, SwarmError>;

    fn parse_descriptor(&self, raw: Bytes) -> Result<SwarmDescriptor, SwarmError>;

    /// Open a session that downloads into `download_dir`. Nothing transfers until started.
    async fn open_session(
        &self,
        descriptor: &SwarmDescriptor,
        download_dir: &Path,
    ) -> Result<Box<dyn SwarmSession>, SwarmError>;
}

/// A running (or runnable) download of a descriptor.
#[async_trait]
pub trait SwarmSession: Send + Sync {
    fn files(&self) -> Vec<SwarmFile>;

    async fn set_priority(&mut self, index: usize, priority: FilePriority) -> Result<(), SwarmError>;

    async fn start(&mut self) -> Result<(), SwarmError>;

    async fn stop(&mut self) -> Result<(), SwarmError>;

    fn status(&self) -> SessionStatus;
}
