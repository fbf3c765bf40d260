//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::SyncConfig;
use crate::http::{self, Fetch, FetchError};
use crate::inspect::{MapInspector, Sha256Inspector};
use crate::metadata::MetadataCache;
use crate::store::{LocalStore, MapRecord};
use crate::swarm::{
    FilePriority, SessionStatus, SwarmDescriptor, SwarmEngine, SwarmError, SwarmFile,
    SwarmFileEntry, SwarmSession, SwarmState,
};
use crate::sync::{MapSource, SyncContext};

/// Temp directory laid out like a real installation.
pub struct Harness {
    dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("content")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root().join("content")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root().join("data")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root().join("tmp")
    }

    pub fn config(&self) -> SyncConfig {
        SyncConfig::new(self.content_dir())
            .with_data_dir(self.data_dir())
            .with_temp_dir(self.temp_dir())
    }

    pub fn store(&self) -> LocalStore {
        LocalStore::new(self.config().store_path())
    }

    /// Metadata cache without remote tiers.
    pub fn metadata(&self, fetch: Arc<ScriptedFetch>) -> MetadataCache {
        MetadataCache::new(self.config().metadata_cache_path(), fetch)
    }
}

#[derive(Clone)]
enum Reply {
    Text(String),
    Bytes(Vec<u8>),
    Fail,
    Hang,
}

/// [`Fetch`] answering from prefix rules. The longest matching prefix wins;
/// unmatched URLs get a 404.
#[derive(Default)]
pub struct ScriptedFetch {
    rules: Mutex<Vec<(String, Reply)>>,
    requests: Mutex<Vec<String>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedFetch {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn respond_prefix(&self, prefix: &str, body: &str) {
        self.rule(prefix, Reply::Text(body.to_string()));
    }

    pub fn respond_bytes_prefix(&self, prefix: &str, body: &[u8]) {
        self.rule(prefix, Reply::Bytes(body.to_vec()));
    }

    pub fn fail_prefix(&self, prefix: &str) {
        self.rule(prefix, Reply::Fail);
    }

    /// Requests matching `prefix` never complete.
    pub fn hang_prefix(&self, prefix: &str) {
        self.rule(prefix, Reply::Hang);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.starts_with(prefix))
            .count()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn rule(&self, prefix: &str, reply: Reply) {
        self.rules.lock().unwrap().push((prefix.to_string(), reply));
    }

    async fn answer(&self, url: &str) -> http::Result<Vec<u8>> {
        self.requests.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let best = {
            let rules = self.rules.lock().unwrap();
            rules
                .iter()
                .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, reply)| reply.clone())
        };
        match best {
            Some(Reply::Text(body)) => Ok(body.into_bytes()),
            Some(Reply::Bytes(body)) => Ok(body),
            Some(Reply::Fail) => Err(FetchError::Connect("scripted failure".to_string())),
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(FetchError::Status(404)),
        }
    }
}

#[async_trait]
impl Fetch for ScriptedFetch {
    async fn get_string(&self, url: &str, _timeout: Duration) -> http::Result<String> {
        let body = self.answer(url).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn get_bytes(&self, url: &str, _timeout: Duration) -> http::Result<Bytes> {
        Ok(Bytes::from(self.answer(url).await?))
    }
}

/// Hashing inspector that counts its calls.
#[derive(Default)]
pub struct FakeInspector {
    calls: AtomicUsize,
}

impl FakeInspector {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MapInspector for FakeInspector {
    fn inspect(&self, path: &Path) -> anyhow::Result<MapRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Sha256Inspector.inspect(path)
    }
}

/// Source that returns a fixed result and records how it was called.
pub struct RecordingSource {
    name: String,
    succeed: bool,
    calls: Arc<AtomicUsize>,
    last_since: Arc<AtomicI64>,
}

impl RecordingSource {
    pub fn new(name: &str, succeed: bool) -> Self {
        Self {
            name: name.to_string(),
            succeed,
            calls: Arc::new(AtomicUsize::new(0)),
            last_since: Arc::new(AtomicI64::new(-1)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn last_since(&self) -> Arc<AtomicI64> {
        self.last_since.clone()
    }
}

#[async_trait]
impl MapSource for RecordingSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn download_since(
        &mut self,
        _ctx: &mut SyncContext<'_>,
        since: i64,
        _difficulties: Option<&[String]>,
    ) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_since.store(since, Ordering::SeqCst);
        self.succeed
    }
}

#[derive(Default)]
struct EngineState {
    states: Vec<SwarmState>,
    progress: Option<f64>,
    contents: HashMap<String, Vec<u8>>,
    incomplete: HashSet<String>,
    unwritten: HashSet<String>,
    selected: Vec<String>,
    started: bool,
    stopped: bool,
    descriptor_fetches: usize,
}

/// Swarm engine over a fixed file list. Starting a session writes every
/// selected file into the download directory, then the scripted states are
/// reported one poll at a time, the last one repeating.
pub struct ScriptedEngine {
    files: Vec<String>,
    state: Arc<Mutex<EngineState>>,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::with_files(&[])
    }
}

impl ScriptedEngine {
    pub fn with_files(files: &[&str]) -> Self {
        let state = EngineState {
            states: vec![SwarmState::Downloading, SwarmState::Seeding],
            ..Default::default()
        };
        Self {
            files: files.iter().map(|f| f.to_string()).collect(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn descriptor_bytes(&self) -> Vec<u8> {
        self.files.join("\n").into_bytes()
    }

    pub fn script_states(&self, states: Vec<SwarmState>) {
        self.state.lock().unwrap().states = states;
    }

    pub fn set_progress(&self, progress: f64) {
        self.state.lock().unwrap().progress = Some(progress);
    }

    pub fn set_contents(&self, file: &str, contents: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .contents
            .insert(file.to_string(), contents.to_vec());
    }

    pub fn leave_incomplete(&self, file: &str) {
        self.state.lock().unwrap().incomplete.insert(file.to_string());
    }

    pub fn skip_write(&self, file: &str) {
        self.state.lock().unwrap().unwritten.insert(file.to_string());
    }

    pub fn selected(&self) -> Vec<String> {
        self.state.lock().unwrap().selected.clone()
    }

    pub fn started(&self) -> bool {
        self.state.lock().unwrap().started
    }

    pub fn stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    pub fn descriptor_fetches(&self) -> usize {
        self.state.lock().unwrap().descriptor_fetches
    }
}

#[async_trait]
impl SwarmEngine for ScriptedEngine {
    async fn fetch_descriptor(&self, _locator: &str, _timeout: Duration) -> Result<Bytes, SwarmError> {
        self.state.lock().unwrap().descriptor_fetches += 1;
        Ok(Bytes::from(self.descriptor_bytes()))
    }

    fn parse_descriptor(&self, raw: Bytes) -> Result<SwarmDescriptor, SwarmError> {
        let text = std::str::from_utf8(&raw)
            .map_err(|e| SwarmError::Descriptor(e.to_string()))?;
        let files = text
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| SwarmFileEntry {
                path: l.to_string(),
                length: 0,
            })
            .collect();
        Ok(SwarmDescriptor { files, raw })
    }

    async fn open_session(
        &self,
        descriptor: &SwarmDescriptor,
        download_dir: &Path,
    ) -> Result<Box<dyn SwarmSession>, SwarmError> {
        let files = descriptor
            .files
            .iter()
            .enumerate()
            .map(|(index, entry)| SwarmFile {
                index,
                path: entry.path.clone(),
                complete_path: download_dir.join(&entry.path),
                incomplete_path: download_dir.join(format!("{}.part", entry.path)),
            })
            .collect::<Vec<_>>();
        let priorities = vec![FilePriority::Normal; files.len()];

        Ok(Box::new(ScriptedSession {
            files,
            priorities,
            download_dir: download_dir.to_path_buf(),
            polls: AtomicUsize::new(0),
            state: self.state.clone(),
        }))
    }
}

struct ScriptedSession {
    files: Vec<SwarmFile>,
    priorities: Vec<FilePriority>,
    download_dir: PathBuf,
    polls: AtomicUsize,
    state: Arc<Mutex<EngineState>>,
}

#[async_trait]
impl SwarmSession for ScriptedSession {
    fn files(&self) -> Vec<SwarmFile> {
        self.files.clone()
    }

    async fn set_priority(&mut self, index: usize, priority: FilePriority) -> Result<(), SwarmError> {
        let slot = self
            .priorities
            .get_mut(index)
            .ok_or_else(|| SwarmError::Session(format!("no file {index}")))?;
        *slot = priority;
        Ok(())
    }

    async fn start(&mut self) -> Result<(), SwarmError> {
        std::fs::create_dir_all(&self.download_dir)?;
        let mut state = self.state.lock().unwrap();
        state.started = true;

        for (file, priority) in self.files.iter().zip(&self.priorities) {
            if *priority != FilePriority::Normal {
                continue;
            }
            state.selected.push(file.path.clone());
            if state.unwritten.contains(&file.path) {
                continue;
            }
            let contents = state
                .contents
                .get(&file.path)
                .cloned()
                .unwrap_or_else(|| file.path.clone().into_bytes());
            let target = if state.incomplete.contains(&file.path) {
                &file.incomplete_path
            } else {
                &file.complete_path
            };
            std::fs::write(target, contents)?;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SwarmError> {
        self.state.lock().unwrap().stopped = true;
        Ok(())
    }

    fn status(&self) -> SessionStatus {
        let state = self.state.lock().unwrap();
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        let current = state
            .states
            .get(poll)
            .or_else(|| state.states.last())
            .cloned()
            .unwrap_or(SwarmState::Seeding);
        let progress = state.progress.unwrap_or(match current {
            SwarmState::Seeding | SwarmState::Stopped => 100.0,
            _ => 50.0,
        });
        SessionStatus {
            state: current,
            progress,
        }
    }
}
