//! Content inspection of local map files.
//!
//! A map file is a zip archive. Maps from the primary catalog carry a
//! `synthriderz.meta.json` entry with the catalog id and content hash; that
//! hash is what the catalogs list, so it is the one the store dedups on.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::store::MapRecord;

/// Archive entry holding the catalog id and hash.
pub const ARCHIVE_METADATA_ENTRY: &str = "synthriderz.meta.json";

/// Reads the metadata of a map file on disk.
///
/// Implementations must return the content hash the catalogs use for the
/// same file, since dedup relies on it.
pub trait MapInspector: Send + Sync {
    fn inspect(&self, path: &Path) -> anyhow::Result<MapRecord>;
}

#[derive(Debug, Deserialize)]
struct ArchiveMetadata {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    hash: Option<String>,
}

/// Reads the catalog id and hash embedded in the map archive.
///
/// Archives without the metadata entry fail inspection, so they are not
/// registered and the catalogs download them again. With
/// [`with_content_hash_fallback`](Self::with_content_hash_fallback) they are
/// registered under their SHA-256 instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveInspector {
    hash_fallback: bool,
}

impl ArchiveInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_hash_fallback(mut self) -> Self {
        self.hash_fallback = true;
        self
    }

    fn read_metadata(path: &Path) -> anyhow::Result<Option<ArchiveMetadata>> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut archive = ZipArchive::new(BufReader::new(file))
            .with_context(|| format!("{} is not a map archive", path.display()))?;

        let text = match archive.by_name(ARCHIVE_METADATA_ENTRY) {
            Ok(mut entry) => {
                let mut text = String::new();
                entry.read_to_string(&mut text)?;
                text
            }
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let meta = serde_json::from_str(&text)
            .with_context(|| format!("bad {} in {}", ARCHIVE_METADATA_ENTRY, path.display()))?;
        Ok(Some(meta))
    }
}

impl MapInspector for ArchiveInspector {
    fn inspect(&self, path: &Path) -> anyhow::Result<MapRecord> {
        let meta = Self::read_metadata(path)?;
        let hash = meta
            .as_ref()
            .and_then(|m| m.hash.as_deref())
            .map(str::trim)
            .filter(|h| !h.is_empty());

        match hash {
            Some(hash) => Ok(MapRecord {
                id: meta.as_ref().map_or(0, |m| m.id),
                hash: hash.to_string(),
                file_path: path.to_path_buf(),
                title: title_of(path),
                ..Default::default()
            }),
            None if self.hash_fallback => {
                debug!(path = %path.display(), "No catalog hash in archive, hashing content");
                Sha256Inspector.inspect(path)
            }
            None => bail!("{} has no catalog hash in {}", path.display(), ARCHIVE_METADATA_ENTRY),
        }
    }
}

/// Hashes the file bytes with SHA-256 and takes the title from the file stem.
///
/// Only useful for files no catalog knows; the hashes never match a catalog's.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Inspector;

impl MapInspector for Sha256Inspector {
    fn inspect(&self, path: &Path) -> anyhow::Result<MapRecord> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading {}", path.display()))?;
        if bytes.is_empty() {
            bail!("{} is empty", path.display());
        }

        Ok(MapRecord {
            hash: hex::encode(Sha256::digest(&bytes)),
            file_path: path.to_path_buf(),
            title: title_of(path),
            ..Default::default()
        })
    }
}

fn title_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
