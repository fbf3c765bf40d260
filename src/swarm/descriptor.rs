//! Torrent metainfo parsing.
//!
//! Only the file layout is read; pieces and trackers are left to the engine.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{SwarmError, SwarmFileEntry};

#[derive(Debug, Deserialize)]
struct MetaInfo {
    info: Info,
}

#[derive(Debug, Deserialize)]
struct Info {
    name: String,
    #[serde(default)]
    length: Option<u64>,
    #[serde(default)]
    files: Option<Vec<InfoFile>>,
}

#[derive(Debug, Deserialize)]
struct InfoFile {
    length: u64,
    path: Vec<String>,
}

/// File layout of a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentLayout {
    pub name: String,
    /// Multi-file torrents keep their files under a directory named `name`.
    pub multi_file: bool,
    /// In torrent order; paths are relative to [`root`](Self::root).
    pub files: Vec<SwarmFileEntry>,
}

impl TorrentLayout {
    pub fn parse(raw: &[u8]) -> Result<Self, SwarmError> {
        let meta: MetaInfo = serde_bencode::from_bytes(raw)
            .map_err(|e| SwarmError::Descriptor(e.to_string()))?;
        let info = meta.info;

        match (info.files, info.length) {
            (Some(files), _) => {
                let files = files
                    .into_iter()
                    .map(|f| SwarmFileEntry {
                        path: f.path.join("/"),
                        length: f.length,
                    })
                    .collect();
                Ok(Self {
                    name: info.name,
                    multi_file: true,
                    files,
                })
            }
            (None, Some(length)) => Ok(Self {
                files: vec![SwarmFileEntry {
                    path: info.name.clone(),
                    length,
                }],
                name: info.name,
                multi_file: false,
            }),
            (None, None) => Err(SwarmError::Descriptor(
                "torrent lists neither files nor a length".to_string(),
            )),
        }
    }

    /// Directory the file paths are relative to, for a download into `download_dir`.
    pub fn root(&self, download_dir: &Path) -> PathBuf {
        if self.multi_file {
            download_dir.join(&self.name)
        } else {
            download_dir.to_path_buf()
        }
    }
}
