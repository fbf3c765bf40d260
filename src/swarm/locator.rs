//! Resolution of the swarm locator.
//!
//! The current locator is published online. A copy is cached locally so a
//! changed locator can be detected, which also invalidates the cached
//! descriptor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::http::Fetch;
use crate::store::fs;

/// JSON form of the published locator document.
#[derive(Debug, Deserialize)]
struct LocatorDocument {
    #[serde(alias = "magnet")]
    locator: String,
    #[serde(default)]
    updated_at: Option<String>,
}

/// Extract a locator from a document that is either plain text or JSON.
pub fn parse_locator(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let candidate = if raw.starts_with('{') {
        let doc = serde_json::from_str::<LocatorDocument>(raw).ok()?;
        debug!(updated_at = ?doc.updated_at, "Locator document");
        doc.locator
    } else {
        raw.to_string()
    };

    let candidate = candidate.trim();
    let is_magnet = candidate
        .get(..8)
        .map_or(false, |scheme| scheme.eq_ignore_ascii_case("magnet:?"));
    if is_magnet && candidate.len() > 8 {
        Some(candidate.to_string())
    } else {
        None
    }
}

pub struct LocatorRepo {
    fetch: Arc<dyn Fetch>,
    remote_url: Option<String>,
    timeout: Duration,
    cache_path: PathBuf,
    descriptor_cache_path: PathBuf,
    fallback: Option<String>,
}

impl LocatorRepo {
    pub fn new(
        fetch: Arc<dyn Fetch>,
        remote_url: Option<String>,
        timeout: Duration,
        cache_path: PathBuf,
        descriptor_cache_path: PathBuf,
        fallback: Option<String>,
    ) -> Self {
        Self {
            fetch,
            remote_url,
            timeout,
            cache_path,
            descriptor_cache_path,
            fallback,
        }
    }

    /// The locator to use: online if available, else cached, else the fallback.
    pub async fn resolve(&self) -> Option<String> {
        let remote_raw = self.fetch_remote().await;
        let remote = remote_raw.as_deref().and_then(parse_locator);

        let cached_raw = std::fs::read_to_string(&self.cache_path).ok();
        let cached = cached_raw.as_deref().and_then(parse_locator);

        match (remote, cached) {
            (Some(remote), Some(cached)) => {
                // Staleness is byte-for-byte on the raw document, as cached.
                if remote_raw == cached_raw {
                    debug!("Cached locator is up to date");
                    Some(cached)
                } else {
                    info!("Locator changed, invalidating cached descriptor");
                    fs::remove_quietly(&self.descriptor_cache_path);
                    self.write_cache(remote_raw.as_deref().unwrap_or(&remote));
                    Some(remote)
                }
            }
            (Some(remote), None) => {
                debug!("Caching locator");
                self.write_cache(remote_raw.as_deref().unwrap_or(&remote));
                fs::remove_quietly(&self.descriptor_cache_path);
                Some(remote)
            }
            (None, Some(cached)) => {
                warn!("Could not get the latest locator, using cached copy");
                Some(cached)
            }
            (None, None) => {
                if self.fallback.is_some() {
                    warn!("No online or cached locator, using fallback");
                } else {
                    error!("No online or cached locator available");
                }
                self.fallback.clone()
            }
        }
    }

    async fn fetch_remote(&self) -> Option<String> {
        let url = self.remote_url.as_deref()?;
        match self.fetch.get_string(url, self.timeout).await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(url, error = %e, "Failed to fetch locator");
                None
            }
        }
    }

    fn write_cache(&self, raw: &str) {
        if let Err(e) = fs::write_atomic(&self.cache_path, raw.as_bytes()) {
            warn!(path = %self.cache_path.display(), error = %e, "Failed to cache locator");
        }
    }
}
