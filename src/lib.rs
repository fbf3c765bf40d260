//! mapsync - keeps a local map collection in sync with remote sources.
//!
//! Maps are pulled from a primary catalog, a secondary catalog, or a swarm
//! mirror, in that order of preference. Whatever is already present is never
//! downloaded again, and a durable local store records each file's content
//! hash, path and publish time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      SyncOrchestrator                         │
//! │   tries sources in order, stops at the first that completes   │
//! └───────┬───────────────────┬───────────────────┬──────────────┘
//!         │                   │                   │
//! ┌───────┴───────┐   ┌───────┴───────┐   ┌───────┴───────┐
//! │ CatalogSource │   │ CatalogSource │   │  SwarmSource  │
//! │   (primary)   │   │  (secondary)  │   │ (SwarmEngine) │
//! └───────┬───────┘   └───────┬───────┘   └───────┬───────┘
//!         └───────────────────┼───────────────────┘
//!                 ┌───────────┴───────────┐
//!         ┌───────┴───────┐       ┌───────┴───────┐
//!         │  LocalStore   │       │ MetadataCache │
//!         └───────────────┘       └───────────────┘
//! ```
//!
//! All work happens on one task. Concurrent downloads are futures polled by
//! that task, so the store and the cache need no locking.

/// Paths, endpoints, limits and timeouts.
pub mod config;

/// Content-addressed registry of local maps.
pub mod store;

/// Filename-keyed metadata cache.
pub mod metadata;

/// Timeout-bounded HTTP.
pub mod http;

/// Paginated catalog sources.
pub mod catalog;

/// Swarm source and engine boundary.
pub mod swarm;

/// Map file inspection.
pub mod inspect;

/// Source orchestration.
pub mod sync;

#[cfg(test)]
mod testing;

pub use catalog::{CatalogApi, CatalogSource, MapItem, MapPage};
pub use config::{CatalogSettings, SourceToggles, SwarmSettings, SyncConfig};
pub use http::{Fetch, FetchError, HttpFetcher};
pub use inspect::{ArchiveInspector, MapInspector, Sha256Inspector};
pub use metadata::{CachedMetadata, MetadataCache};
pub use store::{LocalStore, MapRecord, StoreError};
pub use swarm::{SwarmEngine, SwarmError, SwarmSession, SwarmSource, TorrentLayout};
pub use sync::{MapSource, SyncContext, SyncOrchestrator};
