//! Sync configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default primary catalog host.
pub const DEFAULT_PRIMARY_URL: &str = "https://synthriderz.com";

/// Default secondary catalog host.
pub const DEFAULT_SECONDARY_URL: &str = "https://api.synplicity.live";

/// Where the current swarm locator is published.
pub const DEFAULT_LOCATOR_URL: &str = "https://www.dropbox.com/scl/fi/kt38cgixmajyalxo8vxfk/magnet_songs.txt?rlkey=sk8quyuymm82sly13ev8kjqwj&st=f88d61u9&raw=1";

/// Swarm locator used when neither the published nor a cached one is available.
pub const DEFAULT_FALLBACK_LOCATOR: &str = "magnet:?xt=urn:btih:c2c904b7be20bb9bdcb4d2bf3b0e8dcbfba3e428&dn=CustomSongs&tr=udp%3a%2f%2ftracker.opentrackr.org%3a1337%2fannounce&tr=udp%3a%2f%2fopen.tracker.cl%3a1337%2fannounce&tr=udp%3a%2f%2ftracker.torrent.eu.org%3a451%2fannounce&tr=udp%3a%2f%2fopen.stealth.si%3a80%2fannounce&tr=udp%3a%2f%2fexplodie.org%3a6969%2fannounce&tr=udp%3a%2f%2fexodus.desync.com%3a6969%2fannounce&tr=udp%3a%2f%2ftracker.tiny-vps.com%3a6969%2fannounce&tr=udp%3a%2f%2fopen.free-tracker.ga%3a6969%2fannounce&tr=http%3a%2f%2ft.jaekr.sh%3a6969%2fannounce&tr=http%3a%2f%2fshubt.net%3a2710%2fannounce&tr=http%3a%2f%2fshare.hkg-fansub.info%3a80%2fannounce.php&tr=http%3a%2f%2fservandroidkino.ru%3a80%2fannounce&tr=http%3a%2f%2fretracker.spark-rostov.ru%3a80%2fannounce&tr=http%3a%2f%2fhome.yxgz.club%3a6969%2fannounce&tr=http%3a%2f%2ffinbytes.org%3a80%2fannounce.php&tr=http%3a%2f%2f0123456789nonexistent.com%3a80%2fannounce&tr=udp%3a%2f%2fwepzone.net%3a6969%2fannounce&tr=udp%3a%2f%2fttk2.nbaonlineservice.com%3a6969%2fannounce&tr=udp%3a%2f%2ftracker2.dler.org%3a80%2fannounce&tr=udp%3a%2f%2ftracker.tryhackx.org%3a6969%2fannounce";

/// Extension of map files inside the content directory and the swarm.
pub const DEFAULT_MAP_EXTENSION: &str = ".synth";

/// Paginated catalog tuning.
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    /// Items requested per page.
    pub page_size: usize,

    /// Maximum in-flight item downloads.
    pub parallel_downloads: usize,

    /// Drain and checkpoint after this many admitted downloads.
    pub checkpoint_every: usize,

    /// Timeout for a single page request. Short, so a dead site fails fast.
    pub page_timeout: Duration,

    /// Timeout for a single map download.
    pub map_timeout: Duration,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            parallel_downloads: 10,
            checkpoint_every: 100,
            page_timeout: Duration::from_secs(3),
            map_timeout: Duration::from_secs(60),
        }
    }
}

/// Swarm source tuning.
#[derive(Debug, Clone)]
pub struct SwarmSettings {
    /// Where the current locator is published.
    pub locator_url: Option<String>,

    /// Locator used when neither the online lookup nor the cached copy is available.
    pub fallback_locator: Option<String>,

    /// Session state polling interval.
    pub poll_interval: Duration,

    /// Upper bound on a whole swarm download.
    pub download_deadline: Duration,

    /// Timeout for resolving a descriptor from a locator.
    pub descriptor_timeout: Duration,

    /// Timeout for the online locator lookup.
    pub locator_timeout: Duration,

    /// Ask the catalogs for metadata of swarm files that only have partial cached data.
    pub remote_metadata: bool,

    /// Timeout per remote metadata lookup.
    pub metadata_lookup_timeout: Duration,
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self {
            locator_url: Some(DEFAULT_LOCATOR_URL.to_string()),
            fallback_locator: Some(DEFAULT_FALLBACK_LOCATOR.to_string()),
            poll_interval: Duration::from_secs(1),
            download_deadline: Duration::from_secs(12 * 60 * 60),
            descriptor_timeout: Duration::from_secs(30),
            locator_timeout: Duration::from_secs(120),
            remote_metadata: false,
            metadata_lookup_timeout: Duration::from_secs(5),
        }
    }
}

/// Which sources take part in a sync.
#[derive(Debug, Clone)]
pub struct SourceToggles {
    pub primary: bool,
    pub secondary: bool,
    pub swarm: bool,

    /// Fall back to the secondary catalog for single-map metadata lookups.
    pub secondary_metadata: bool,
}

impl Default for SourceToggles {
    fn default() -> Self {
        Self {
            primary: true,
            secondary: true,
            swarm: true,
            secondary_metadata: false,
        }
    }
}

/// Configuration for a sync run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Final location of map files.
    pub content_dir: PathBuf,

    /// Directory for the local store, metadata cache and cached locator.
    pub data_dir: PathBuf,

    /// Scratch directory for in-progress catalog downloads.
    pub temp_dir: PathBuf,

    /// Directory for the cached swarm descriptor.
    pub swarm_cache_dir: PathBuf,

    /// Directory the swarm session downloads into before files are moved.
    pub swarm_download_dir: PathBuf,

    /// Optional offline publish-time mappings.
    pub mapping_file: Option<PathBuf>,

    /// Map file extension, including the dot.
    pub map_extension: String,

    /// Primary catalog base URL.
    pub primary_url: String,

    /// Secondary catalog base URL.
    pub secondary_url: String,

    pub sources: SourceToggles,
    pub catalog: CatalogSettings,
    pub swarm: SwarmSettings,
}

impl SyncConfig {
    /// Create a config for the given content directory with default settings.
    ///
    /// Swarm scratch directories live next to the content directory so moves
    /// into it stay on one file system.
    pub fn new(content_dir: PathBuf) -> Self {
        let parent = content_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| content_dir.clone());

        Self {
            swarm_cache_dir: parent.join("SongDlCache"),
            swarm_download_dir: parent.join("SongDl"),
            content_dir,
            data_dir: default_data_dir(),
            temp_dir: std::env::temp_dir().join("mapsync"),
            mapping_file: None,
            map_extension: DEFAULT_MAP_EXTENSION.to_string(),
            primary_url: DEFAULT_PRIMARY_URL.to_string(),
            secondary_url: DEFAULT_SECONDARY_URL.to_string(),
            sources: SourceToggles::default(),
            catalog: CatalogSettings::default(),
            swarm: SwarmSettings::default(),
        }
    }

    /// Set the data directory.
    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.data_dir = dir;
        self
    }

    /// Set the scratch directory.
    pub fn with_temp_dir(mut self, dir: PathBuf) -> Self {
        self.temp_dir = dir;
        self
    }

    /// Set both swarm directories.
    pub fn with_swarm_dirs(mut self, cache_dir: PathBuf, download_dir: PathBuf) -> Self {
        self.swarm_cache_dir = cache_dir;
        self.swarm_download_dir = download_dir;
        self
    }

    /// Set the offline mapping file.
    pub fn with_mapping_file(mut self, path: PathBuf) -> Self {
        self.mapping_file = Some(path);
        self
    }

    /// Set which sources are used.
    pub fn with_sources(mut self, sources: SourceToggles) -> Self {
        self.sources = sources;
        self
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("mapsync_local.json")
    }

    pub fn metadata_cache_path(&self) -> PathBuf {
        self.data_dir.join("map_metadata.json")
    }

    pub fn locator_cache_path(&self) -> PathBuf {
        self.data_dir.join("magnet_songs.txt")
    }

    pub fn descriptor_cache_path(&self) -> PathBuf {
        self.swarm_cache_dir.join("cached.torrent")
    }
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "mapsync", "mapsync")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".mapsync"))
}
