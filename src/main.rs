//! mapsync - keeps a local map collection in sync.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mapsync::{
    catalog::item::parse_timestamp,
    config::{DEFAULT_PRIMARY_URL, DEFAULT_SECONDARY_URL},
    ArchiveInspector, HttpFetcher, SourceToggles, SwarmEngine, SyncConfig, SyncOrchestrator,
};

/// Keeps a local map collection in sync with remote catalogs.
#[derive(Parser)]
#[command(name = "mapsync", about = "Keeps a local map collection in sync")]
struct Cli {
    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PathArgs {
    /// Directory holding the map files.
    #[arg(long, env = "MAPSYNC_CONTENT_DIR")]
    content_dir: PathBuf,

    /// Directory for the local store and caches.
    #[arg(long, env = "MAPSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Scratch directory for in-progress downloads.
    #[arg(long, env = "MAPSYNC_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Directory for the cached swarm descriptor.
    #[arg(long, env = "MAPSYNC_SWARM_CACHE_DIR")]
    swarm_cache_dir: Option<PathBuf>,

    /// Directory the swarm downloads into before files are moved.
    #[arg(long, env = "MAPSYNC_SWARM_DOWNLOAD_DIR")]
    swarm_download_dir: Option<PathBuf>,

    /// Register maps without catalog metadata under their SHA-256.
    #[arg(long, env = "MAPSYNC_HASH_UNKNOWN_MAPS")]
    hash_unknown_maps: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download new maps.
    Sync {
        /// Only maps published after this time (RFC 3339). Defaults to the last sync.
        #[arg(long, conflicts_with = "all")]
        since: Option<String>,

        /// Consider the whole catalog.
        #[arg(long)]
        all: bool,

        /// Only maps with one of these difficulties. Repeatable.
        #[arg(long = "difficulty")]
        difficulties: Vec<String>,

        /// Primary catalog base URL.
        #[arg(long, env = "MAPSYNC_PRIMARY_URL", default_value = DEFAULT_PRIMARY_URL)]
        primary_url: String,

        /// Secondary catalog base URL.
        #[arg(long, env = "MAPSYNC_SECONDARY_URL", default_value = DEFAULT_SECONDARY_URL)]
        secondary_url: String,

        /// Skip the primary catalog.
        #[arg(long, env = "MAPSYNC_NO_PRIMARY")]
        no_primary: bool,

        /// Skip the secondary catalog.
        #[arg(long, env = "MAPSYNC_NO_SECONDARY")]
        no_secondary: bool,

        /// Skip the swarm mirror.
        #[arg(long, env = "MAPSYNC_NO_SWARM")]
        no_swarm: bool,

        /// Also ask the secondary catalog for single-map metadata.
        #[arg(long, env = "MAPSYNC_SECONDARY_METADATA")]
        secondary_metadata: bool,

        /// Offline publish-time mapping file.
        #[arg(long, env = "MAPSYNC_MAPPING_FILE")]
        mapping_file: Option<PathBuf>,

        /// Where the current swarm locator is published.
        #[arg(long, env = "MAPSYNC_LOCATOR_URL")]
        locator_url: Option<String>,

        /// Swarm locator to use when none can be resolved.
        #[arg(long, env = "MAPSYNC_FALLBACK_LOCATOR")]
        fallback_locator: Option<String>,
    },

    /// Scan the content directory and show what is stored.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mapsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = SyncConfig::new(cli.paths.content_dir);
    if let Some(dir) = cli.paths.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(dir) = cli.paths.temp_dir {
        config = config.with_temp_dir(dir);
    }
    if cli.paths.swarm_cache_dir.is_some() || cli.paths.swarm_download_dir.is_some() {
        let cache = cli.paths.swarm_cache_dir.unwrap_or_else(|| config.swarm_cache_dir.clone());
        let download = cli
            .paths
            .swarm_download_dir
            .unwrap_or_else(|| config.swarm_download_dir.clone());
        config = config.with_swarm_dirs(cache, download);
    }
    let inspector = if cli.paths.hash_unknown_maps {
        ArchiveInspector::new().with_content_hash_fallback()
    } else {
        ArchiveInspector::new()
    };

    match cli.command {
        Commands::Sync {
            since,
            all,
            difficulties,
            primary_url,
            secondary_url,
            no_primary,
            no_secondary,
            no_swarm,
            secondary_metadata,
            mapping_file,
            locator_url,
            fallback_locator,
        } => {
            config.primary_url = primary_url;
            config.secondary_url = secondary_url;
            config.mapping_file = mapping_file;
            if locator_url.is_some() {
                config.swarm.locator_url = locator_url;
            }
            if fallback_locator.is_some() {
                config.swarm.fallback_locator = fallback_locator;
            }
            config = config.with_sources(SourceToggles {
                primary: !no_primary,
                secondary: !no_secondary,
                swarm: !no_swarm,
                secondary_metadata,
            });

            let since = match (since, all) {
                (Some(raw), _) => Some(
                    parse_timestamp(&raw).with_context(|| format!("invalid --since time: {raw}"))?,
                ),
                (None, true) => Some(0),
                (None, false) => None,
            };
            let difficulties = (!difficulties.is_empty()).then_some(difficulties);

            run_sync(&config, inspector, since, difficulties.as_deref()).await?;
        }

        Commands::Status => {
            show_status(&config, inspector).await?;
        }
    }

    Ok(())
}

fn build(
    config: &SyncConfig,
    inspector: ArchiveInspector,
    engine: Option<Arc<dyn SwarmEngine>>,
) -> Result<SyncOrchestrator> {
    let fetch = Arc::new(HttpFetcher::new().context("failed to build HTTP client")?);
    Ok(SyncOrchestrator::from_config(
        config,
        fetch,
        Arc::new(inspector),
        engine,
    ))
}

#[cfg(feature = "rqbit")]
async fn swarm_engine(config: &SyncConfig) -> Result<Option<Arc<dyn SwarmEngine>>> {
    if !config.sources.swarm {
        return Ok(None);
    }
    let engine = mapsync::swarm::rqbit::RqbitEngine::new(&config.swarm_download_dir)
        .await
        .context("failed to start swarm session")?;
    Ok(Some(Arc::new(engine)))
}

#[cfg(not(feature = "rqbit"))]
async fn swarm_engine(_config: &SyncConfig) -> Result<Option<Arc<dyn SwarmEngine>>> {
    Ok(None)
}

/// Run one sync, incremental unless a cutoff is given.
async fn run_sync(
    config: &SyncConfig,
    inspector: ArchiveInspector,
    since: Option<i64>,
    difficulties: Option<&[String]>,
) -> Result<()> {
    let engine = swarm_engine(config).await?;
    let mut sync = build(config, inspector, engine)?;
    tracing::info!(sources = ?sync.source_names(), "Starting sync");
    sync.initialize().await;

    let ok = match since {
        Some(since) => sync.try_sync(since, difficulties).await,
        None => sync.sync_incremental(difficulties).await,
    };
    if !ok {
        bail!("no map source could be synced");
    }

    println!("{} maps in {}", sync.store().len(), config.content_dir.display());
    Ok(())
}

async fn show_status(config: &SyncConfig, inspector: ArchiveInspector) -> Result<()> {
    let mut quiet = config.clone();
    quiet.sources.swarm = false;
    let mut sync = build(&quiet, inspector, None)?;
    sync.initialize().await;

    let store = sync.store();
    println!("Content dir:   {}", config.content_dir.display());
    println!("Data dir:      {}", config.data_dir.display());
    println!("Maps:          {}", store.len());
    println!("Metadata:      {}", sync.metadata().len());
    match store.last_fetch() {
        0 => println!("Last sync:     never"),
        sec => println!("Last sync:     {}", mapsync::catalog::item::format_plain(sec)),
    }
    Ok(())
}
