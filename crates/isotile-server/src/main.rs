//! Isotile Server Binary
//!
//! Loads a snapshot series in the background, from files or from an
//! upstream server, and serves isosurface tile requests for it.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use isotile_core::isotile_io::SeriesManifest;
use isotile_core::{IsotileConfig, ResidencyMode};
use isotile_server::{serve, spawn_ingest, spawn_upstream_ingest, AppState};

#[derive(Parser, Debug)]
#[command(name = "isotile-server")]
#[command(about = "Serve time series of volumetric snapshots as isosurface tiles", long_about = None)]
struct Args {
    /// Configuration file (TOML, or JSON by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Series manifest (JSON with `basedir` and `filelist`)
    #[arg(short, long, conflicts_with = "files")]
    manifest: Option<PathBuf>,

    /// Snapshot files in temporal order
    files: Vec<PathBuf>,

    /// Directory the snapshot files are relative to
    #[arg(short = 'd', long, default_value = ".")]
    basedir: PathBuf,

    /// Listen address, overrides the configuration file
    #[arg(short, long)]
    addr: Option<String>,

    /// Tile output directory, overrides the configuration file
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Keep only the most recently used snapshot in memory
    #[arg(long)]
    lazy: bool,

    /// Upstream server to pull the series from when no files are given
    #[arg(short, long)]
    upstream: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => IsotileConfig::load(path)?,
        None => IsotileConfig::default(),
    };
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(output_dir) = args.output_dir {
        config.tiles.output_dir = output_dir;
    }
    if args.lazy {
        config.buffer.residency = ResidencyMode::Lazy;
    }
    if let Some(upstream) = args.upstream {
        config.server.upstream = Some(upstream);
    }
    config.validate()?;

    let series = match &args.manifest {
        Some(path) => Some(SeriesManifest::load(path)?),
        None if !args.files.is_empty() => {
            Some(SeriesManifest::from_files(args.basedir.clone(), args.files.clone()))
        }
        None => None,
    };

    let addr = config.server.addr.clone();
    let state = Arc::new(AppState::new(config));

    // Failures are logged by the ingest tasks; the server keeps answering
    // with 412 until data is loaded
    match (series, state.config.server.upstream.clone()) {
        (Some(manifest), _) => {
            let _ingest = spawn_ingest(&state, manifest.filelist, manifest.basedir);
        }
        (None, Some(upstream)) => {
            let _ingest = spawn_upstream_ingest(&state, &upstream);
        }
        (None, None) => tracing::warn!("No snapshot series given, serving without data"),
    }

    serve(&addr, state).await?;
    Ok(())
}
