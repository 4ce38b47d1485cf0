//! Isotile Server - HTTP surface for isosurface tiling
//!
//! Serves the dataset metadata, raw snapshots and on-demand isosurface tile
//! sets for a temporal buffer loaded in the background, either from files
//! or from an upstream server.

pub mod http;
pub mod upstream;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use thiserror::Error;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use isotile_core::isotile_io::SeriesEntry;
use isotile_core::{
    CommandPackager, IngestProgress, IsotileConfig, LoadResult, MeshPackager, RequestIdCounter,
    TemporalBuffer, TileAssembler, VisualizationSession,
};

pub use http::LastUpdate;
pub use upstream::{spawn_upstream_ingest, UpstreamClient, UpstreamError};

/// Server startup and runtime errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Shared application state
pub struct AppState {
    /// Snapshot series; written only by the ingest task
    pub buffer: Arc<RwLock<TemporalBuffer>>,
    /// Progress of the running ingest, readable without the buffer lock
    pub progress: Arc<IngestProgress>,
    /// Visualize requests are served one at a time
    pub session: Mutex<VisualizationSession>,
    /// Outcome of the last successful visualize request
    pub last_update: RwLock<Option<LastUpdate>>,
    pub request_ids: RequestIdCounter,
    pub config: IsotileConfig,
    pub shutdown: Notify,
    pub http: reqwest::Client,
}

impl AppState {
    /// State packaging tiles with the configured command-line packager
    pub fn new(config: IsotileConfig) -> Self {
        let packager = Arc::new(CommandPackager::new(&config.packager));
        Self::with_packager(config, packager)
    }

    /// State packaging tiles through `packager`
    pub fn with_packager(config: IsotileConfig, packager: Arc<dyn MeshPackager>) -> Self {
        let buffer = TemporalBuffer::new(config.buffer.residency);
        let progress = buffer.progress();
        let assembler = TileAssembler::new(config.tiles.clone(), packager);
        let session = VisualizationSession::new(config.decomposition.divisors, assembler);

        Self {
            buffer: Arc::new(RwLock::new(buffer)),
            progress,
            session: Mutex::new(session),
            last_update: RwLock::new(None),
            request_ids: RequestIdCounter::new(),
            config,
            shutdown: Notify::new(),
            http: reqwest::Client::new(),
        }
    }
}

/// Load a series into the buffer on a blocking thread
///
/// The write lock is held for the whole ingest; requests arriving meanwhile
/// are rejected rather than queued.
pub fn spawn_ingest(
    state: &AppState,
    entries: Vec<SeriesEntry>,
    base_dir: PathBuf,
) -> JoinHandle<LoadResult<()>> {
    let buffer = state.buffer.clone();
    tokio::task::spawn_blocking(move || {
        let mut buffer = buffer.blocking_write();
        tracing::info!("Ingesting {} snapshots from {:?}", entries.len(), base_dir);
        let result = buffer.ingest(&entries, &base_dir);
        match &result {
            Ok(()) => tracing::info!(
                "Ingest complete: {} snapshots, dims {:?}, datalen {}",
                buffer.len(),
                buffer.dims(),
                buffer.datalen()
            ),
            Err(e) => tracing::warn!("Ingest failed: {}", e),
        }
        result
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(http::get_metadata))
        .route("/data", get(http::get_data))
        .route("/visualize", post(http::visualize))
        .route("/visualize/", post(http::visualize))
        .route("/status", get(http::get_status))
        .route("/quit", get(http::quit))
        .fallback(http::not_found)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the server; returns after `/quit`
pub async fn serve(addr: &str, state: Arc<AppState>) -> Result<(), ServerError> {
    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
    tracing::info!("Isotile server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { state.shutdown.notified().await })
        .await?;
    tracing::info!("Isotile server stopped");
    Ok(())
}
