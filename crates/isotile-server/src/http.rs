//! HTTP endpoint handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use isotile_core::assembler::ROOT_TILESET;
use isotile_core::isotile_io::DataEnvelope;
use isotile_core::{
    BufferMetadata, DisplayRequest, IsotileError, SessionState, TileLayerDescriptor, Tileset,
    Visualization,
};

use crate::AppState;

/// Visualization type served by `/visualize`
pub const VISTYPE_ISOSURF: &str = "isosurf";

const NO_METADATA: &str = "no meta-data has hold.";
const LOADING: &str = "data is being loaded.";
const LACK_OF_PARAM: &str = "lack of required param.";
const INVALID_URL: &str = "invalid URL specified.";

/// Requested step of a `/visualize` response
pub const HEADER_STEP: &str = "x-isotile-step";
/// Buffer index the step resolved to
pub const HEADER_INDEX: &str = "x-isotile-index";
/// `hit` when the cached decomposition was reused, else `miss`
pub const HEADER_CACHE: &str = "x-isotile-cache";
/// Refresh token shared by the returned layers
pub const HEADER_UPDATE_ID: &str = "x-isotile-update-id";
/// URL of the root tileset
pub const HEADER_TILESET: &str = "x-isotile-tileset";

type ApiError = (StatusCode, String);

fn precondition(message: impl Into<String>) -> ApiError {
    (StatusCode::PRECONDITION_FAILED, message.into())
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Map a pipeline error to a response
///
/// Packaging problems are failures of the external tool (424); a snapshot
/// that cannot be read back is missing (404); everything else is a
/// precondition the request did not meet (412).
pub fn error_response(e: IsotileError) -> ApiError {
    let status = match &e {
        IsotileError::Packaging(_) => StatusCode::FAILED_DEPENDENCY,
        IsotileError::Load(_) => StatusCode::NOT_FOUND,
        IsotileError::NoData { .. }
        | IsotileError::Range(_)
        | IsotileError::Decomposition(_)
        | IsotileError::Extraction(_) => StatusCode::PRECONDITION_FAILED,
    };
    (status, e.to_string())
}

// ============================================================================
// Metadata
// ============================================================================

/// Dataset description plus the supported visualization types
#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataResponse {
    #[serde(flatten)]
    pub metadata: BufferMetadata,
    pub vistype: Vec<String>,
}

/// Describe the loaded dataset
pub async fn get_metadata(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MetadataResponse>, ApiError> {
    let buffer = state.buffer.try_read().map_err(|_| precondition(LOADING))?;
    let metadata = buffer
        .metadata(&state.config.server.public_uri)
        .map_err(|_| precondition(NO_METADATA))?;

    Ok(Json(MetadataResponse {
        metadata,
        vistype: vec![VISTYPE_ISOSURF.to_string()],
    }))
}

// ============================================================================
// Snapshot transfer
// ============================================================================

/// Query of `/data`; both parameters are required
#[derive(Debug, Deserialize)]
pub struct DataQuery {
    pub id: Option<String>,
    pub step: Option<String>,
}

/// One snapshot, addressed by buffer index
#[derive(Debug, Serialize, Deserialize)]
pub struct DataResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub step: usize,
    pub data: DataEnvelope,
}

/// Send the snapshot at a buffer index
pub async fn get_data(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DataQuery>,
) -> Result<Json<DataResponse>, ApiError> {
    let buffer = state
        .buffer
        .clone()
        .try_read_owned()
        .map_err(|_| precondition(LOADING))?;
    let Some(dataset_id) = buffer.id() else {
        return Err(precondition(NO_METADATA));
    };

    let (Some(id), Some(step)) = (query.id, query.step) else {
        return Err(precondition(LACK_OF_PARAM));
    };
    if id != dataset_id {
        return Err(precondition(format!("dataset id mismatch: {}", id)));
    }
    let index: usize = step
        .trim()
        .parse()
        .map_err(|_| precondition(format!("invalid step: {}", step)))?;

    // Lazy buffers read the file back; keep that off the async workers
    let data = tokio::task::spawn_blocking(move || {
        let sample = buffer.sample_at(index).map_err(error_response)?;
        DataEnvelope::encode(&sample).map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))
    })
    .await
    .map_err(internal)??;

    Ok(Json(DataResponse {
        kind: data.kind.clone(),
        step: index,
        data,
    }))
}

// ============================================================================
// Visualization
// ============================================================================

/// Body of `/visualize`
///
/// Every field is optional at the parsing level so a missing one is reported
/// with the same precondition failure as a malformed one.
#[derive(Debug, Default, Deserialize)]
pub struct VisualizeRequest {
    pub step: Option<StepParam>,
    pub vistype: Option<String>,
    pub visparam: Option<VisParam>,
}

/// Step given either as a number or as numeric text
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StepParam {
    Number(i64),
    Text(String),
}

impl StepParam {
    pub fn value(&self) -> Option<i64> {
        match self {
            StepParam::Number(n) => Some(*n),
            StepParam::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Isosurface parameters
#[derive(Debug, Default, Deserialize)]
pub struct VisParam {
    pub value: Option<f64>,
}

/// Outcome of the last visualize request, kept for `/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastUpdate {
    pub step: i64,
    pub index: usize,
    pub cache_hit: bool,
    pub update_id: String,
    /// Where clients fetch the root tileset
    pub tileset_url: String,
    /// Root tileset contents
    pub tileset: Tileset,
    /// Layer update ready to forward to the display wall
    pub display_request: DisplayRequest,
}

type LayerListResponse = ([(&'static str, String); 5], Json<Vec<TileLayerDescriptor>>);

/// Build the isosurface tile set of a step
///
/// The body is the bare layer list; step, index, cache use, update id and
/// root tileset URL travel in `x-isotile-*` headers.
pub async fn visualize(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<LayerListResponse, ApiError> {
    let request: VisualizeRequest =
        serde_json::from_slice(&body).map_err(|_| precondition(LACK_OF_PARAM))?;

    let step = request.step.as_ref().and_then(StepParam::value);
    let threshold = request.visparam.as_ref().and_then(|p| p.value);
    let (Some(step), Some(vistype), Some(threshold)) = (step, request.vistype, threshold) else {
        return Err(precondition(LACK_OF_PARAM));
    };
    if vistype != VISTYPE_ISOSURF {
        return Err(precondition(format!("vistype not supported: {}", vistype)));
    }

    let worker = state.clone();
    let (visualization, tileset_url) = tokio::task::spawn_blocking(move || {
        let buffer = worker.buffer.try_read().map_err(|_| precondition(LOADING))?;
        let mut session = worker.session.blocking_lock();
        let visualization = session
            .visualize(&buffer, step, threshold)
            .map_err(error_response)?;
        let tileset_url = session.assembler().content_url(ROOT_TILESET);
        Ok::<_, ApiError>((visualization, tileset_url))
    })
    .await
    .map_err(internal)??;

    let Visualization {
        step,
        index,
        cache_hit,
        tiles,
    } = visualization;
    let display_request = DisplayRequest::update_layers(
        &state.request_ids,
        &state.config.server.display_content_id,
        &tiles.layers,
    )
    .map_err(internal)?;
    tracing::info!(
        "Served step {} (index {}, cache {}) with {} layers",
        step,
        index,
        if cache_hit { "hit" } else { "miss" },
        tiles.layers.len()
    );

    let headers = [
        (HEADER_STEP, step.to_string()),
        (HEADER_INDEX, index.to_string()),
        (HEADER_CACHE, if cache_hit { "hit" } else { "miss" }.to_string()),
        (HEADER_UPDATE_ID, tiles.update_id.clone()),
        (HEADER_TILESET, tileset_url.clone()),
    ];
    *state.last_update.write().await = Some(LastUpdate {
        step,
        index,
        cache_hit,
        update_id: tiles.update_id,
        tileset_url,
        tileset: tiles.tileset,
        display_request,
    });

    Ok((headers, Json(tiles.layers)))
}

// ============================================================================
// System
// ============================================================================

/// Server status
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub ready: bool,
    pub busy: bool,
    pub loaded: usize,
    pub total: usize,
    /// Session state, absent while a request holds the session
    pub session: Option<SessionState>,
    /// Last visualize outcome, absent before the first one or while it is
    /// being replaced
    pub last_update: Option<LastUpdate>,
}

/// Report ingest progress without waiting on any lock
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let ready = state
        .buffer
        .try_read()
        .map(|b| b.is_ready())
        .unwrap_or(false);
    let session = state.session.try_lock().ok().map(|s| s.state());
    let last_update = state
        .last_update
        .try_read()
        .ok()
        .and_then(|last| last.clone());

    Json(StatusResponse {
        ready,
        busy: state.progress.is_busy(),
        loaded: state.progress.loaded(),
        total: state.progress.total(),
        session,
        last_update,
    })
}

/// Query of `/quit`
#[derive(Debug, Default, Deserialize)]
pub struct QuitQuery {
    pub with_tb: Option<String>,
}

/// Stop the server, optionally stopping the upstream data source first
pub async fn quit(State(state): State<Arc<AppState>>, Query(query): Query<QuitQuery>) -> &'static str {
    if query.with_tb.as_deref() == Some("y") {
        if let Some(upstream) = &state.config.server.upstream {
            let url = format!("{}/quit", upstream.trim_end_matches('/'));
            match state.http.get(&url).send().await {
                Ok(response) => tracing::info!("Upstream {} answered {}", url, response.status()),
                Err(e) => tracing::warn!("Failed to stop upstream {}: {}", url, e),
            }
        }
    }

    tracing::info!("Shutdown requested");
    state.shutdown.notify_one();
    "ok"
}

/// Anything outside the routes above
pub async fn not_found() -> ApiError {
    (StatusCode::NOT_FOUND, INVALID_URL.to_string())
}
