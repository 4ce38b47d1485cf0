//! Snapshot series pulled from an upstream server
//!
//! The upstream speaks the same protocol this server exposes: `/` describes
//! the dataset and `/data?id=<id>&step=<index>` returns one snapshot in a
//! base64 envelope. Every snapshot is fetched in order and the series is
//! handed to the buffer in one piece.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use isotile_core::isotile_io::{IoError, VolumeSample};
use isotile_core::LoadError;

use crate::http::DataResponse;
use crate::AppState;

/// Errors raised while pulling a series from upstream
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Request failed or was answered with an error status
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Snapshot payload could not be decoded
    #[error("Cannot decode snapshot {index} from {url}: {source}")]
    Decode {
        url: String,
        index: usize,
        #[source]
        source: IoError,
    },

    /// Fetched series was rejected by the buffer
    #[error("Upstream series rejected: {0}")]
    Load(#[from] LoadError),

    /// Ingest task panicked or was cancelled
    #[error("Ingest task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Dataset id as sent by upstream; older servers use integers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DatasetId {
    Text(String),
    Number(i64),
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetId::Text(id) => f.write_str(id),
            DatasetId::Number(id) => write!(f, "{}", id),
        }
    }
}

/// Part of the upstream metadata needed to pull the series
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamMetadata {
    pub id: DatasetId,
    /// Number of snapshots
    pub steps: usize,
}

/// Client for one upstream server
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    base: String,
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(base: &str, http: reqwest::Client) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, UpstreamError> {
        let request_error = |source| UpstreamError::Request {
            url: url.clone(),
            source,
        };
        self.http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(request_error)?
            .json()
            .await
            .map_err(request_error)
    }

    /// Dataset description
    pub async fn metadata(&self) -> Result<UpstreamMetadata, UpstreamError> {
        self.get_json(format!("{}/", self.base)).await
    }

    /// Snapshot at buffer index `index`
    pub async fn snapshot(&self, id: &DatasetId, index: usize) -> Result<VolumeSample, UpstreamError> {
        let url = format!("{}/data?id={}&step={}", self.base, id, index);
        let response: DataResponse = self.get_json(url.clone()).await?;
        response
            .data
            .decode()
            .map_err(|source| UpstreamError::Decode { url, index, source })
    }

    /// Every snapshot of the upstream series, in order
    pub async fn fetch_series(&self) -> Result<Vec<VolumeSample>, UpstreamError> {
        let metadata = self.metadata().await?;
        tracing::info!(
            "Pulling {} snapshots of dataset {} from {}",
            metadata.steps,
            metadata.id,
            self.base
        );
        let mut samples = Vec::with_capacity(metadata.steps);
        for index in 0..metadata.steps {
            samples.push(self.snapshot(&metadata.id, index).await?);
            tracing::debug!("Fetched snapshot {}/{}", index + 1, metadata.steps);
        }
        Ok(samples)
    }
}

/// Pull the upstream series into the buffer in the background
///
/// The buffer stays write-locked while fetching, so requests are answered
/// as during a file ingest. Resolves to the number of snapshots loaded; on
/// failure the buffer is left empty.
pub fn spawn_upstream_ingest(state: &AppState, base: &str) -> JoinHandle<Result<usize, UpstreamError>> {
    let buffer = state.buffer.clone();
    let client = UpstreamClient::new(base, state.http.clone());
    tokio::spawn(async move {
        let mut guard = buffer.write_owned().await;
        let samples = match client.fetch_series().await {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!("Upstream ingest from {} failed: {}", client.base(), e);
                guard.reset();
                return Err(e);
            }
        };

        let result = tokio::task::spawn_blocking(move || {
            guard.ingest_samples(samples)?;
            Ok::<_, LoadError>(guard.len())
        })
        .await?;
        match &result {
            Ok(count) => tracing::info!("Ingested {} snapshots from {}", count, client.base()),
            Err(e) => tracing::warn!("Upstream series from {} rejected: {}", client.base(), e),
        }
        Ok(result?)
    })
}
