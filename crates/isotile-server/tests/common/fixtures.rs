//! Test fixtures: snapshot series on disk and servers loaded from them

use std::path::{Path, PathBuf};
use std::sync::Arc;

use isotile_core::isotile_io::{SeriesEntry, SphCodec, VolumeCodec, VolumeSample};
use isotile_core::{IsotileConfig, MeshPackager};
use isotile_server::{create_router, spawn_ingest, AppState};

/// Write one scalar SPH file per `(step, time)`; value at (i, j, k) of file n is `i + j + k + n`
pub fn write_series(dir: &Path, dims: [usize; 3], stamps: &[(i64, f64)]) -> Vec<PathBuf> {
    stamps
        .iter()
        .enumerate()
        .map(|(n, &(step, time))| {
            let mut data = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
            for k in 0..dims[2] {
                for j in 0..dims[1] {
                    for i in 0..dims[0] {
                        data.push((i + j + k + n) as f64);
                    }
                }
            }
            let sample = VolumeSample::from_samples(dims, [0.0; 3], [1.0; 3], 1, data)
                .unwrap()
                .with_step(step, time);
            let name = PathBuf::from(format!("snap_{:03}.sph", n));
            SphCodec.save(&dir.join(&name), &sample).unwrap();
            name
        })
        .collect()
}

/// Configuration writing tiles below `dir`
pub fn test_config(dir: &Path) -> IsotileConfig {
    let mut config = IsotileConfig::default();
    config.tiles.output_dir = dir.join("tiles");
    config.decomposition.divisors = [2, 1, 1];
    config
}

/// State with two 5x5x5 snapshots (steps 0 and 1) already ingested
#[allow(dead_code)]
pub async fn loaded_state(dir: &Path, packager: Arc<dyn MeshPackager>) -> Arc<AppState> {
    loaded_state_with(dir, test_config(dir), packager).await
}

/// Same series as [`loaded_state`] under `config`
#[allow(dead_code)]
pub async fn loaded_state_with(
    dir: &Path,
    config: IsotileConfig,
    packager: Arc<dyn MeshPackager>,
) -> Arc<AppState> {
    let files = write_series(dir, [5, 5, 5], &[(0, 0.0), (1, 1.0)]);
    let state = Arc::new(AppState::with_packager(config, packager));
    let entries = files.into_iter().map(SeriesEntry::new).collect();
    spawn_ingest(&state, entries, dir.to_path_buf())
        .await
        .unwrap()
        .unwrap();
    state
}

/// Serve `state` on an ephemeral local port; returns the base URL
#[allow(dead_code)]
pub async fn serve_local(state: Arc<AppState>) -> String {
    serve_router(create_router(state)).await
}

/// Serve any router on an ephemeral local port; returns the base URL
#[allow(dead_code)]
pub async fn serve_router(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
