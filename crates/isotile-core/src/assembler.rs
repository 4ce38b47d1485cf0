//! Tile set assembly
//!
//! Turns a decomposed snapshot into packaged tiles:
//! 1. Wipe and recreate the output directory
//! 2. Probe the packager once
//! 3. Extract one mesh per piece and map it through a transform shared by
//!    the whole set
//! 4. Package each mesh and patch its tileset to the system convention
//! 5. Write a root tileset whose children reference the packaged tiles
//!
//! Failures of a single piece are logged and the piece is left out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::TilesConfig;
use crate::decompose::Piece;
use crate::error::{PackagingError, PackagingResult};
use crate::isosurface::{extract_cells, vector_magnitude};
use crate::mesh::{Aabb, Mesh, Normalization};
use crate::packager::MeshPackager;
use crate::tileset::{system_transform, TileLayerDescriptor, TileNode, Tileset};

/// File name of the root tileset inside the output directory
pub const ROOT_TILESET: &str = "tileset.json";

/// Result of one assembly run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledTileSet {
    /// One descriptor per packaged tile
    pub layers: Vec<TileLayerDescriptor>,
    /// Root tileset as written to disk
    pub tileset: Tileset,
    /// Location of the root tileset
    pub tileset_path: PathBuf,
    /// Refresh token shared by every layer of this run
    pub update_id: String,
}

/// Builds packaged tile sets from decomposed snapshots
pub struct TileAssembler {
    config: TilesConfig,
    packager: Arc<dyn MeshPackager>,
}

impl TileAssembler {
    pub fn new(config: TilesConfig, packager: Arc<dyn MeshPackager>) -> Self {
        Self { config, packager }
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    pub fn config(&self) -> &TilesConfig {
        &self.config
    }

    /// Extract, package and index every piece at `threshold`
    pub fn build_tile_set(
        &self,
        pieces: &[Piece],
        threshold: f64,
    ) -> PackagingResult<AssembledTileSet> {
        let output_dir = self.config.output_dir.clone();
        prepare_output_dir(&output_dir)?;

        let version = self.packager.probe()?;
        tracing::info!(
            "Assembling {} pieces at {} with packager {}",
            pieces.len(),
            threshold,
            version
        );

        let grid_bounds = pieces
            .iter()
            .map(|p| {
                let [min, max] = p.bounds();
                Aabb::new(min, max)
            })
            .reduce(|a, b| a.union(&b));
        let normalization = grid_bounds
            .as_ref()
            .map(|b| Normalization::fit(b, self.config.target_span))
            .unwrap_or_else(Normalization::identity);
        let transform = system_transform(self.config.root_offset);
        let update_id = uuid::Uuid::new_v4().simple().to_string();

        let meshes = extract_all(pieces, threshold);

        let mut layers = Vec::new();
        let mut children = Vec::new();
        let mut whole: Option<Aabb> = None;
        for (n, mesh) in meshes.into_iter().enumerate() {
            let Some(mesh) = mesh else { continue };
            let mesh = mesh.transformed(&normalization);
            let Some(bounds) = mesh.bounds() else { continue };

            let name = format!("{}_{}", self.config.name_prefix, n);
            let tileset_path = match self.package_tile(&output_dir, n, &name, &mesh, transform) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("Skipping tile {}: {}", n, e);
                    continue;
                }
            };

            let uri = relative_uri(&output_dir, &tileset_path);
            let obb = bounds.to_oriented_box();
            layers.push(TileLayerDescriptor::new(
                name,
                self.content_url(&uri),
                obb,
                update_id.clone(),
            ));
            children.push(TileNode::leaf(obb, self.config.leaf_geometric_error, uri));
            whole = Some(whole.map_or(bounds, |w| w.union(&bounds)));
        }

        if layers.is_empty() {
            tracing::info!("No piece crossed {}, tile set is empty", threshold);
        }

        let root_bounds = whole
            .or_else(|| grid_bounds.map(|b| b.transformed(&normalization)))
            .unwrap_or_else(|| Aabb::from_point([0.0; 3]));
        let tileset = Tileset::with_root(
            transform,
            root_bounds.to_oriented_box(),
            self.config.root_geometric_error,
            self.config.node_geometric_error,
            children,
        );
        let tileset_path = output_dir.join(ROOT_TILESET);
        tileset.save(&tileset_path)?;

        tracing::info!(
            "Wrote {} tiles to {}",
            layers.len(),
            tileset_path.display()
        );
        Ok(AssembledTileSet {
            layers,
            tileset,
            tileset_path,
            update_id,
        })
    }

    /// Write, package and patch one tile; returns its tileset path
    fn package_tile(
        &self,
        output_dir: &Path,
        n: usize,
        name: &str,
        mesh: &Mesh,
        transform: [f64; 16],
    ) -> PackagingResult<PathBuf> {
        let tile_dir = output_dir.join(format!("tile_{}", n));
        std::fs::create_dir_all(&tile_dir)?;
        let mesh_path = tile_dir.join(format!("{}.obj", name));
        mesh.save_obj(&mesh_path, name)?;

        let mut tile = self.packager.package(&mesh_path)?;
        tile.tileset.patch_for_system(transform);
        tile.tileset.save(&tile.tileset_path)?;
        tracing::debug!(
            "Packaged {} ({} triangles) into {}",
            name,
            mesh.triangle_count(),
            tile.tileset_path.display()
        );
        Ok(tile.tileset_path)
    }

    /// URL a client resolves `uri` (relative to the output directory) at
    pub fn content_url(&self, uri: &str) -> String {
        let base = self.config.content_base_uri.trim_end_matches('/');
        if base.is_empty() {
            uri.to_string()
        } else {
            format!("{}/{}", base, uri)
        }
    }
}

/// Remove stale output and recreate the directory
fn prepare_output_dir(dir: &Path) -> PackagingResult<()> {
    let output_dir_error = |e| PackagingError::OutputDir {
        path: dir.to_path_buf(),
        source: e,
    };
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(output_dir_error)?;
    }
    std::fs::create_dir_all(dir).map_err(output_dir_error)
}

/// Mesh per piece, `None` for pieces without geometry
#[cfg(feature = "parallel")]
fn extract_all(pieces: &[Piece], threshold: f64) -> Vec<Option<Mesh>> {
    pieces
        .par_iter()
        .enumerate()
        .map(|(n, piece)| extract_piece(n, piece, threshold))
        .collect()
}

/// Mesh per piece, `None` for pieces without geometry
#[cfg(not(feature = "parallel"))]
fn extract_all(pieces: &[Piece], threshold: f64) -> Vec<Option<Mesh>> {
    pieces
        .iter()
        .enumerate()
        .map(|(n, piece)| extract_piece(n, piece, threshold))
        .collect()
}

fn extract_piece(n: usize, piece: &Piece, threshold: f64) -> Option<Mesh> {
    let result = if piece.grid.datalen() > 1 {
        extract_cells(&vector_magnitude(&piece.grid), &piece.cells, threshold)
    } else {
        extract_cells(&piece.grid, &piece.cells, threshold)
    };
    match result {
        Ok(mesh) if mesh.is_empty() => {
            tracing::debug!("Piece {} has no crossing at {}", n, threshold);
            None
        }
        Ok(mesh) => Some(mesh),
        Err(e) => {
            tracing::warn!("Skipping piece {}: {}", n, e);
            None
        }
    }
}

/// `path` relative to `base`, with forward slashes
fn relative_uri(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
