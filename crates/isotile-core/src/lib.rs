//! isotile-core - Temporal isosurface tiling
//!
//! This crate turns a time series of volumetric snapshots into spatially
//! tiled isosurface meshes for incremental streaming:
//!
//! - **TemporalBuffer**: ordered snapshots with monotonic steps and
//!   aggregate bounds
//! - **Decomposition**: edge-sharing split of a grid into overlapping pieces
//! - **Isosurface**: marching cubes with shared vertices and gradient normals
//! - **TileAssembler**: normalization, packaging and the root tileset
//! - **VisualizationSession**: step-keyed cache in front of the pipeline
//! - **Display requests**: JSON-RPC messages for the display wall
//!
//! # Features
//!
//! - `parallel`: extract pieces on the rayon thread pool
//! - `testing`: stand-in packagers for tests of dependent crates

pub mod assembler;
pub mod buffer;
pub mod config;
pub mod decompose;
pub mod display;
pub mod error;
pub mod isosurface;
pub mod mesh;
pub mod packager;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tileset;

pub use assembler::{AssembledTileSet, TileAssembler};
pub use buffer::{BufferMetadata, IngestProgress, ResidencyMode, SampleRecord, TemporalBuffer};
pub use config::{ConfigError, IsotileConfig};
pub use decompose::{decompose, decompose_with_ghosts, split_axis, AxisSplit, Piece};
pub use display::{DisplayRequest, RequestIdCounter};
pub use error::*;
pub use isosurface::{extract_cells, extract_scalar, vector_magnitude};
pub use mesh::{Aabb, Mesh, Normalization};
pub use packager::{CommandPackager, MeshPackager, PackagedTile};
pub use session::{SessionState, Visualization, VisualizationSession};
pub use tileset::{TileLayerDescriptor, TileNode, Tileset};

pub use isotile_io;
