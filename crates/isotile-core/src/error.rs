//! Error types for isotile-core
//!
//! Provides error handling for:
//! - Series ingestion
//! - Buffer lookups
//! - Spatial decomposition
//! - Isosurface extraction
//! - Tile packaging

use std::path::PathBuf;
use thiserror::Error;

use isotile_io::IoError;

/// Main error type for isotile operations
#[derive(Error, Debug)]
pub enum IsotileError {
    /// Series ingestion errors
    #[error("Failed to load series: {0}")]
    Load(#[from] LoadError),

    /// No data available for the request
    #[error("No data: {message}")]
    NoData { message: String },

    /// Index lookups outside the buffer
    #[error("Out of range: {0}")]
    Range(#[from] RangeError),

    /// Decomposition errors
    #[error("Decomposition failed: {0}")]
    Decomposition(#[from] DecompositionError),

    /// Extraction errors
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// Packaging errors
    #[error("Packaging failed: {0}")]
    Packaging(#[from] PackagingError),
}

impl IsotileError {
    /// Shorthand for a `NoData` error
    pub fn no_data(message: impl Into<String>) -> Self {
        IsotileError::NoData {
            message: message.into(),
        }
    }
}

/// Errors raised while ingesting a series; the buffer is left empty
#[derive(Error, Debug)]
pub enum LoadError {
    /// Nothing to ingest
    #[error("Series has no entries")]
    Empty,

    /// Snapshot file could not be read or decoded
    #[error("Cannot load {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: IoError,
    },

    /// Snapshot grid differs from the first one
    #[error("Grid of {origin} is {actual:?}, series uses {expected:?}")]
    DimsMismatch {
        origin: String,
        expected: [usize; 3],
        actual: [usize; 3],
    },

    /// Snapshot vector length differs from the first one
    #[error("Vector length of {origin} is {actual}, series uses {expected}")]
    DatalenMismatch {
        origin: String,
        expected: usize,
        actual: usize,
    },
}

/// Errors related to index lookups
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RangeError {
    /// Index outside the buffer
    #[error("Index {index} outside buffer of {len} samples")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Errors related to spatial decomposition
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecompositionError {
    /// Divisor of zero
    #[error("Divisor for axis {axis} must be at least 1")]
    ZeroDivisor { axis: usize },

    /// Split would produce a sub-grid thinner than two samples
    #[error(
        "Splitting {len} samples on axis {axis} into {divisor} pieces gives sizes {base}/{last} (minimum 2)"
    )]
    Degenerate {
        axis: usize,
        len: usize,
        divisor: usize,
        base: i64,
        last: i64,
    },
}

/// Errors related to isosurface extraction
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// Extraction needs scalar input
    #[error("Isosurface extraction needs scalar data, got veclen {veclen}")]
    NotScalar { veclen: usize },

    /// Threshold is NaN or infinite
    #[error("Invalid isosurface threshold: {value}")]
    InvalidThreshold { value: f64 },

    /// Sample buffer does not match the grid
    #[error("Cannot view samples as a grid: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Errors related to tile packaging
#[derive(Error, Debug)]
pub enum PackagingError {
    /// Output directory could not be prepared
    #[error("Cannot prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Packager is not installed or does not answer the version probe
    #[error("Mesh packager unavailable: {message}")]
    Unavailable { message: String },

    /// Packager process could not be started
    #[error("Cannot start mesh packager '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Packager exited with a failure status
    #[error("Mesh packager failed ({status}): {stderr}")]
    Failed { status: String, stderr: String },

    /// Packager did not finish in time
    #[error("Mesh packager timed out after {seconds:.1}s")]
    Timeout { seconds: f64 },

    /// Packager output is missing or malformed
    #[error("Unusable packager output {path}: {message}")]
    Output { path: PathBuf, message: String },

    /// Other I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for isotile operations
pub type IsotileResult<T> = Result<T, IsotileError>;

/// Result type alias for ingestion
pub type LoadResult<T> = Result<T, LoadError>;

/// Result type alias for packaging operations
pub type PackagingResult<T> = Result<T, PackagingError>;
