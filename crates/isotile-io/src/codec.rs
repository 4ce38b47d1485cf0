//! Volume codec trait and common error types
//!
//! The `VolumeCodec` trait provides a uniform interface for loading and
//! saving volumetric snapshots from various file formats.

use std::path::Path;
use thiserror::Error;

use crate::sample::VolumeSample;

/// Errors that can occur during I/O operations
#[derive(Debug, Error)]
pub enum IoError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid data envelope: {0}")]
    Envelope(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for I/O operations
pub type IoResult<T> = Result<T, IoError>;

/// Trait for reading and writing volumetric snapshots
pub trait VolumeCodec: Send + Sync {
    /// Load one snapshot from a file
    fn load(&self, path: &Path) -> IoResult<VolumeSample>;

    /// Write one snapshot to a file, replacing any existing file
    fn save(&self, path: &Path, sample: &VolumeSample) -> IoResult<()>;

    /// Get the format name
    fn format_name(&self) -> &'static str;
}

/// A boxed codec for dynamic dispatch
pub type BoxedCodec = Box<dyn VolumeCodec>;

/// Pick a codec for a file
///
/// The format is auto-detected from the file extension.
pub fn open_codec(path: &Path) -> IoResult<BoxedCodec> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        #[cfg(feature = "sph")]
        "sph" => Ok(Box::new(crate::sph::SphCodec)),

        _ => Err(IoError::Unsupported(format!(
            "Unknown file extension: {}",
            extension
        ))),
    }
}

/// List supported file extensions
pub fn supported_extensions() -> Vec<&'static str> {
    let mut extensions = Vec::new();

    #[cfg(feature = "sph")]
    extensions.push("sph");

    extensions
}
