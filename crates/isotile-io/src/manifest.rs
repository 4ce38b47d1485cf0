//! Series manifests
//!
//! A manifest lists the snapshot files of one time series together with an
//! optional base directory and optional per-file step/time overrides:
//!
//! ```json
//! {
//!   "basedir": "data/obstacle",
//!   "filelist": [
//!     "uvw_010.sph",
//!     { "file": "uvw_020.sph", "step": 20, "time": 2.0 }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::{IoError, IoResult};

/// One snapshot file of a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    /// File path, relative to the manifest's base directory
    pub file: PathBuf,

    /// Step number overriding the one stored in the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,

    /// Time overriding the one stored in the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

impl SeriesEntry {
    /// Entry with no overrides
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            step: None,
            time: None,
        }
    }

    /// Override the step number
    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    /// Override the time
    pub fn with_time(mut self, time: f64) -> Self {
        self.time = Some(time);
        self
    }

    /// Resolve the file path against a base directory
    pub fn resolve(&self, base_dir: &Path) -> PathBuf {
        if base_dir.as_os_str().is_empty() || self.file.is_absolute() {
            self.file.clone()
        } else {
            base_dir.join(&self.file)
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Path(PathBuf),
    Entry(SeriesEntry),
}

impl From<RawEntry> for SeriesEntry {
    fn from(raw: RawEntry) -> Self {
        match raw {
            RawEntry::Path(file) => SeriesEntry::new(file),
            RawEntry::Entry(entry) => entry,
        }
    }
}

fn deserialize_entries<'de, D>(deserializer: D) -> Result<Vec<SeriesEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Vec::<RawEntry>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(SeriesEntry::from).collect())
}

/// A time series description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesManifest {
    /// Directory the entries are relative to
    #[serde(default = "default_basedir")]
    pub basedir: PathBuf,

    /// Snapshot files in temporal order
    #[serde(deserialize_with = "deserialize_entries")]
    pub filelist: Vec<SeriesEntry>,
}

fn default_basedir() -> PathBuf {
    PathBuf::from(".")
}

impl SeriesManifest {
    /// Manifest from a plain list of files
    pub fn from_files<I, P>(basedir: impl Into<PathBuf>, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            basedir: basedir.into(),
            filelist: files.into_iter().map(SeriesEntry::new).collect(),
        }
    }

    /// Parse a manifest from JSON
    pub fn from_json(json: &str) -> IoResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| IoError::InvalidFormat(format!("series manifest: {}", e)))
    }

    /// Load a manifest file
    ///
    /// A relative `basedir` is interpreted relative to the manifest's own
    /// directory.
    pub fn load(path: &Path) -> IoResult<Self> {
        if !path.exists() {
            return Err(IoError::FileNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let mut manifest = Self::from_json(&text)?;
        if manifest.basedir.is_relative() {
            if let Some(parent) = path.parent() {
                manifest.basedir = parent.join(&manifest.basedir);
            }
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_entries() {
        let manifest = SeriesManifest::from_json(
            r#"{
                "basedir": "data",
                "filelist": [
                    "a.sph",
                    {"file": "b.sph", "step": 20},
                    {"file": "c.sph", "time": 3.5}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.basedir, PathBuf::from("data"));
        assert_eq!(manifest.filelist.len(), 3);
        assert_eq!(manifest.filelist[0], SeriesEntry::new("a.sph"));
        assert_eq!(manifest.filelist[1].step, Some(20));
        assert_eq!(manifest.filelist[1].time, None);
        assert_eq!(manifest.filelist[2].time, Some(3.5));
    }

    #[test]
    fn test_basedir_defaults_to_current_dir() {
        let manifest = SeriesManifest::from_json(r#"{"filelist": ["x.sph"]}"#).unwrap();
        assert_eq!(manifest.basedir, PathBuf::from("."));
    }

    #[test]
    fn test_missing_filelist_is_an_error() {
        let err = SeriesManifest::from_json(r#"{"basedir": "."}"#).unwrap_err();
        assert!(err.to_string().contains("filelist"));
    }

    #[test]
    fn test_resolve_entry() {
        let entry = SeriesEntry::new("uvw_010.sph");
        assert_eq!(
            entry.resolve(Path::new("/data")),
            PathBuf::from("/data/uvw_010.sph")
        );
        assert_eq!(entry.resolve(Path::new("")), PathBuf::from("uvw_010.sph"));
        let absolute = SeriesEntry::new("/abs/uvw_010.sph");
        assert_eq!(
            absolute.resolve(Path::new("/data")),
            PathBuf::from("/abs/uvw_010.sph")
        );
    }

    #[test]
    fn test_load_relative_basedir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series.json");
        std::fs::write(&path, r#"{"basedir": "snap", "filelist": ["a.sph"]}"#).unwrap();
        let manifest = SeriesManifest::load(&path).unwrap();
        assert_eq!(manifest.basedir, dir.path().join("snap"));
    }
}
