//! Configuration for isotile-core
//!
//! Centralized configuration for the server address, buffer residency,
//! decomposition divisors, tile layout and the external mesh packager.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::ResidencyMode;

/// System-wide configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsotileConfig {
    /// HTTP surface settings
    pub server: ServerConfig,
    /// Temporal buffer settings
    pub buffer: BufferConfig,
    /// Spatial decomposition settings
    pub decomposition: DecompositionConfig,
    /// Tile layout settings
    pub tiles: TilesConfig,
    /// External mesh packager settings
    pub packager: PackagerConfig,
}

/// HTTP surface configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub addr: String,
    /// URI this server is reachable at, reported in the metadata
    pub public_uri: String,
    /// Upstream data source notified on `/quit?with_tb=y`
    pub upstream: Option<String>,
    /// Display content addressed by layer update messages
    pub display_content_id: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:4000".to_string(),
            public_uri: "http://localhost:4000".to_string(),
            upstream: None,
            display_content_id: "isotile".to_string(),
        }
    }
}

/// Temporal buffer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Whether all snapshots stay in memory
    pub residency: ResidencyMode,
}

/// Spatial decomposition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompositionConfig {
    /// Number of pieces along x, y and z
    pub divisors: [usize; 3],
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self { divisors: [2, 2, 2] }
    }
}

/// Tile layout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilesConfig {
    /// Directory the tiles are written to; wiped before every run
    pub output_dir: PathBuf,
    /// Prefix for content URIs; empty means relative to the root tileset
    pub content_base_uri: String,
    /// Layer name prefix, suffixed with the tile number
    pub name_prefix: String,
    /// Edge length of the reference cube the tile set is scaled into
    pub target_span: f64,
    /// Translation placed in the root transform
    pub root_offset: [f64; 3],
    /// Geometric error of the tileset
    pub root_geometric_error: f64,
    /// Geometric error of the root node
    pub node_geometric_error: f64,
    /// Geometric error of every tile node
    pub leaf_geometric_error: f64,
}

impl Default for TilesConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("tiles"),
            content_base_uri: String::new(),
            name_prefix: "isosurf".to_string(),
            target_span: 1.0,
            root_offset: [6378137.0, 0.0, 0.0],
            root_geometric_error: 500.0,
            node_geometric_error: 1.0,
            leaf_geometric_error: 0.0,
        }
    }
}

/// External mesh packager configuration
///
/// `{input}` in `args` is replaced with the mesh path; `{stem}` in
/// `tileset_pattern` with the mesh file stem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagerConfig {
    /// Executable name or path
    pub program: String,
    /// Arguments of a packaging run
    pub args: Vec<String>,
    /// Arguments of the availability probe
    pub version_args: Vec<String>,
    /// Location of the produced tileset, relative to the mesh directory
    pub tileset_pattern: String,
    /// Upper bound for one packaging run
    pub timeout_secs: f64,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            program: "obj23dtiles".to_string(),
            args: vec![
                "-i".to_string(),
                "{input}".to_string(),
                "--tileset".to_string(),
            ],
            version_args: vec!["--version".to_string()],
            tileset_pattern: "Batched{stem}/tileset.json".to_string(),
            timeout_secs: 120.0,
        }
    }
}

impl IsotileConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load a configuration file; `.json` files are JSON, anything else TOML
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let config = if is_json {
            Self::from_json(&text)?
        } else {
            Self::from_toml(&text)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(axis) = self.decomposition.divisors.iter().position(|&d| d == 0) {
            return Err(ConfigError::OutOfRange(format!(
                "decomposition divisor for axis {} must be at least 1",
                axis
            )));
        }

        if !(self.tiles.target_span.is_finite() && self.tiles.target_span > 0.0) {
            return Err(ConfigError::OutOfRange(
                "tiles.target_span must be positive".to_string(),
            ));
        }

        let errors = [
            ("tiles.root_geometric_error", self.tiles.root_geometric_error),
            ("tiles.node_geometric_error", self.tiles.node_geometric_error),
            ("tiles.leaf_geometric_error", self.tiles.leaf_geometric_error),
        ];
        if let Some((name, _)) = errors.iter().find(|(_, e)| !(e.is_finite() && *e >= 0.0)) {
            return Err(ConfigError::OutOfRange(format!(
                "{} must be a non-negative number",
                name
            )));
        }

        if !(self.packager.timeout_secs.is_finite() && self.packager.timeout_secs > 0.0) {
            return Err(ConfigError::OutOfRange(
                "packager.timeout_secs must be positive".to_string(),
            ));
        }

        if self.packager.program.trim().is_empty() {
            return Err(ConfigError::MissingField("packager.program".to_string()));
        }

        Ok(())
    }
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Configuration text is malformed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Value is out of valid range
    #[error("Value out of range: {0}")]
    OutOfRange(String),
    /// Required field is missing
    #[error("Missing field: {0}")]
    MissingField(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IsotileConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.addr, "0.0.0.0:4000");
        assert_eq!(config.decomposition.divisors, [2, 2, 2]);
        assert_eq!(config.tiles.root_offset, [6378137.0, 0.0, 0.0]);
    }

    #[test]
    fn test_json_serialization() {
        let config = IsotileConfig::default();
        let json = config.to_json().unwrap();
        let parsed = IsotileConfig::from_json(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_toml() {
        let config = IsotileConfig::from_toml(
            r#"
            [buffer]
            residency = "lazy"

            [decomposition]
            divisors = [3, 1, 1]
            "#,
        )
        .unwrap();
        assert_eq!(config.buffer.residency, ResidencyMode::Lazy);
        assert_eq!(config.decomposition.divisors, [3, 1, 1]);
        assert_eq!(config.tiles.name_prefix, "isosurf");
    }

    #[test]
    fn test_zero_divisor() {
        let mut config = IsotileConfig::default();
        config.decomposition.divisors = [2, 0, 2];
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange(_))));
    }

    #[test]
    fn test_non_positive_timeout() {
        let mut config = IsotileConfig::default();
        config.packager.timeout_secs = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_leaf_geometric_error() {
        let config = IsotileConfig::from_toml("[tiles]\nleaf_geometric_error = 2.5\n").unwrap();
        assert_eq!(config.tiles.leaf_geometric_error, 2.5);
        assert_eq!(IsotileConfig::default().tiles.leaf_geometric_error, 0.0);

        let mut config = IsotileConfig::default();
        config.tiles.leaf_geometric_error = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange(_))));
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("isotile.json");
        std::fs::write(&path, r#"{"tiles": {"target_span": 2.0}}"#).unwrap();
        let config = IsotileConfig::load(&path).unwrap();
        assert_eq!(config.tiles.target_span, 2.0);

        let missing = IsotileConfig::load(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let shipped = include_str!("../../../config/isotile.toml");
        assert_eq!(IsotileConfig::from_toml(shipped).unwrap(), IsotileConfig::default());
    }
}
