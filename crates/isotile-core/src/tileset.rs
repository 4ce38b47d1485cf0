//! 3D Tiles descriptors
//!
//! Typed views of the tileset JSON written for the renderer and of the layer
//! descriptors sent to the display wall. Fields this crate does not use are
//! kept in `extra` so tilesets produced by the packager survive patching.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PackagingError, PackagingResult};

/// Tileset format version written in the asset block
pub const TILESET_VERSION: &str = "0.0";

/// Tool tag written in the asset block
pub const TILESET_TOOL_VERSION: &str = "1.0.0-obj23dtiles";

/// Up axis of the system convention
pub const GLTF_UP_AXIS: &str = "Z";

/// Layer type understood by the display client
pub const LAYER_TYPE: &str = "3dtile";

/// Column-major 4x4 matrix translating by `offset`
pub fn system_transform(offset: [f64; 3]) -> [f64; 16] {
    [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        offset[0], offset[1], offset[2], 1.0,
    ]
}

/// Root of a tileset document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tileset {
    pub asset: Asset,
    pub geometric_error: f64,
    pub root: TileNode,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tileset_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gltf_up_axis: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Asset {
    fn default() -> Self {
        Self {
            version: TILESET_VERSION.to_string(),
            tileset_version: Some(TILESET_TOOL_VERSION.to_string()),
            gltf_up_axis: Some(GLTF_UP_AXIS.to_string()),
            extra: Map::new(),
        }
    }
}

/// One node of the bounding-volume hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<[f64; 16]>,
    pub bounding_volume: BoundingVolume,
    pub geometric_error: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TileNode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TileNode {
    /// Leaf referencing `uri`
    pub fn leaf(bbox: [f64; 12], geometric_error: f64, uri: impl Into<String>) -> Self {
        Self {
            transform: None,
            bounding_volume: BoundingVolume::oriented(bbox),
            geometric_error,
            refine: None,
            content: Some(Content {
                uri: uri.into(),
                extra: Map::new(),
            }),
            children: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// Bounding volume; only the oriented box form is interpreted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingVolume {
    #[serde(rename = "box", default, skip_serializing_if = "Option::is_none")]
    pub oriented_box: Option<[f64; 12]>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BoundingVolume {
    pub fn oriented(bbox: [f64; 12]) -> Self {
        Self {
            oriented_box: Some(bbox),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Older tilesets call this `url`
    #[serde(alias = "url")]
    pub uri: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tileset {
    /// Root tileset with an additive root node carrying `transform`
    pub fn with_root(
        transform: [f64; 16],
        bbox: [f64; 12],
        geometric_error: f64,
        root_error: f64,
        children: Vec<TileNode>,
    ) -> Self {
        Self {
            asset: Asset::default(),
            geometric_error,
            root: TileNode {
                transform: Some(transform),
                bounding_volume: BoundingVolume::oriented(bbox),
                geometric_error: root_error,
                refine: Some("ADD".to_string()),
                content: None,
                children,
                extra: Map::new(),
            },
            extra: Map::new(),
        }
    }

    /// Rewrite up axis and root transform to the system convention
    pub fn patch_for_system(&mut self, transform: [f64; 16]) {
        self.asset.gltf_up_axis = Some(GLTF_UP_AXIS.to_string());
        self.root.transform = Some(transform);
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Read a tileset file
    pub fn load(path: &Path) -> PackagingResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PackagingError::Output {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&text).map_err(|e| PackagingError::Output {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Write a tileset file, replacing any existing file
    pub fn save(&self, path: &Path) -> PackagingResult<()> {
        let json = self.to_json().map_err(|e| PackagingError::Output {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Reference to one packaged tile, as consumed by the display client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileLayerDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(rename = "box")]
    pub bbox: [f64; 12],
    #[serde(with = "string_bool")]
    pub visible: bool,
    pub sse_threshold: u32,
    #[serde(rename = "update_id")]
    pub update_id: String,
}

impl TileLayerDescriptor {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        bbox: [f64; 12],
        update_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: LAYER_TYPE.to_string(),
            url: url.into(),
            bbox,
            visible: true,
            sse_threshold: 0,
            update_id: update_id.into(),
        }
    }
}

/// The display client reads `visible` as the strings "true"/"false"
mod string_bool {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "true" } else { "false" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Flag {
            Bool(bool),
            Text(String),
        }
        Ok(match Flag::deserialize(deserializer)? {
            Flag::Bool(b) => b,
            Flag::Text(s) => s.eq_ignore_ascii_case("true"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKAGER_OUTPUT: &str = r#"{
        "asset": {"version": "0.0", "tilesetVersion": "1.0.0-obj23dtiles", "gltfUpAxis": "Y"},
        "geometricError": 200,
        "root": {
            "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1],
            "boundingVolume": {"region": [0, 0, 1, 1, 0, 10]},
            "geometricError": 200,
            "refine": "ADD",
            "content": {"url": "isosurf_0.b3dm"},
            "extras": {"name": "isosurf_0"}
        },
        "properties": {}
    }"#;

    #[test]
    fn test_patch_preserves_unknown_fields() {
        let mut tileset = Tileset::from_json(PACKAGER_OUTPUT).unwrap();
        tileset.patch_for_system(system_transform([6378137.0, 0.0, 0.0]));

        let json: Value = serde_json::from_str(&tileset.to_json().unwrap()).unwrap();
        assert_eq!(json["asset"]["gltfUpAxis"], "Z");
        assert_eq!(json["root"]["transform"][12], 6378137.0);
        assert_eq!(json["root"]["boundingVolume"]["region"][5], 10.0);
        assert_eq!(json["root"]["extras"]["name"], "isosurf_0");
        assert_eq!(json["root"]["content"]["uri"], "isosurf_0.b3dm");
        assert!(json["properties"].is_object());
    }

    #[test]
    fn test_root_tileset_shape() {
        let child = TileNode::leaf([0.0; 12], 0.0, "tile_0/Batchedisosurf_0/tileset.json");
        let tileset = Tileset::with_root(system_transform([1.0, 2.0, 3.0]), [0.5; 12], 500.0, 1.0, vec![child]);
        let json = serde_json::to_value(&tileset).unwrap();
        assert_eq!(json["asset"]["tilesetVersion"], TILESET_TOOL_VERSION);
        assert_eq!(json["geometricError"], 500.0);
        assert_eq!(json["root"]["geometricError"], 1.0);
        assert_eq!(json["root"]["refine"], "ADD");
        assert_eq!(json["root"]["boundingVolume"]["box"].as_array().unwrap().len(), 12);
        assert_eq!(
            json["root"]["children"][0]["content"]["uri"],
            "tile_0/Batchedisosurf_0/tileset.json"
        );
        assert!(json["root"].get("content").is_none());
    }

    #[test]
    fn test_layer_descriptor_wire_format() {
        let layer = TileLayerDescriptor::new("isosurf_0", "tile_0/x/tileset.json", [0.0; 12], "42");
        let json = serde_json::to_value(&layer).unwrap();
        assert_eq!(json["type"], "3dtile");
        assert_eq!(json["visible"], "true");
        assert_eq!(json["sseThreshold"], 0);
        assert_eq!(json["update_id"], "42");

        let parsed: TileLayerDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, layer);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tileset.json");
        let tileset = Tileset::with_root(system_transform([0.0; 3]), [1.0; 12], 500.0, 1.0, Vec::new());
        tileset.save(&path).unwrap();
        assert_eq!(Tileset::load(&path).unwrap(), tileset);
        assert!(matches!(
            Tileset::load(&dir.path().join("missing.json")),
            Err(PackagingError::Output { .. })
        ));
    }
}
