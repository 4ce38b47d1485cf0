//! Display-wall requests
//!
//! The display wall speaks JSON-RPC 2.0. Requests are built here and handed
//! to whatever bridge forwards them; request ids come from an explicit
//! counter owned by the caller.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tileset::TileLayerDescriptor;

/// Content type of the 3D viewer on the display wall
pub const WEBGL_CONTENT: &str = "webgl";

/// Issues request ids
///
/// Ids start at 1 and wrap from `u64::MAX` back to 1; 0 is never issued.
#[derive(Debug)]
pub struct RequestIdCounter {
    next: AtomicU64,
}

impl Default for RequestIdCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIdCounter {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Counter whose first id is `first` (0 is treated as 1)
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(1)),
        }
    }

    /// Take the next id
    pub fn next_id(&self) -> u64 {
        let previous = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |id| {
                Some(if id == u64::MAX { 1 } else { id + 1 })
            });
        // The closure always returns Some
        previous.unwrap_or_else(|id| id)
    }
}

/// A JSON-RPC 2.0 request for the display wall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
    /// Frame type; layer updates are always text frames
    #[serde(rename = "type")]
    pub kind: String,
}

impl DisplayRequest {
    pub fn new(counter: &RequestIdCounter, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: counter.next_id(),
            method: method.into(),
            params,
            kind: "utf8".to_string(),
        }
    }

    /// Replace the layer list of the 3D content `content_id`
    ///
    /// The display client expects `layerList` as a JSON string.
    pub fn update_layers(
        counter: &RequestIdCounter,
        content_id: &str,
        layers: &[TileLayerDescriptor],
    ) -> Result<Self, serde_json::Error> {
        let layer_list = serde_json::to_string(layers)?;
        Ok(Self::new(
            counter,
            "UpdateMetaData",
            json!([{
                "id": content_id,
                "type": WEBGL_CONTENT,
                "layerList": layer_list,
            }]),
        ))
    }
}
