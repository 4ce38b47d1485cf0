//! Self-describing transport envelope for snapshots
//!
//! Snapshots travel over HTTP as `{"type": "sph", "data": "<base64>"}`, the
//! payload being the SPH encoding of the sample.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::codec::{IoError, IoResult};
use crate::sample::VolumeSample;
use crate::sph::SphCodec;

/// Envelope type tag for SPH payloads
pub const SPH_ENVELOPE: &str = "sph";

/// Base64 envelope around an encoded snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEnvelope {
    /// Payload encoding
    #[serde(rename = "type")]
    pub kind: String,

    /// Base64 payload
    pub data: String,
}

impl DataEnvelope {
    /// Wrap a snapshot
    pub fn encode(sample: &VolumeSample) -> IoResult<Self> {
        let bytes = SphCodec::encode_bytes(sample)?;
        Ok(Self {
            kind: SPH_ENVELOPE.to_string(),
            data: STANDARD.encode(bytes),
        })
    }

    /// Unwrap the snapshot
    pub fn decode(&self) -> IoResult<VolumeSample> {
        if self.kind != SPH_ENVELOPE {
            return Err(IoError::Envelope(format!(
                "unsupported payload type '{}'",
                self.kind
            )));
        }
        let bytes = STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| IoError::Envelope(e.to_string()))?;
        SphCodec::decode_bytes(&bytes)
    }

    /// Parse an envelope from its JSON text
    pub fn from_json(json: &str) -> IoResult<Self> {
        serde_json::from_str(json).map_err(|e| IoError::Envelope(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let sample = VolumeSample::from_samples([1, 1, 2], [0.0; 3], [1.0; 3], 1, vec![1.0, 2.0])
            .unwrap()
            .with_step(4, 0.5);
        let envelope = DataEnvelope::encode(&sample).unwrap();
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "sph");
        assert!(json["data"].is_string());

        let parsed = DataEnvelope::from_json(&json.to_string()).unwrap();
        assert_eq!(parsed.decode().unwrap(), sample);
    }

    #[test]
    fn test_rejects_foreign_type() {
        let envelope = DataEnvelope {
            kind: "pickle".to_string(),
            data: String::new(),
        };
        assert!(matches!(envelope.decode(), Err(IoError::Envelope(_))));
    }

    #[test]
    fn test_rejects_bad_base64() {
        let envelope = DataEnvelope {
            kind: SPH_ENVELOPE.to_string(),
            data: "***".to_string(),
        };
        assert!(matches!(envelope.decode(), Err(IoError::Envelope(_))));
    }
}
