/*!
Inline frame payload decoders.

Frames that are not published through shared memory carry their pixels in the
message body. The body is tried against an ordered list of decoders: the
current binary array envelope first, then the legacy JSON envelope with a
base64 pixel buffer that older backends still emit.
*/

use crate::error::{CameraError, Result};
use crate::frame::{Dtype, FrameData};
use base64::Engine;
use bincode::Options;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Array envelope of the binary inline format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayEnvelope {
    pub shape: Vec<u64>,
    pub dtype: String,
    pub data: Vec<u8>,
}

impl ArrayEnvelope {
    fn into_frame(self) -> Result<FrameData> {
        let dtype = Dtype::parse(&self.dtype)?;
        let shape = self
            .shape
            .into_iter()
            .map(usize::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CameraError::decode(format!("shape dimension out of range: {}", e)))?;
        FrameData::new(shape, dtype, self.data)
    }
}

impl From<&FrameData> for ArrayEnvelope {
    fn from(frame: &FrameData) -> Self {
        Self {
            shape: frame.shape().iter().map(|&d| d as u64).collect(),
            dtype: frame.dtype().as_str().to_string(),
            data: frame.as_bytes().to_vec(),
        }
    }
}

/// One inline payload format
pub trait InlineDecoder: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    fn decode(&self, body: &[u8]) -> Result<FrameData>;
}

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// Binary envelope (bincode, fixed-width integers)
#[derive(Debug, Default)]
pub struct BinaryArrayDecoder;

impl InlineDecoder for BinaryArrayDecoder {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn decode(&self, body: &[u8]) -> Result<FrameData> {
        // The payload can never be larger than the body it came in
        let envelope: ArrayEnvelope = bincode_options()
            .with_limit(body.len() as u64 + 64)
            .deserialize(body)
            .map_err(|e| CameraError::decode(e.to_string()))?;
        envelope.into_frame()
    }
}

#[derive(Deserialize)]
struct LegacyEnvelope {
    shape: Vec<u64>,
    dtype: String,
    data: String,
}

/// Legacy JSON envelope with a base64 pixel buffer
#[derive(Debug, Default)]
pub struct LegacyJsonDecoder;

impl InlineDecoder for LegacyJsonDecoder {
    fn name(&self) -> &'static str {
        "legacy-json"
    }

    fn decode(&self, body: &[u8]) -> Result<FrameData> {
        let legacy: LegacyEnvelope = serde_json::from_slice(body)?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(legacy.data.as_bytes())
            .map_err(|e| CameraError::decode(e.to_string()))?;
        ArrayEnvelope { shape: legacy.shape, dtype: legacy.dtype, data }.into_frame()
    }
}

/// Decoders in the order they are tried
pub fn default_decoders() -> Vec<Box<dyn InlineDecoder>> {
    vec![Box::new(BinaryArrayDecoder), Box::new(LegacyJsonDecoder)]
}

/// Try each decoder in turn; `None` when no format matches
pub fn decode_inline(decoders: &[Box<dyn InlineDecoder>], body: &[u8]) -> Option<FrameData> {
    for decoder in decoders {
        match decoder.decode(body) {
            Ok(frame) => return Some(frame),
            Err(e) => debug!("{} decoder rejected {} byte body: {}", decoder.name(), body.len(), e),
        }
    }

    let preview = &body[..body.len().min(16)];
    debug!("No inline decoder accepted body (starts with {})", hex::encode(preview));
    None
}

/// Encode a frame in the binary envelope format
pub fn encode_binary(frame: &FrameData) -> Result<Vec<u8>> {
    bincode_options()
        .serialize(&ArrayEnvelope::from(frame))
        .map_err(|e| CameraError::decode(e.to_string()))
}

/// Encode a frame in the legacy JSON envelope format
pub fn encode_legacy_json(frame: &FrameData) -> Result<Vec<u8>> {
    let value = serde_json::json!({
        "shape": frame.shape(),
        "dtype": frame.dtype().as_str(),
        "data": base64::engine::general_purpose::STANDARD.encode(frame.as_bytes()),
    });
    Ok(serde_json::to_vec(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FrameData {
        FrameData::from_u16(vec![2, 3], &[0, 1, 2, 3, 4, 65535]).unwrap()
    }

    #[test]
    fn test_binary_preferred() {
        let decoders = default_decoders();
        let body = encode_binary(&sample()).unwrap();
        assert_eq!(decode_inline(&decoders, &body), Some(sample()));
    }

    #[test]
    fn test_legacy_fallback() {
        let decoders = default_decoders();
        let body = encode_legacy_json(&sample()).unwrap();

        assert!(BinaryArrayDecoder.decode(&body).is_err());
        assert_eq!(decode_inline(&decoders, &body), Some(sample()));
    }

    #[test]
    fn test_garbage_is_no_frame() {
        let decoders = default_decoders();
        assert_eq!(decode_inline(&decoders, b"\xff\xff\xff\xff not a frame"), None);
        assert_eq!(decode_inline(&decoders, b""), None);
    }

    #[test]
    fn test_oversized_shape_is_no_frame() {
        let decoders = default_decoders();

        let legacy = serde_json::json!({"shape": [u64::MAX, 2], "dtype": "uint16", "data": ""});
        let body = serde_json::to_vec(&legacy).unwrap();
        assert_eq!(decode_inline(&decoders, &body), None);

        let envelope = ArrayEnvelope { shape: vec![u64::MAX, 4], dtype: "uint16".to_string(), data: Vec::new() };
        let body = bincode_options().serialize(&envelope).unwrap();
        assert_eq!(decode_inline(&decoders, &body), None);
    }
}
