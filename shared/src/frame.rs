/*!
Frame data structures and pixel statistics.

This module provides the metadata wrapper carried by every frame message and
the owned pixel array produced by the decoders, together with the mean/channel
statistics the exposure loop consumes.
*/

use crate::error::{CameraError, Result};
use crate::message::Payload;
use crate::protocol::{RAW_FRAME_NAME, SHM_METADATA_KEY};
use crate::shm::ShmRef;
use num_traits::ToPrimitive;
use serde_json::Value;
use std::collections::BTreeMap;

/// Element type of a pixel array, parsed from numpy-style dtype strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl Dtype {
    /// Parse `uint16`, `<u2`, `float32`, `f4`, ... (little-endian only)
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches(['<', '=', '|']);
        let dtype = match trimmed {
            "uint8" | "u1" | "B" => Dtype::U8,
            "uint16" | "u2" | "H" => Dtype::U16,
            "int16" | "i2" | "h" => Dtype::I16,
            "uint32" | "u4" | "I" => Dtype::U32,
            "int32" | "i4" | "i" => Dtype::I32,
            "float32" | "f4" | "f" => Dtype::F32,
            "float64" | "f8" | "d" => Dtype::F64,
            _ => return Err(CameraError::decode(format!("unsupported dtype '{}'", s))),
        };
        Ok(dtype)
    }

    /// Size of one element in bytes
    pub fn size(self) -> usize {
        match self {
            Dtype::U8 => 1,
            Dtype::U16 | Dtype::I16 => 2,
            Dtype::U32 | Dtype::I32 | Dtype::F32 => 4,
            Dtype::F64 => 8,
        }
    }

    /// Canonical name used when encoding
    pub fn as_str(self) -> &'static str {
        match self {
            Dtype::U8 => "uint8",
            Dtype::U16 => "uint16",
            Dtype::I16 => "int16",
            Dtype::U32 => "uint32",
            Dtype::I32 => "int32",
            Dtype::F32 => "float32",
            Dtype::F64 => "float64",
        }
    }
}

fn widen<T: ToPrimitive, const N: usize>(bytes: &[u8], from_le: fn([u8; N]) -> T) -> Vec<f64> {
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            from_le(raw).to_f64().unwrap_or(0.0)
        })
        .collect()
}

/// Owned, decoded pixel array
#[derive(Debug, Clone, PartialEq)]
pub struct FrameData {
    shape: Vec<usize>,
    dtype: Dtype,
    data: Vec<u8>,
}

impl FrameData {
    /// Wrap a little-endian buffer; its length must match shape and dtype
    pub fn new(shape: Vec<usize>, dtype: Dtype, data: Vec<u8>) -> Result<Self> {
        let expected = Self::byte_len(&shape, dtype)
            .ok_or_else(|| CameraError::decode(format!("shape {:?} of {} overflows", shape, dtype.as_str())))?;
        if data.len() != expected {
            return Err(CameraError::decode(format!(
                "buffer is {} bytes, shape {:?} of {} needs {}",
                data.len(),
                shape,
                dtype.as_str(),
                expected
            )));
        }
        Ok(Self { shape, dtype, data })
    }

    /// Build a `uint16` frame from pixel values
    pub fn from_u16(shape: Vec<usize>, pixels: &[u16]) -> Result<Self> {
        let data = pixels.iter().flat_map(|p| p.to_le_bytes()).collect();
        Self::new(shape, Dtype::U16, data)
    }

    /// Number of bytes an array of this shape and dtype occupies, `None` when
    /// it does not fit in `usize`
    pub fn byte_len(shape: &[usize], dtype: Dtype) -> Option<usize> {
        shape.iter().try_fold(dtype.size(), |acc, &d| acc.checked_mul(d))
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.size()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// All elements widened to `f64`
    pub fn values(&self) -> Vec<f64> {
        match self.dtype {
            Dtype::U8 => self.data.iter().map(|&b| b as f64).collect(),
            Dtype::U16 => widen(&self.data, u16::from_le_bytes),
            Dtype::I16 => widen(&self.data, i16::from_le_bytes),
            Dtype::U32 => widen(&self.data, u32::from_le_bytes),
            Dtype::I32 => widen(&self.data, i32::from_le_bytes),
            Dtype::F32 => widen(&self.data, f32::from_le_bytes),
            Dtype::F64 => widen(&self.data, f64::from_le_bytes),
        }
    }

    /// Mean over every element, `None` for an empty array
    pub fn mean(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let values = self.values();
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Per-channel means for `(H, W, C)` arrays; other layouts have no channels
    pub fn channel_means(&self) -> Vec<f64> {
        if self.shape.len() != 3 || self.shape[2] == 0 || self.is_empty() {
            return Vec::new();
        }

        let channels = self.shape[2];
        let mut sums = vec![0.0; channels];
        let mut counts = vec![0usize; channels];
        for (i, value) in self.values().into_iter().enumerate() {
            sums[i % channels] += value;
            counts[i % channels] += 1;
        }

        sums.into_iter()
            .zip(counts)
            .map(|(sum, count)| if count > 0 { sum / count as f64 } else { 0.0 })
            .collect()
    }
}

/// Precomputed statistics a processed frame may carry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStatistics {
    pub mean: Option<f64>,
    pub channels: BTreeMap<String, f64>,
}

impl FrameStatistics {
    /// Parse the `statistics` value leniently: a bare number is the frame mean,
    /// a mapping may hold `mean` and a `channels` mapping of name -> mean
    /// (or name -> `{mean: ..}`)
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(mean) = value.as_f64() {
            return Some(Self { mean: Some(mean), channels: BTreeMap::new() });
        }

        let map = value.as_object()?;
        let mean = map.get("mean").and_then(Value::as_f64);
        let mut channels = BTreeMap::new();
        if let Some(entries) = map.get("channels").and_then(Value::as_object) {
            for (name, entry) in entries {
                let channel_mean = entry
                    .as_f64()
                    .or_else(|| entry.get("mean").and_then(Value::as_f64));
                if let Some(m) = channel_mean {
                    channels.insert(name.clone(), m);
                }
            }
        }

        if mean.is_none() && channels.is_empty() {
            return None;
        }
        Some(Self { mean, channels })
    }

    pub fn channel(&self, name: &str) -> Option<f64> {
        self.channels.get(name).copied()
    }

    pub fn max_channel(&self) -> Option<f64> {
        self.channels.values().copied().reduce(f64::max)
    }
}

/// Metadata mapping attached to every frame message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameMetadata(Payload);

impl FrameMetadata {
    pub fn new(map: Payload) -> Self {
        Self(map)
    }

    /// Parse a JSON object; anything else is a decode error
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        match serde_json::from_slice::<Value>(bytes)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CameraError::decode(format!("frame metadata is not a mapping: {}", other))),
        }
    }

    pub fn as_map(&self) -> &Payload {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn frame_name(&self) -> Option<&str> {
        self.0.get("frame_name").and_then(Value::as_str)
    }

    /// Raw sensor plane
    pub fn is_raw(&self) -> bool {
        self.frame_name() == Some(RAW_FRAME_NAME)
    }

    /// `frame_meta.int-set`: exposure setpoint echoed by the sensor, in ms
    pub fn exposure_setpoint_ms(&self) -> Option<f64> {
        let value = self.0.get("frame_meta")?.get("int-set")?;
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn statistics(&self) -> Option<FrameStatistics> {
        self.0.get("statistics").and_then(FrameStatistics::from_value)
    }

    /// Channel names of an `(H, W, C)` plane, if the backend declares them
    pub fn channel_names(&self) -> Vec<String> {
        self.0
            .get("channel_names")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(|n| n.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    /// Shared-memory reference, if the body lives in a segment
    pub fn shm_ref(&self) -> Option<Result<ShmRef>> {
        let value = self.0.get(SHM_METADATA_KEY)?;
        Some(serde_json::from_value(value.clone()).map_err(CameraError::from))
    }
}

impl From<Payload> for FrameMetadata {
    fn from(map: Payload) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> FrameMetadata {
        FrameMetadata::new(value.as_object().unwrap().clone())
    }

    #[test]
    fn test_dtype_parsing() {
        assert_eq!(Dtype::parse("<u2").unwrap(), Dtype::U16);
        assert_eq!(Dtype::parse("uint16").unwrap(), Dtype::U16);
        assert_eq!(Dtype::parse("float32").unwrap(), Dtype::F32);
        assert_eq!(Dtype::parse("|u1").unwrap(), Dtype::U8);
        assert!(Dtype::parse(">u2").is_err());
    }

    #[test]
    fn test_frame_mean_and_channels() {
        // 1x2 pixels, 2 channels: (10, 100), (30, 300)
        let frame = FrameData::from_u16(vec![1, 2, 2], &[10, 100, 30, 300]).unwrap();
        assert_eq!(frame.len(), 4);
        assert_eq!(frame.mean(), Some(110.0));
        assert_eq!(frame.channel_means(), vec![20.0, 200.0]);

        let flat = FrameData::from_u16(vec![4], &[1, 2, 3, 4]).unwrap();
        assert!(flat.channel_means().is_empty());
    }

    #[test]
    fn test_frame_length_mismatch() {
        assert!(FrameData::new(vec![2, 2], Dtype::U16, vec![0; 6]).is_err());
        assert!(FrameData::new(vec![usize::MAX, 2], Dtype::U16, Vec::new()).is_err());
    }

    #[test]
    fn test_byte_len_overflow() {
        assert_eq!(FrameData::byte_len(&[480, 640], Dtype::U16), Some(614_400));
        assert_eq!(FrameData::byte_len(&[], Dtype::F64), Some(8));
        assert_eq!(FrameData::byte_len(&[usize::MAX, 4], Dtype::U16), None);
        assert_eq!(FrameData::byte_len(&[usize::MAX / 2 + 1], Dtype::U16), None);
    }

    #[test]
    fn test_metadata_accessors() {
        let raw = meta(json!({"frame_name": "Raw", "frame_meta": {"int-set": "25.0"}}));
        assert!(raw.is_raw());
        assert_eq!(raw.exposure_setpoint_ms(), Some(25.0));
        assert!(raw.shm_ref().is_none());

        let isp = meta(json!({
            "frame_name": "Gain",
            "statistics": {"mean": 1200.0, "channels": {"R": 900.0, "G": {"mean": 1500.0}}},
            "shm": {"name": "psm_1", "shape": [4, 4], "dtype": "uint16"}
        }));
        assert!(!isp.is_raw());
        let stats = isp.statistics().unwrap();
        assert_eq!(stats.mean, Some(1200.0));
        assert_eq!(stats.channel("G"), Some(1500.0));
        assert_eq!(stats.max_channel(), Some(1500.0));
        assert_eq!(isp.shm_ref().unwrap().unwrap().name, "psm_1");
    }
}
