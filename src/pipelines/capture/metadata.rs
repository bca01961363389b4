// SPDX-License-Identifier: GPL-3.0-only

//! Request settings and result metadata

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata keys understood by the HAL
///
/// Ordering is the iteration and serialization order of [`CameraMetadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetadataTag {
    ControlMode,
    ControlCaptureIntent,
    ControlAeMode,
    ControlAfMode,
    ControlAwbMode,
    JpegQuality,
    JpegOrientation,
    LensFacing,
    SensorOrientation,
    SensorTimestamp,
    SyncFrameNumber,
    RequestId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataValue {
    U8(u8),
    I32(i32),
    I64(i64),
    Text(String),
}

/// Ordered tag to value map carried by requests and results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraMetadata {
    entries: BTreeMap<MetadataTag, MetadataValue>,
}

impl CameraMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value
    pub fn set(&mut self, tag: MetadataTag, value: MetadataValue) -> &mut Self {
        self.entries.insert(tag, value);
        self
    }

    pub fn get(&self, tag: MetadataTag) -> Option<&MetadataValue> {
        self.entries.get(&tag)
    }

    pub fn get_u8(&self, tag: MetadataTag) -> Option<u8> {
        match self.entries.get(&tag) {
            Some(MetadataValue::U8(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, tag: MetadataTag) -> Option<i64> {
        match self.entries.get(&tag) {
            Some(MetadataValue::I64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn remove(&mut self, tag: MetadataTag) -> Option<MetadataValue> {
        self.entries.remove(&tag)
    }

    pub fn contains(&self, tag: MetadataTag) -> bool {
        self.entries.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetadataTag, &MetadataValue)> {
        self.entries.iter()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters() {
        let mut md = CameraMetadata::new();
        md.set(MetadataTag::JpegQuality, MetadataValue::U8(80))
            .set(MetadataTag::SensorTimestamp, MetadataValue::I64(42));
        assert_eq!(md.get_u8(MetadataTag::JpegQuality), Some(80));
        assert_eq!(md.get_i64(MetadataTag::SensorTimestamp), Some(42));
        // Wrong type reads as absent
        assert_eq!(md.get_i64(MetadataTag::JpegQuality), None);
    }

    #[test]
    fn test_json_keeps_tag_order() {
        let mut md = CameraMetadata::new();
        md.set(MetadataTag::SyncFrameNumber, MetadataValue::I64(3));
        md.set(MetadataTag::ControlMode, MetadataValue::U8(1));
        let json = md.to_json().unwrap();
        let control = json.find("ControlMode").unwrap();
        let sync = json.find("SyncFrameNumber").unwrap();
        assert!(control < sync);
        let back: CameraMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, md);
    }
}
