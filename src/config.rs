// SPDX-License-Identifier: GPL-3.0-only

//! HAL configuration
//!
//! Read from `$CAMERA_HAL_CONFIG` or `<config dir>/camera-hal/config.json`.
//! Every field has a default, so a partial file (or none at all) is fine.

use crate::backends::camera::{FrameSourceConfig, PixelLayout, Resolution};
use crate::constants;
use crate::errors::{HalError, HalResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture device node
    pub device_path: String,
    /// Packed 4:2:2 layout to request ("UYVY" or "YUYV")
    pub pixel_format: String,
    /// Buffers in the capture ring
    pub buffer_count: u32,
    /// Forced capture size as `WIDTHxHEIGHT`; skips enumeration
    pub resolution_override: Option<String>,
    /// Largest enumerated width kept
    pub max_width: u32,
    /// Largest enumerated height kept
    pub max_height: u32,
    pub dequeue_timeout_ms: u64,
    pub fence_timeout_ms: u64,
    /// Row bands per RGBA conversion
    pub conversion_bands: usize,
    /// Worker threads; defaults to the hardware parallelism
    pub worker_threads: Option<usize>,
    /// JPEG quality when request settings carry none
    pub default_jpeg_quality: u8,
    /// Open and stream once, never renegotiate the capture size
    pub keep_device_open: bool,
    /// Cap on frames per second read from the device
    pub fps_limit: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_path: constants::DEFAULT_DEVICE_PATH.to_string(),
            pixel_format: constants::DEFAULT_PIXEL_FORMAT.to_string(),
            buffer_count: constants::DEFAULT_BUFFER_COUNT,
            resolution_override: None,
            max_width: constants::MAX_ENUMERATED_WIDTH,
            max_height: constants::MAX_ENUMERATED_HEIGHT,
            dequeue_timeout_ms: constants::DEQUEUE_TIMEOUT.as_millis() as u64,
            fence_timeout_ms: constants::FENCE_TIMEOUT.as_millis() as u64,
            conversion_bands: constants::CONVERSION_BAND_COUNT,
            worker_threads: None,
            default_jpeg_quality: constants::DEFAULT_JPEG_QUALITY,
            keep_device_open: false,
            fps_limit: None,
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("camera-hal").join("config.json"))
    }

    /// Load from the environment-selected or default path, then apply the
    /// resolution override variable
    pub fn load() -> HalResult<Self> {
        let path = std::env::var_os(constants::CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(Self::default_path);
        let resolution_env = std::env::var(constants::RESOLUTION_OVERRIDE_ENV).ok();
        Self::load_from(path.as_deref(), resolution_env)
    }

    /// Load from `path` (missing file means defaults) and apply
    /// `resolution_env` over the file's override
    pub fn load_from(path: Option<&Path>, resolution_env: Option<String>) -> HalResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| HalError::Config(format!("{}: {}", path.display(), e)))?;
                info!(path = %path.display(), "Loaded configuration");
                Self::from_json_str(&text)?
            }
            Some(path) => {
                debug!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        if let Some(value) = resolution_env.filter(|v| !v.trim().is_empty()) {
            debug!(value = %value, "Resolution override from environment");
            config.resolution_override = Some(value);
        }
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(text: &str) -> HalResult<Self> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> HalResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> HalResult<()> {
        self.pixel_format.parse::<PixelLayout>()?;
        if self.buffer_count == 0 {
            return Err(HalError::Config("buffer_count must be at least 1".into()));
        }
        if self.conversion_bands == 0 {
            return Err(HalError::Config(
                "conversion_bands must be at least 1".into(),
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(HalError::Config("worker_threads must be at least 1".into()));
        }
        if !(1..=100).contains(&self.default_jpeg_quality) {
            return Err(HalError::Config(format!(
                "default_jpeg_quality {} outside 1..=100",
                self.default_jpeg_quality
            )));
        }
        Ok(())
    }

    /// Parsed capture layout; an unknown name falls back to UYVY
    pub fn pixel_layout(&self) -> PixelLayout {
        self.pixel_format.parse().unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to UYVY");
            PixelLayout::Uyvy
        })
    }

    /// Parsed override; a malformed value is ignored
    pub fn resolution_override(&self) -> Option<Resolution> {
        let raw = self.resolution_override.as_deref()?;
        match raw.parse::<Resolution>() {
            Ok(res) => Some(res),
            Err(e) => {
                warn!(value = raw, error = %e, "Ignoring malformed resolution override");
                None
            }
        }
    }

    pub fn frame_source_config(&self) -> FrameSourceConfig {
        FrameSourceConfig {
            layout: self.pixel_layout(),
            buffer_count: self.buffer_count.max(1),
            resolution_override: self.resolution_override(),
            max_resolution: Resolution::new(self.max_width, self.max_height),
            dequeue_timeout: Duration::from_millis(self.dequeue_timeout_ms),
            keep_device_open: self.keep_device_open,
            fps_limit: self.fps_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_fills_defaults() {
        let config = Config::from_json_str(r#"{ "pixel_format": "YUYV", "fps_limit": 15 }"#)
            .unwrap();
        assert_eq!(config.pixel_layout(), PixelLayout::Yuyv);
        assert_eq!(config.fps_limit, Some(15));
        assert_eq!(config.buffer_count, constants::DEFAULT_BUFFER_COUNT);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_json_str(r#"{ "pixel_format": "MJPG" }"#).is_err());
        assert!(Config::from_json_str(r#"{ "buffer_count": 0 }"#).is_err());
        assert!(Config::from_json_str(r#"{ "default_jpeg_quality": 0 }"#).is_err());
        assert!(matches!(
            Config::from_json_str("{ not json"),
            Err(HalError::Config(_))
        ));
    }

    #[test]
    fn test_malformed_override_ignored() {
        let config = Config {
            resolution_override: Some("1280by720".into()),
            ..Config::default()
        };
        assert_eq!(config.resolution_override(), None);
        assert_eq!(config.frame_source_config().resolution_override, None);
    }
}
