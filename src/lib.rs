// SPDX-License-Identifier: MPL-2.0

//! Camera HAL - V4L2 capture behind a request/result interface
//!
//! This library turns a packed YUV 4:2:2 capture device into a camera that
//! answers capture requests with RGBA and JPEG output buffers.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Capture devices and the frame source buffer ring
//! - [`media`]: Worker pool, banded YUV conversion and JPEG encoding
//! - [`pipelines`]: Stream configuration and capture request processing
//! - [`config`]: User configuration handling
//! - [`errors`]: The crate-wide error type
//!
//! # Example
//!
//! ```ignore
//! let config = Config::load()?;
//! let camera = Camera::new(Box::new(V4l2Device::new(&config.device_path)), &config);
//! camera.open()?;
//! camera.initialize(callbacks);
//! camera.configure_streams(&mut streams)?;
//! camera.process_capture_request(request)?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod media;
pub mod pipelines;

// Re-export commonly used types
pub use backends::camera::{
    CaptureDevice, FrameSource, FrameSourceConfig, PixelLayout, Resolution, SyntheticDevice,
    V4l2Device,
};
pub use config::Config;
pub use errors::{HalError, HalResult};
pub use media::{ConversionPipeline, WorkerPool};
pub use pipelines::capture::{Camera, CameraInfo, CaptureCallbacks, CaptureRequest, CaptureResult};
