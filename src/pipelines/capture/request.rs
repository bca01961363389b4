// SPDX-License-Identifier: GPL-3.0-only

//! Streams, capture requests and results

use super::buffer::GraphicBuffer;
use super::fence::Fence;
use super::metadata::CameraMetadata;
use std::sync::Arc;

/// Gralloc-style usage bits
pub mod usage {
    pub const SW_READ_OFTEN: u32 = 0x0000_0003;
    pub const SW_WRITE_OFTEN: u32 = 0x0000_0030;
    pub const HW_CAMERA_WRITE: u32 = 0x0002_0000;
    pub const HW_CAMERA_READ: u32 = 0x0004_0000;
    /// Zero-shutter-lag: camera both writes and reads the buffer
    pub const HW_CAMERA_ZSL: u32 = HW_CAMERA_WRITE | HW_CAMERA_READ;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Output,
    Input,
    Bidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// 8-bit RGBA, 4 bytes per pixel
    Rgba8888,
    /// Opaque byte blob; carries a JPEG plus trailer
    Blob,
    /// Left to the HAL; resolved to RGBA on configuration
    ImplementationDefined,
    /// Anything else, by raw format code
    Other(i32),
}

/// One stream requested by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub stream_type: StreamType,
    pub format: StreamFormat,
    pub width: u32,
    pub height: u32,
    pub usage: u32,
    pub max_buffers: u32,
}

impl Stream {
    pub fn output(format: StreamFormat, width: u32, height: u32) -> Self {
        Self {
            stream_type: StreamType::Output,
            format,
            width,
            height,
            usage: 0,
            max_buffers: 0,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferStatus {
    #[default]
    Ok,
    Error,
}

/// Destination buffer of one stream in one request
#[derive(Debug)]
pub struct StreamBuffer {
    /// Stream as configured (format and size)
    pub stream: Stream,
    pub buffer: Arc<dyn GraphicBuffer>,
    pub acquire_fence: Fence,
    pub release_fence: Fence,
    pub status: BufferStatus,
}

impl StreamBuffer {
    pub fn new(stream: Stream, buffer: Arc<dyn GraphicBuffer>) -> Self {
        Self {
            stream,
            buffer,
            acquire_fence: Fence::None,
            release_fence: Fence::None,
            status: BufferStatus::Ok,
        }
    }

    pub fn with_acquire_fence(mut self, fence: Fence) -> Self {
        self.acquire_fence = fence;
        self
    }
}

/// One capture request
#[derive(Debug)]
pub struct CaptureRequest {
    pub frame_number: u32,
    /// `None` reuses the settings of the previous request
    pub settings: Option<CameraMetadata>,
    pub input_buffer: Option<StreamBuffer>,
    pub output_buffers: Vec<StreamBuffer>,
}

impl CaptureRequest {
    pub fn new(frame_number: u32, settings: Option<CameraMetadata>) -> Self {
        Self {
            frame_number,
            settings,
            input_buffer: None,
            output_buffers: Vec::new(),
        }
    }

    pub fn with_output(mut self, buffer: StreamBuffer) -> Self {
        self.output_buffers.push(buffer);
        self
    }
}

/// Completed request delivered to [`CaptureCallbacks::process_capture_result`]
#[derive(Debug)]
pub struct CaptureResult {
    pub frame_number: u32,
    pub metadata: Arc<CameraMetadata>,
    pub output_buffers: Vec<StreamBuffer>,
}

/// Client callbacks
pub trait CaptureCallbacks: Send + Sync {
    /// Called once per request, before the device is touched
    fn notify_shutter(&self, frame_number: u32, timestamp_ns: u64);

    /// Called once per successfully completed request
    fn process_capture_result(&self, result: CaptureResult);
}
