// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the camera HAL
//!
//! Every fallible operation in the crate returns [`HalResult`]. Device and
//! mapping failures travel up through the frame source to the capture
//! orchestrator, which turns them into a failed request without tearing the
//! device down.

use std::fmt;

/// Result type alias using HalError
pub type HalResult<T> = Result<T, HalError>;

/// Main HAL error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    /// The capture device node could not be opened
    DeviceOpenFailed(String),
    /// The device refused the requested pixel format or resolution
    FormatNegotiationFailed(String),
    /// Requesting, mapping or queueing a ring buffer failed
    BufferAllocationFailed(String),
    /// No buffer completed within the dequeue timeout
    DequeueTimeout,
    /// The device reported readiness but had no completed buffer
    NotReady,
    /// Dequeueing failed for a reason other than a timeout
    DequeueError(String),
    /// Returning a buffer to the device queue failed
    RequeueFailed(String),
    /// An output buffer's acquire fence did not signal in time
    FenceTimeout { frame_number: u32, buffer: usize },
    /// An output buffer could not be mapped for writing
    BufferMapFailed(String),
    /// The encoded JPEG does not fit into the destination
    EncodeTooLarge { encoded: usize, capacity: usize },
    /// The JPEG encoder itself failed
    EncodeFailed(String),
    /// Pixel format not handled by the conversion pipeline
    UnsupportedPixelFormat(String),
    /// More than one input or bidirectional stream was configured
    MultipleInputStreamsRejected,
    /// A stream requested a usage this HAL does not implement
    UnsupportedStreamUsage(String),
    /// Stream configuration contained no streams
    NoStreams,
    /// First request carried no settings and none are cached
    MissingSettings,
    /// Stream-on or stream-off failed
    StreamToggleFailed(String),
    /// Operation attempted from a state where it is not allowed
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    /// A frame is already checked out
    FrameCheckedOut,
    /// The given frame is not the one currently checked out
    NotCheckedOut,
    /// The device reported no usable resolution
    NoResolutions,
    /// Zero or otherwise unusable resolution
    InvalidResolution(String),
    /// Resolution change requested while the device is pinned open
    ResolutionChangeUnsupported,
    /// Capture requests issued before callbacks were registered
    NotInitialized,
    /// Worker pool start requested while it is running
    PoolAlreadyRunning,
    /// Work submitted to a stopped worker pool
    PoolNotRunning,
    /// A pool task panicked or was dropped before completing
    TaskFailed(String),
    /// Source or destination memory is smaller than the frame needs
    InvalidBufferSize { needed: usize, available: usize },
    /// Configuration errors
    Config(String),
    /// Generic I/O error
    Io(String),
}

impl HalError {
    /// True for the "no frame right now" outcomes of a read lock
    pub fn is_not_ready(&self) -> bool {
        matches!(self, HalError::NotReady | HalError::DequeueTimeout)
    }
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::DeviceOpenFailed(msg) => write!(f, "Could not open device: {}", msg),
            HalError::FormatNegotiationFailed(msg) => {
                write!(f, "Format negotiation failed: {}", msg)
            }
            HalError::BufferAllocationFailed(msg) => {
                write!(f, "Buffer allocation failed: {}", msg)
            }
            HalError::DequeueTimeout => write!(f, "Timed out waiting for a frame"),
            HalError::NotReady => write!(f, "No frame ready"),
            HalError::DequeueError(msg) => write!(f, "Could not dequeue buffer: {}", msg),
            HalError::RequeueFailed(msg) => write!(f, "Could not queue buffer: {}", msg),
            HalError::FenceTimeout {
                frame_number,
                buffer,
            } => write!(
                f,
                "Acquire fence timed out (frame {}, buffer {})",
                frame_number, buffer
            ),
            HalError::BufferMapFailed(msg) => write!(f, "Buffer map failed: {}", msg),
            HalError::EncodeTooLarge { encoded, capacity } => write!(
                f,
                "JPEG image too big: {} bytes, capacity {}",
                encoded, capacity
            ),
            HalError::EncodeFailed(msg) => write!(f, "JPEG encoding failed: {}", msg),
            HalError::UnsupportedPixelFormat(msg) => {
                write!(f, "Unsupported pixel format: {}", msg)
            }
            HalError::MultipleInputStreamsRejected => {
                write!(f, "Only one input/bidirectional stream allowed")
            }
            HalError::UnsupportedStreamUsage(msg) => {
                write!(f, "Unsupported stream usage: {}", msg)
            }
            HalError::NoStreams => write!(f, "No streams to configure"),
            HalError::MissingSettings => write!(f, "First request does not have metadata"),
            HalError::StreamToggleFailed(msg) => write!(f, "Could not toggle streaming: {}", msg),
            HalError::InvalidState { operation, state } => {
                write!(f, "Cannot {} while {}", operation, state)
            }
            HalError::FrameCheckedOut => write!(f, "A frame is already checked out"),
            HalError::NotCheckedOut => write!(f, "Buffer is not checked out"),
            HalError::NoResolutions => write!(f, "No available resolutions found"),
            HalError::InvalidResolution(msg) => write!(f, "Invalid resolution: {}", msg),
            HalError::ResolutionChangeUnsupported => {
                write!(f, "Resolution change not supported while device is pinned open")
            }
            HalError::NotInitialized => write!(f, "Callbacks not initialized"),
            HalError::PoolAlreadyRunning => write!(f, "Worker pool already running"),
            HalError::PoolNotRunning => write!(f, "Worker pool not running"),
            HalError::TaskFailed(msg) => write!(f, "Worker task failed: {}", msg),
            HalError::InvalidBufferSize { needed, available } => write!(
                f,
                "Buffer too small: need {} bytes, have {}",
                needed, available
            ),
            HalError::Config(msg) => write!(f, "Configuration error: {}", msg),
            HalError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for HalError {}

impl From<std::io::Error> for HalError {
    fn from(err: std::io::Error) -> Self {
        HalError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for HalError {
    fn from(err: serde_json::Error) -> Self {
        HalError::Config(err.to_string())
    }
}
