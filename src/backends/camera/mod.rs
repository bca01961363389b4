// SPDX-License-Identifier: MPL-2.0
// Capture device abstraction with a real V4L2 node and an in-memory stand-in

//! Camera backend abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  Camera (requests)  │
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │     FrameSource     │  ← Buffer ring, checkout state, resolution
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ CaptureDevice Trait │  ← Buffer-queue I/O primitive
//! └──────────┬──────────┘
//!            │
//!      ┌─────┴──────┐
//!      ▼            ▼
//! ┌─────────┐ ┌───────────┐
//! │  V4L2   │ │ Synthetic │
//! └─────────┘ └───────────┘
//! ```

pub mod frame_source;
pub mod synthetic;
pub mod types;
pub mod v4l2_device;
pub mod v4l2_utils;

pub use frame_source::{FrameSource, FrameSourceConfig};
pub use synthetic::{SyntheticDevice, SyntheticFaults, SyntheticStats};
pub use types::*;
pub use v4l2_device::V4l2Device;

use std::io;
use std::time::Duration;
use v4l::FourCC;

/// Buffer-queue I/O primitive of a capture device
///
/// Mirrors the kernel protocol one call per step: open, negotiate a format,
/// request N buffers, map each one, queue them all, stream on, then repeatedly
/// wait, dequeue and re-queue. Errors are plain `io::Error`s; the frame source
/// decides what they mean.
pub trait CaptureDevice: Send {
    /// Device node path (or a descriptive name for non-node devices)
    fn path(&self) -> &str;

    /// Open the device node
    fn open(&mut self) -> io::Result<()>;

    /// Close the device node; buffers must be unmapped and released first
    fn close(&mut self);

    /// Whether the node is currently open
    fn is_open(&self) -> bool;

    /// Discrete frame sizes the device offers for `fourcc`
    ///
    /// Opens the node transiently when it is closed.
    fn enumerate_frame_sizes(&mut self, fourcc: FourCC) -> io::Result<Vec<Resolution>>;

    /// Negotiate pixel format and size, returning what the driver accepted
    fn set_format(&mut self, resolution: Resolution, fourcc: FourCC) -> io::Result<Resolution>;

    /// Request `count` memory-mapped buffers; returns the number granted.
    /// `count == 0` releases every buffer.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// Map buffer `index` into our address space
    fn map_buffer(&mut self, index: u32) -> io::Result<Box<dyn MappedFrame>>;

    /// Hand buffer `index` to the device for filling
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// Wait until a completed buffer can be dequeued.
    ///
    /// Returns `Ok(false)` if `timeout` elapsed first.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Take the oldest completed buffer.
    ///
    /// `ErrorKind::WouldBlock` means nothing is ready yet.
    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer>;

    /// Start streaming
    fn stream_on(&mut self) -> io::Result<()>;

    /// Stop streaming; the device drops every queued buffer
    fn stream_off(&mut self) -> io::Result<()>;
}
