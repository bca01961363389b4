// SPDX-License-Identifier: GPL-3.0-only

//! Kernel V4L2 capture node

use super::types::{DequeuedBuffer, MappedFrame, Resolution, fourcc_to_string};
use super::v4l2_utils;
use super::CaptureDevice;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::{debug, info, warn};
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

/// A memory-mapped V4L2 buffer, unmapped on drop
struct MmapFrame {
    ptr: *mut libc::c_void,
    len: usize,
}

// SAFETY: the mapping is plain shared memory owned by this value; the
// frame source only reads it while the buffer is checked out.
unsafe impl Send for MmapFrame {}

impl MappedFrame for MmapFrame {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len come from a successful mmap that lives as long as self
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

impl Drop for MmapFrame {
    fn drop(&mut self) {
        let result = unsafe { libc::munmap(self.ptr, self.len) };
        if result < 0 {
            warn!(
                error = %io::Error::last_os_error(),
                len = self.len,
                "munmap failed"
            );
        }
    }
}

/// Capture device backed by a `/dev/video*` node
pub struct V4l2Device {
    path: String,
    device: Option<Device>,
}

impl V4l2Device {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            device: None,
        }
    }

    fn fd(&self) -> io::Result<RawFd> {
        self.device
            .as_ref()
            .map(|dev| dev.handle().fd())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device not open"))
    }

    fn device(&self) -> io::Result<&Device> {
        self.device
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device not open"))
    }
}

fn discrete_sizes(dev: &Device, fourcc: FourCC) -> io::Result<Vec<Resolution>> {
    let mut sizes = Vec::new();
    for size in dev.enum_framesizes(fourcc)? {
        match size.size {
            v4l::framesize::FrameSizeEnum::Discrete(discrete) => {
                sizes.push(Resolution::new(discrete.width, discrete.height));
            }
            v4l::framesize::FrameSizeEnum::Stepwise(step) => {
                debug!(
                    min = format!("{}x{}", step.min_width, step.min_height),
                    max = format!("{}x{}", step.max_width, step.max_height),
                    "Ignoring stepwise frame size range"
                );
            }
        }
    }
    Ok(sizes)
}

impl CaptureDevice for V4l2Device {
    fn path(&self) -> &str {
        &self.path
    }

    fn open(&mut self) -> io::Result<()> {
        if self.device.is_some() {
            return Ok(());
        }
        let dev = Device::with_path(&self.path)?;
        info!(path = %self.path, "Opened V4L2 device");
        self.device = Some(dev);
        Ok(())
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            info!(path = %self.path, "Closed V4L2 device");
        }
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn enumerate_frame_sizes(&mut self, fourcc: FourCC) -> io::Result<Vec<Resolution>> {
        match &self.device {
            Some(dev) => discrete_sizes(dev, fourcc),
            None => {
                let dev = Device::with_path(&self.path)?;
                discrete_sizes(&dev, fourcc)
            }
        }
    }

    fn set_format(&mut self, resolution: Resolution, fourcc: FourCC) -> io::Result<Resolution> {
        let dev = self.device()?;
        let requested = Format::new(resolution.width, resolution.height, fourcc);
        let actual = dev.set_format(&requested)?;
        if actual.fourcc != fourcc {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!(
                    "driver chose {} instead of {}",
                    fourcc_to_string(actual.fourcc),
                    fourcc_to_string(fourcc)
                ),
            ));
        }
        debug!(
            width = actual.width,
            height = actual.height,
            fourcc = %fourcc_to_string(actual.fourcc),
            "V4L2 format configured"
        );
        Ok(Resolution::new(actual.width, actual.height))
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        v4l2_utils::request_buffers(self.fd()?, count)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<Box<dyn MappedFrame>> {
        let fd = self.fd()?;
        let placement = v4l2_utils::query_buffer(fd, index)?;
        let len = placement.length as usize;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                placement.offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        // Stale data from a previous session must not leak into the first frame
        unsafe { std::ptr::write_bytes(ptr as *mut u8, 0, len) };
        Ok(Box::new(MmapFrame { ptr, len }))
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        v4l2_utils::queue_buffer(self.fd()?, index)
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
        v4l2_utils::poll_readable(self.fd()?, timeout_ms)
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        let done = v4l2_utils::dequeue_buffer(self.fd()?)?;
        Ok(DequeuedBuffer {
            index: done.index,
            bytes_used: done.bytes_used,
            sequence: done.sequence,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        v4l2_utils::set_stream(self.fd()?, true)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        v4l2_utils::set_stream(self.fd()?, false)
    }
}
