// SPDX-License-Identifier: GPL-3.0-only

//! In-memory capture device
//!
//! Behaves like a V4L2 node that produces a fixed colour-bar pattern. Buffers
//! complete in the order they were queued, readiness never blocks, and every
//! step of the buffer-queue protocol can be made to fail through
//! [`SyntheticFaults`]. Call counters in [`SyntheticStats`] let tests observe
//! what the frame source did to the device.

use super::types::{DequeuedBuffer, MappedFrame, PixelLayout, Resolution};
use super::CaptureDevice;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;
use v4l::FourCC;

/// Limited-range BT.601 colour bars as (Y, U, V)
const COLOUR_BARS: [(u8, u8, u8); 8] = [
    (235, 128, 128), // white
    (210, 16, 146),  // yellow
    (170, 166, 16),  // cyan
    (145, 54, 34),   // green
    (106, 202, 222), // magenta
    (81, 90, 240),   // red
    (41, 240, 110),  // blue
    (16, 128, 128),  // black
];

const MAX_BUFFERS: u32 = 32;

/// Failure switches, shared with the test that owns the device
#[derive(Debug, Clone, Default)]
pub struct SyntheticFaults {
    pub open: bool,
    pub enumerate: bool,
    pub set_format: bool,
    /// Fail mapping of this buffer index
    pub map_index: Option<u32>,
    pub queue: bool,
    pub stream_on: bool,
    pub stream_off: bool,
    /// Report readable but have nothing to dequeue
    pub spurious_wakeup: bool,
    /// Never become readable
    pub stall: bool,
    /// Dequeue fails with EIO
    pub dequeue: bool,
}

/// Call counters, shared with the test that owns the device
#[derive(Debug, Default)]
pub struct SyntheticStats {
    pub open_calls: AtomicUsize,
    pub enumerate_calls: AtomicUsize,
    pub set_format_calls: AtomicUsize,
    pub stream_on_calls: AtomicUsize,
    pub stream_off_calls: AtomicUsize,
    pub queue_calls: AtomicUsize,
    pub dequeue_calls: AtomicUsize,
    pub live_mappings: AtomicUsize,
}

impl SyntheticStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Fill a packed 4:2:2 frame with eight vertical colour bars
pub fn colour_bars(resolution: Resolution, layout: PixelLayout) -> Vec<u8> {
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    let mut data = vec![0u8; layout.frame_size(resolution)];
    let [y0, u, y1, v] = layout.offsets();
    let stride = width * PixelLayout::BYTES_PER_PIXEL;

    for row in 0..height {
        let line = &mut data[row * stride..(row + 1) * stride];
        for (pair, group) in line.chunks_exact_mut(4).enumerate() {
            let bar = (pair * 2 * COLOUR_BARS.len()) / width.max(1);
            let (luma, cb, cr) = COLOUR_BARS[bar.min(COLOUR_BARS.len() - 1)];
            group[y0] = luma;
            group[y1] = luma;
            group[u] = cb;
            group[v] = cr;
        }
    }
    data
}

struct SyntheticFrame {
    data: Vec<u8>,
    stats: Arc<SyntheticStats>,
}

impl MappedFrame for SyntheticFrame {
    fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for SyntheticFrame {
    fn drop(&mut self) {
        self.stats.live_mappings.fetch_sub(1, Ordering::SeqCst);
    }
}

fn injected(what: &str) -> io::Error {
    io::Error::other(format!("injected {} failure", what))
}

/// Capture device that lives entirely in memory
pub struct SyntheticDevice {
    name: String,
    sizes: Vec<Resolution>,
    layout: PixelLayout,
    open: bool,
    format: Option<Resolution>,
    buffer_count: u32,
    queued: VecDeque<u32>,
    streaming: bool,
    sequence: u32,
    faults: Arc<Mutex<SyntheticFaults>>,
    stats: Arc<SyntheticStats>,
}

impl SyntheticDevice {
    /// Device offering `sizes` in the given layout
    pub fn new(sizes: Vec<Resolution>, layout: PixelLayout) -> Self {
        Self {
            name: "synthetic".to_string(),
            sizes,
            layout,
            open: false,
            format: None,
            buffer_count: 0,
            queued: VecDeque::new(),
            streaming: false,
            sequence: 0,
            faults: Arc::new(Mutex::new(SyntheticFaults::default())),
            stats: Arc::new(SyntheticStats::default()),
        }
    }

    /// Handle for flipping failure switches after the device is handed off
    pub fn faults(&self) -> Arc<Mutex<SyntheticFaults>> {
        Arc::clone(&self.faults)
    }

    /// Handle for reading call counters after the device is handed off
    pub fn stats(&self) -> Arc<SyntheticStats> {
        Arc::clone(&self.stats)
    }

    fn fault(&self, pick: impl Fn(&SyntheticFaults) -> bool) -> bool {
        self.faults.lock().map(|faults| pick(&faults)).unwrap_or(false)
    }

    fn require_open(&self) -> io::Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "device not open"))
        }
    }
}

impl CaptureDevice for SyntheticDevice {
    fn path(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> io::Result<()> {
        self.stats.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.fault(|f| f.open) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "injected open failure"));
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.streaming = false;
        self.format = None;
        self.buffer_count = 0;
        self.queued.clear();
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn enumerate_frame_sizes(&mut self, fourcc: FourCC) -> io::Result<Vec<Resolution>> {
        self.stats.enumerate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fault(|f| f.enumerate) {
            return Err(injected("enumerate"));
        }
        if PixelLayout::from_fourcc(fourcc) != Some(self.layout) {
            return Ok(Vec::new());
        }
        Ok(self.sizes.clone())
    }

    fn set_format(&mut self, resolution: Resolution, fourcc: FourCC) -> io::Result<Resolution> {
        self.stats.set_format_calls.fetch_add(1, Ordering::SeqCst);
        self.require_open()?;
        if self.fault(|f| f.set_format) {
            return Err(injected("set format"));
        }
        if PixelLayout::from_fourcc(fourcc) != Some(self.layout) {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "pixel format not offered"));
        }
        if self.buffer_count > 0 {
            return Err(io::Error::new(io::ErrorKind::ResourceBusy, "buffers still allocated"));
        }
        self.format = Some(resolution);
        Ok(resolution)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.require_open()?;
        if self.streaming {
            return Err(io::Error::new(io::ErrorKind::ResourceBusy, "streaming"));
        }
        self.queued.clear();
        self.buffer_count = count.min(MAX_BUFFERS);
        Ok(self.buffer_count)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<Box<dyn MappedFrame>> {
        self.require_open()?;
        if index >= self.buffer_count {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no such buffer"));
        }
        if self.fault(|f| f.map_index == Some(index)) {
            return Err(injected("map"));
        }
        let format = self
            .format
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no format set"))?;
        self.stats.live_mappings.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticFrame {
            data: colour_bars(format, self.layout),
            stats: Arc::clone(&self.stats),
        }))
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        self.stats.queue_calls.fetch_add(1, Ordering::SeqCst);
        self.require_open()?;
        if self.fault(|f| f.queue) {
            return Err(injected("queue"));
        }
        if index >= self.buffer_count || self.queued.contains(&index) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.queued.push_back(index);
        Ok(())
    }

    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        if self.fault(|f| f.spurious_wakeup) {
            return Ok(true);
        }
        if self.fault(|f| f.stall) {
            return Ok(false);
        }
        Ok(self.streaming && !self.queued.is_empty())
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        self.stats.dequeue_calls.fetch_add(1, Ordering::SeqCst);
        self.require_open()?;
        if self.fault(|f| f.dequeue) {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        if self.fault(|f| f.spurious_wakeup) {
            return Err(io::Error::from_raw_os_error(libc::EAGAIN));
        }
        if !self.streaming {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let index = self
            .queued
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
        let bytes_used = self
            .format
            .map(|res| self.layout.frame_size(res))
            .unwrap_or(0) as u32;
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(DequeuedBuffer {
            index,
            bytes_used,
            sequence,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.stats.stream_on_calls.fetch_add(1, Ordering::SeqCst);
        self.require_open()?;
        if self.fault(|f| f.stream_on) {
            return Err(injected("stream on"));
        }
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.stats.stream_off_calls.fetch_add(1, Ordering::SeqCst);
        self.require_open()?;
        if self.fault(|f| f.stream_off) {
            return Err(injected("stream off"));
        }
        self.streaming = false;
        // Like the kernel, stream-off returns every queued buffer to userspace
        debug!(dropped = self.queued.len(), "Synthetic stream off");
        self.queued.clear();
        Ok(())
    }
}
