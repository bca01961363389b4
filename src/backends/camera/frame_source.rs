// SPDX-License-Identifier: GPL-3.0-only

//! Buffer ring and streaming state machine over a capture device
//!
//! ```text
//!                connect()            set_streaming(true)
//! Disconnected ───────────► Connected ───────────────────► Streaming
//!      ▲                     │     ▲                           │
//!      └─────────────────────┘     └───────────────────────────┘
//!           disconnect()              set_streaming(false)
//! ```
//!
//! The ring holds a small fixed number of memory-mapped buffers. At most one
//! of them is checked out to a reader at a time; [`FrameSource::read_lock`]
//! hands out a [`FrameLease`] that must be returned through
//! [`FrameSource::unlock`] before the next frame can be taken.

use super::types::{
    BufferState, DequeuedBuffer, FrameLease, MappedFrame, PixelLayout, Resolution, SourceState,
};
use super::CaptureDevice;
use crate::constants;
use crate::errors::{HalError, HalResult};
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Frame source settings
#[derive(Debug, Clone)]
pub struct FrameSourceConfig {
    /// Packed layout requested from the device
    pub layout: PixelLayout,
    /// Buffers in the ring
    pub buffer_count: u32,
    /// Forced capture size; skips enumeration entirely
    pub resolution_override: Option<Resolution>,
    /// Enumerated sizes beyond this are discarded
    pub max_resolution: Resolution,
    /// Bound on a single read lock's wait for the device
    pub dequeue_timeout: Duration,
    /// Keep the device streaming at a fixed size once connected
    pub keep_device_open: bool,
    /// Throttle dequeues to at most this many frames per second
    pub fps_limit: Option<u32>,
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        Self {
            layout: PixelLayout::Uyvy,
            buffer_count: constants::DEFAULT_BUFFER_COUNT,
            resolution_override: None,
            max_resolution: Resolution::new(
                constants::MAX_ENUMERATED_WIDTH,
                constants::MAX_ENUMERATED_HEIGHT,
            ),
            dequeue_timeout: constants::DEQUEUE_TIMEOUT,
            keep_device_open: false,
            fps_limit: None,
        }
    }
}

struct RingBuffer {
    mapping: Box<dyn MappedFrame>,
    state: BufferState,
}

/// Memory-mapped frame ring driven through a [`CaptureDevice`]
pub struct FrameSource {
    device: Box<dyn CaptureDevice>,
    config: FrameSourceConfig,
    state: SourceState,
    buffers: Vec<RingBuffer>,
    /// Size to use on the next connect
    target: Option<Resolution>,
    /// Size the device accepted on the current connection
    negotiated: Option<Resolution>,
    resolutions: Option<Vec<Resolution>>,
    checked_out: Option<usize>,
    generation: u64,
    last_dequeue: Option<Instant>,
}

impl FrameSource {
    pub fn new(device: Box<dyn CaptureDevice>, config: FrameSourceConfig) -> Self {
        Self {
            device,
            config,
            state: SourceState::Disconnected,
            buffers: Vec::new(),
            target: None,
            negotiated: None,
            resolutions: None,
            checked_out: None,
            generation: 0,
            last_dequeue: None,
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn layout(&self) -> PixelLayout {
        self.config.layout
    }

    pub fn device_path(&self) -> &str {
        self.device.path()
    }

    pub fn config(&self) -> &FrameSourceConfig {
        &self.config
    }

    /// Negotiated size while connected, otherwise the size the next connect will use
    pub fn resolution(&self) -> Option<Resolution> {
        self.negotiated
            .or(self.target)
            .or(self.config.resolution_override)
    }

    /// Per-buffer checkout state, indexed by ring position
    pub fn buffer_states(&self) -> Vec<BufferState> {
        self.buffers.iter().map(|b| b.state).collect()
    }

    /// Whether a frame is currently checked out
    pub fn is_checked_out(&self) -> bool {
        self.checked_out.is_some()
    }

    fn invalid_state(&self, operation: &'static str) -> HalError {
        warn!(operation, state = %self.state, "Rejected frame source operation");
        HalError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }

    /// Sizes the device can capture, capped to the configured maximum.
    ///
    /// An override short-circuits to a single entry without touching the
    /// device. Enumeration results are cached once non-empty.
    pub fn available_resolutions(&mut self) -> HalResult<Vec<Resolution>> {
        if let Some(forced) = self.config.resolution_override {
            return Ok(vec![forced]);
        }
        if let Some(cached) = &self.resolutions {
            return Ok(cached.clone());
        }

        let was_open = self.device.is_open();
        let fourcc = self.config.layout.fourcc();
        let sizes = self.device.enumerate_frame_sizes(fourcc).map_err(|e| {
            error!(path = %self.device.path(), error = %e, "Frame size enumeration failed");
            if was_open {
                HalError::FormatNegotiationFailed(e.to_string())
            } else {
                HalError::DeviceOpenFailed(format!("{}: {}", self.device.path(), e))
            }
        })?;

        let max = self.config.max_resolution;
        let mut usable: Vec<Resolution> = Vec::new();
        for size in sizes {
            if size.is_empty() || !size.fits_within(max) {
                trace!(%size, %max, "Skipping frame size");
                continue;
            }
            if !usable.contains(&size) {
                usable.push(size);
            }
        }

        if usable.is_empty() {
            warn!(path = %self.device.path(), "Device reported no usable resolutions");
            return Err(HalError::NoResolutions);
        }

        debug!(count = usable.len(), first = %usable[0], "Enumerated resolutions");
        self.resolutions = Some(usable.clone());
        Ok(usable)
    }

    /// Largest width and largest height across all available sizes.
    ///
    /// The pair need not itself be a supported size.
    pub fn sensor_resolution(&mut self) -> HalResult<Resolution> {
        let sizes = self.available_resolutions()?;
        let width = sizes.iter().map(|r| r.width).max().unwrap_or(0);
        let height = sizes.iter().map(|r| r.height).max().unwrap_or(0);
        Ok(Resolution::new(width, height))
    }

    /// Open the device, allocate the ring and queue every buffer
    pub fn connect(&mut self) -> HalResult<()> {
        if self.state != SourceState::Disconnected {
            return Err(self.invalid_state("connect"));
        }

        self.device.open().map_err(|e| {
            error!(path = %self.device.path(), error = %e, "Could not open device");
            HalError::DeviceOpenFailed(format!("{}: {}", self.device.path(), e))
        })?;

        let target = match self.target.or(self.config.resolution_override) {
            Some(target) => target,
            None => match self.available_resolutions() {
                Ok(sizes) => sizes[0],
                Err(e) => {
                    self.device.close();
                    return Err(e);
                }
            },
        };

        if let Err(e) = self.allocate(target) {
            self.release_buffers();
            self.device.close();
            return Err(e);
        }

        self.state = SourceState::Connected;
        info!(
            path = %self.device.path(),
            resolution = ?self.negotiated,
            buffers = self.buffers.len(),
            "Frame source connected"
        );
        Ok(())
    }

    fn allocate(&mut self, target: Resolution) -> HalResult<()> {
        let layout = self.config.layout;
        let actual = self
            .device
            .set_format(target, layout.fourcc())
            .map_err(|e| {
                error!(%target, %layout, error = %e, "Format negotiation failed");
                HalError::FormatNegotiationFailed(format!("{} {}: {}", target, layout, e))
            })?;
        if actual.is_empty() {
            return Err(HalError::FormatNegotiationFailed(format!(
                "device accepted empty size {}",
                actual
            )));
        }
        if actual != target {
            warn!(requested = %target, actual = %actual, "Device adjusted capture size");
        }

        let granted = self
            .device
            .request_buffers(self.config.buffer_count)
            .map_err(|e| HalError::BufferAllocationFailed(format!("request buffers: {}", e)))?;
        if granted == 0 {
            return Err(HalError::BufferAllocationFailed(
                "device granted no buffers".to_string(),
            ));
        }

        let frame_size = layout.frame_size(actual);
        for index in 0..granted {
            let mapping = self
                .device
                .map_buffer(index)
                .map_err(|e| HalError::BufferAllocationFailed(format!("map {}: {}", index, e)))?;
            if mapping.as_slice().len() < frame_size {
                return Err(HalError::BufferAllocationFailed(format!(
                    "buffer {} holds {} bytes, frame needs {}",
                    index,
                    mapping.as_slice().len(),
                    frame_size
                )));
            }
            self.buffers.push(RingBuffer {
                mapping,
                state: BufferState::Queued,
            });
        }

        for index in 0..granted {
            self.device
                .queue_buffer(index)
                .map_err(|e| HalError::BufferAllocationFailed(format!("queue {}: {}", index, e)))?;
        }

        self.negotiated = Some(actual);
        Ok(())
    }

    fn release_buffers(&mut self) {
        let had_buffers = !self.buffers.is_empty();
        self.buffers.clear();
        self.checked_out = None;
        if had_buffers
            && self.device.is_open()
            && let Err(e) = self.device.request_buffers(0)
        {
            warn!(error = %e, "Could not release device buffers");
        }
    }

    fn teardown(&mut self) {
        self.release_buffers();
        self.device.close();
        if let Some(negotiated) = self.negotiated.take() {
            self.target = Some(negotiated);
        }
        self.state = SourceState::Disconnected;
        self.last_dequeue = None;
    }

    /// Stop streaming if needed, unmap every buffer and close the device
    pub fn disconnect(&mut self) -> HalResult<()> {
        if self.state == SourceState::Disconnected {
            return Err(self.invalid_state("disconnect"));
        }
        if self.checked_out.is_some() {
            return Err(HalError::FrameCheckedOut);
        }
        if self.state == SourceState::Streaming
            && let Err(e) = self.device.stream_off()
        {
            warn!(error = %e, "Stream off failed during disconnect");
        }
        self.teardown();
        info!(path = %self.device.path(), "Frame source disconnected");
        Ok(())
    }

    /// Change the capture size.
    ///
    /// While connected this reconnects the device at the new size and leaves
    /// the source `Connected`; the caller re-enables streaming.
    pub fn set_resolution(&mut self, resolution: Resolution) -> HalResult<()> {
        if resolution.is_empty() {
            return Err(HalError::InvalidResolution(resolution.to_string()));
        }
        if self.resolution() == Some(resolution) {
            return Ok(());
        }

        if self.state == SourceState::Disconnected {
            debug!(%resolution, "Storing target resolution for next connect");
            self.target = Some(resolution);
            return Ok(());
        }

        if self.config.keep_device_open {
            warn!(%resolution, "Resolution change rejected while device is kept open");
            return Err(HalError::ResolutionChangeUnsupported);
        }
        if self.checked_out.is_some() {
            return Err(HalError::FrameCheckedOut);
        }

        if self.state == SourceState::Streaming {
            self.device.stream_off().map_err(|e| {
                error!(error = %e, "Stream off failed before resolution change");
                HalError::StreamToggleFailed(e.to_string())
            })?;
            self.state = SourceState::Connected;
        }

        info!(from = ?self.negotiated, to = %resolution, "Reconnecting at new resolution");
        self.teardown();
        self.target = Some(resolution);
        self.connect()
    }

    /// Turn streaming on or off; asking for the current state is a no-op
    pub fn set_streaming(&mut self, enable: bool) -> HalResult<()> {
        match (self.state, enable) {
            (SourceState::Disconnected, _) => Err(self.invalid_state("toggle streaming")),
            (SourceState::Streaming, true) | (SourceState::Connected, false) => Ok(()),
            (SourceState::Connected, true) => {
                self.device.stream_on().map_err(|e| {
                    error!(error = %e, "Stream on failed");
                    HalError::StreamToggleFailed(e.to_string())
                })?;
                self.state = SourceState::Streaming;
                self.last_dequeue = None;
                debug!(path = %self.device.path(), "Streaming started");
                Ok(())
            }
            (SourceState::Streaming, false) => {
                if self.config.keep_device_open {
                    debug!("Device kept open, leaving stream running");
                    return Ok(());
                }
                if self.checked_out.is_some() {
                    return Err(HalError::FrameCheckedOut);
                }
                self.device.stream_off().map_err(|e| {
                    error!(error = %e, "Stream off failed");
                    HalError::StreamToggleFailed(e.to_string())
                })?;
                self.state = SourceState::Connected;
                debug!(path = %self.device.path(), "Streaming stopped");
                self.requeue_all()
            }
        }
    }

    /// Stream-off hands every buffer back to us; give them to the device again
    fn requeue_all(&mut self) -> HalResult<()> {
        for index in 0..self.buffers.len() {
            self.device.queue_buffer(index as u32).map_err(|e| {
                error!(index, error = %e, "Could not re-queue buffer after stream off");
                HalError::RequeueFailed(format!("buffer {}: {}", index, e))
            })?;
            self.buffers[index].state = BufferState::Queued;
        }
        Ok(())
    }

    fn throttle(&self) {
        let (Some(limit), Some(last)) = (self.config.fps_limit, self.last_dequeue) else {
            return;
        };
        if limit == 0 {
            return;
        }
        let interval = Duration::from_secs(1) / limit;
        let elapsed = last.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }

    /// Wait for the device to complete a buffer and check it out
    pub fn read_lock(&mut self) -> HalResult<FrameLease> {
        if self.state != SourceState::Streaming {
            return Err(self.invalid_state("read lock"));
        }
        if self.checked_out.is_some() {
            return Err(HalError::FrameCheckedOut);
        }
        let resolution = self.negotiated.ok_or(HalError::NotInitialized)?;

        self.throttle();

        let readable = self
            .device
            .wait_readable(self.config.dequeue_timeout)
            .map_err(|e| {
                error!(error = %e, "Waiting for frame failed");
                HalError::DequeueError(e.to_string())
            })?;
        if !readable {
            warn!(timeout_ms = self.config.dequeue_timeout.as_millis() as u64, "Timed out waiting for frame");
            return Err(HalError::DequeueTimeout);
        }

        let DequeuedBuffer {
            index,
            bytes_used,
            sequence,
        } = match self.device.dequeue_buffer() {
            Ok(done) => done,
            Err(e) if is_not_ready(&e) => {
                debug!(error = %e, "No buffer ready");
                return Err(HalError::NotReady);
            }
            Err(e) => {
                error!(error = %e, "Dequeue failed");
                return Err(HalError::DequeueError(e.to_string()));
            }
        };

        let index = index as usize;
        let Some(buffer) = self.buffers.get_mut(index) else {
            error!(index, "Device returned unknown buffer index");
            return Err(HalError::DequeueError(format!("unknown buffer index {}", index)));
        };
        if buffer.state != BufferState::Queued {
            error!(index, "Device returned a buffer it did not own");
            return Err(HalError::DequeueError(format!(
                "buffer {} was not queued",
                index
            )));
        }

        buffer.state = BufferState::CheckedOut;
        self.checked_out = Some(index);
        self.generation = self.generation.wrapping_add(1);
        self.last_dequeue = Some(Instant::now());

        let frame_size = self.config.layout.frame_size(resolution);
        let bytes_used = match bytes_used as usize {
            0 => frame_size,
            n => n.min(buffer.mapping.as_slice().len()),
        };

        trace!(index, sequence, bytes_used, "Frame checked out");
        Ok(FrameLease {
            index,
            generation: self.generation,
            sequence,
            bytes_used,
            resolution,
            layout: self.config.layout,
        })
    }

    fn validate(&self, lease: &FrameLease) -> HalResult<()> {
        if self.checked_out == Some(lease.index) && self.generation == lease.generation {
            Ok(())
        } else {
            Err(HalError::NotCheckedOut)
        }
    }

    /// Packed pixel data of the checked-out frame
    pub fn frame_bytes(&self, lease: &FrameLease) -> HalResult<&[u8]> {
        self.validate(lease)?;
        let data = self.buffers[lease.index].mapping.as_slice();
        let needed = lease.layout.frame_size(lease.resolution);
        if data.len() < needed {
            return Err(HalError::InvalidBufferSize {
                needed,
                available: data.len(),
            });
        }
        Ok(&data[..needed])
    }

    /// Return a checked-out frame to the device queue.
    ///
    /// A lease that is not the current checkout is rejected without effect.
    pub fn unlock(&mut self, lease: &FrameLease) -> HalResult<()> {
        if let Err(e) = self.validate(lease) {
            warn!(index = lease.index, "Unlock of a buffer that is not checked out");
            return Err(e);
        }

        self.device.queue_buffer(lease.index as u32).map_err(|e| {
            error!(index = lease.index, error = %e, "Could not re-queue buffer");
            HalError::RequeueFailed(format!("buffer {}: {}", lease.index, e))
        })?;

        self.buffers[lease.index].state = BufferState::Queued;
        self.checked_out = None;
        trace!(index = lease.index, "Frame returned");
        Ok(())
    }
}

fn is_not_ready(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == Some(libc::EAGAIN)
        || err.raw_os_error() == Some(libc::EINVAL)
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if self.state == SourceState::Disconnected {
            return;
        }
        if self.state == SourceState::Streaming
            && let Err(e) = self.device.stream_off()
        {
            warn!(error = %e, "Stream off failed on drop");
        }
        self.teardown();
        debug!(path = %self.device.path(), "Frame source dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::synthetic::{SyntheticDevice, SyntheticStats};

    fn source(sizes: Vec<Resolution>) -> FrameSource {
        let device = SyntheticDevice::new(sizes, PixelLayout::Uyvy);
        FrameSource::new(Box::new(device), FrameSourceConfig::default())
    }

    #[test]
    fn test_connect_uses_first_enumerated_size() {
        let mut fs = source(vec![Resolution::new(640, 480), Resolution::new(320, 240)]);
        fs.connect().unwrap();
        assert_eq!(fs.state(), SourceState::Connected);
        assert_eq!(fs.resolution(), Some(Resolution::new(640, 480)));
        assert_eq!(fs.buffer_states(), vec![BufferState::Queued; 4]);
    }

    #[test]
    fn test_enumeration_caps_size() {
        let mut fs = source(vec![
            Resolution::new(3840, 2160),
            Resolution::new(1920, 1080),
            Resolution::new(1920, 1200),
        ]);
        assert_eq!(
            fs.available_resolutions().unwrap(),
            vec![Resolution::new(1920, 1080)]
        );
    }

    #[test]
    fn test_sensor_resolution_takes_max_per_axis() {
        let mut fs = source(vec![Resolution::new(1280, 720), Resolution::new(640, 960)]);
        assert_eq!(fs.sensor_resolution().unwrap(), Resolution::new(1280, 960));
    }

    #[test]
    fn test_stale_lease_rejected_after_reuse() {
        let mut fs = source(vec![Resolution::new(32, 8)]);
        fs.connect().unwrap();
        fs.set_streaming(true).unwrap();
        let first = fs.read_lock().unwrap();
        fs.unlock(&first).unwrap();
        assert_eq!(fs.unlock(&first), Err(HalError::NotCheckedOut));
        let second = fs.read_lock().unwrap();
        assert_eq!(fs.frame_bytes(&first).unwrap_err(), HalError::NotCheckedOut);
        fs.unlock(&second).unwrap();
    }

    #[test]
    fn test_drop_unmaps_everything() {
        let device = SyntheticDevice::new(vec![Resolution::new(32, 8)], PixelLayout::Uyvy);
        let stats = device.stats();
        let mut fs = FrameSource::new(Box::new(device), FrameSourceConfig::default());
        fs.connect().unwrap();
        fs.set_streaming(true).unwrap();
        assert_eq!(SyntheticStats::get(&stats.live_mappings), 4);
        drop(fs);
        assert_eq!(SyntheticStats::get(&stats.live_mappings), 0);
        assert_eq!(SyntheticStats::get(&stats.stream_off_calls), 1);
    }
}
