// SPDX-License-Identifier: GPL-3.0-only

//! Capture request orchestration
//!
//! [`Camera`] owns the frame source and the conversion pipeline and runs one
//! capture request at a time:
//!
//! ```text
//! settings check ─► shutter ─► read lock ─► per output buffer:
//!                                             fence wait ─► map ─► convert/copy/encode
//!                   result ◄─ stamp metadata ◄─ unlock frame ◄──────────┘
//! ```
//!
//! A request that fails after the frame was taken still returns the frame to
//! the source, so the next request finds the device usable.

pub mod buffer;
pub mod fence;
pub mod metadata;
pub mod request;
pub mod stats;

pub use buffer::{BufferMapping, GraphicBuffer, HeapBuffer};
pub use fence::{Fence, FenceSignal};
pub use metadata::{CameraMetadata, MetadataTag, MetadataValue};
pub use request::{
    BufferStatus, CaptureCallbacks, CaptureRequest, CaptureResult, Stream, StreamBuffer,
    StreamFormat, StreamType, usage,
};
pub use stats::{FpsCounter, SectionTimes};

use crate::backends::camera::{
    CaptureDevice, FrameLease, FrameSource, PixelLayout, Resolution, SourceState,
};
use crate::config::Config;
use crate::constants::{self, FPS_COUNTER_SAMPLES};
use crate::errors::{HalError, HalResult};
use crate::media::jpeg::{self, JpegOutcome};
use crate::media::{ConversionPipeline, WorkerPool};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Which way the sensor faces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    Back,
    Front,
    External,
}

/// Static description of the camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub device_path: String,
    pub facing: Facing,
    /// Clockwise rotation of the sensor image, in degrees
    pub orientation: u32,
    pub pixel_layout: PixelLayout,
    pub sensor_resolution: Resolution,
    pub available_resolutions: Vec<Resolution>,
    /// Size every JPEG output buffer must have
    pub jpeg_max_size: usize,
}

struct CameraState {
    source: FrameSource,
    pipeline: ConversionPipeline,
    callbacks: Option<Arc<dyn CaptureCallbacks>>,
    last_settings: Option<Arc<CameraMetadata>>,
    jpeg_buffer_size: usize,
    default_jpeg_quality: u8,
    fence_timeout: Duration,
    fps: FpsCounter,
    sections: SectionTimes,
}

/// One camera device: frame source, conversion pipeline and request state
pub struct Camera {
    state: Mutex<CameraState>,
}

/// Monotonic clock reading in nanoseconds
fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // CLOCK_MONOTONIC cannot fail with a valid pointer
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

impl Camera {
    pub fn new(device: Box<dyn CaptureDevice>, config: &Config) -> Self {
        let pool = match config.worker_threads {
            Some(n) => WorkerPool::with_threads(n),
            None => WorkerPool::new(),
        };
        Self {
            state: Mutex::new(CameraState {
                source: FrameSource::new(device, config.frame_source_config()),
                pipeline: ConversionPipeline::new(pool, config.conversion_bands),
                callbacks: None,
                last_settings: None,
                jpeg_buffer_size: 0,
                default_jpeg_quality: config.default_jpeg_quality,
                fence_timeout: Duration::from_millis(config.fence_timeout_ms),
                fps: FpsCounter::new(FPS_COUNTER_SAMPLES),
                sections: SectionTimes::new(FPS_COUNTER_SAMPLES),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CameraState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Describe the sensor; enumerates the device on first use
    pub fn camera_info(&self) -> HalResult<CameraInfo> {
        let mut state = self.lock();
        let available_resolutions = state.source.available_resolutions()?;
        let sensor_resolution = state.source.sensor_resolution()?;
        let jpeg_max_size =
            constants::jpeg_buffer_size(sensor_resolution.width, sensor_resolution.height);
        state.jpeg_buffer_size = jpeg_max_size;

        Ok(CameraInfo {
            device_path: state.source.device_path().to_string(),
            facing: Facing::Back,
            orientation: 0,
            pixel_layout: state.source.layout(),
            sensor_resolution,
            available_resolutions,
            jpeg_max_size,
        })
    }

    /// Connect the device and start the conversion workers
    pub fn open(&self) -> HalResult<()> {
        let mut state = self.lock();
        let state = &mut *state;

        if state.source.state() == SourceState::Disconnected {
            state.source.connect()?;
        }
        if !state.pipeline.is_running()
            && let Err(e) = state.pipeline.start()
        {
            error!(error = %e, "Could not start conversion workers");
            if let Err(e) = state.source.disconnect() {
                warn!(error = %e, "Disconnect after failed open");
            }
            return Err(e);
        }

        let sensor = state.source.sensor_resolution()?;
        state.jpeg_buffer_size = constants::jpeg_buffer_size(sensor.width, sensor.height);
        info!(
            path = %state.source.device_path(),
            resolution = ?state.source.resolution(),
            workers = state.pipeline.worker_count(),
            "Camera opened"
        );
        Ok(())
    }

    /// Stop the workers and disconnect the device
    pub fn close(&self) -> HalResult<()> {
        let mut state = self.lock();
        state.pipeline.stop();
        state.last_settings = None;
        if state.source.state() != SourceState::Disconnected {
            state.source.disconnect()?;
        }
        info!(path = %state.source.device_path(), "Camera closed");
        Ok(())
    }

    /// Register the client callbacks; required before any request
    pub fn initialize(&self, callbacks: Arc<dyn CaptureCallbacks>) {
        self.lock().callbacks = Some(callbacks);
    }

    /// Current capture resolution
    pub fn resolution(&self) -> Option<Resolution> {
        self.lock().source.resolution()
    }

    /// Required size of JPEG output buffers, once known
    pub fn jpeg_buffer_size(&self) -> usize {
        self.lock().jpeg_buffer_size
    }

    /// Average section timings of recent requests
    pub fn timing_summary(&self) -> String {
        self.lock().sections.summary()
    }

    /// Validate and adjust the client's streams, then restart capture at the
    /// size of the largest one.
    ///
    /// Returns the capture resolution in effect afterwards.
    pub fn configure_streams(&self, streams: &mut [Stream]) -> HalResult<Resolution> {
        if streams.is_empty() {
            return Err(HalError::NoStreams);
        }

        let inputs = streams
            .iter()
            .filter(|s| s.stream_type != StreamType::Output)
            .count();
        if inputs > 1 {
            error!(inputs, "Only one input/bidirectional stream allowed");
            return Err(HalError::MultipleInputStreamsRejected);
        }
        if let Some(zsl) = streams
            .iter()
            .find(|s| s.usage & usage::HW_CAMERA_ZSL == usage::HW_CAMERA_ZSL)
        {
            error!(width = zsl.width, height = zsl.height, "ZSL stream not supported");
            return Err(HalError::UnsupportedStreamUsage(format!(
                "zero shutter lag (usage {:#010x})",
                zsl.usage
            )));
        }

        let mut largest = Resolution::default();
        for stream in streams.iter_mut() {
            if stream.format == StreamFormat::ImplementationDefined {
                stream.format = StreamFormat::Rgba8888;
            }
            stream.usage = match stream.stream_type {
                StreamType::Output => usage::SW_WRITE_OFTEN,
                StreamType::Input => usage::SW_READ_OFTEN,
                StreamType::Bidirectional => usage::SW_WRITE_OFTEN | usage::SW_READ_OFTEN,
            };
            stream.max_buffers = 1;
            if stream.area() > largest.area() {
                largest = Resolution::new(stream.width, stream.height);
            }
            debug!(
                kind = ?stream.stream_type,
                format = ?stream.format,
                width = stream.width,
                height = stream.height,
                usage = stream.usage,
                "Configured stream"
            );
        }
        if largest.is_empty() {
            return Err(HalError::InvalidResolution(largest.to_string()));
        }

        let mut state = self.lock();
        state.source.set_streaming(false)?;
        match state.source.set_resolution(largest) {
            Ok(()) => {}
            Err(HalError::ResolutionChangeUnsupported) => {
                warn!(requested = %largest, current = ?state.source.resolution(), "Keeping current capture size");
            }
            Err(e) => return Err(e),
        }
        state.source.set_streaming(true)?;

        let resolution = state.source.resolution().ok_or(HalError::NotInitialized)?;
        info!(%resolution, streams = streams.len(), "Streams configured");
        Ok(resolution)
    }

    /// Run one capture request to completion.
    ///
    /// On success the result has already been delivered through the
    /// callbacks. On failure no result is delivered and the request's
    /// buffers are dropped.
    pub fn process_capture_request(&self, mut request: CaptureRequest) -> HalResult<()> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let callbacks = state.callbacks.clone().ok_or(HalError::NotInitialized)?;
        let timestamp = monotonic_ns();
        let frame_number = request.frame_number;
        state.fps.tick();

        trace!(
            frame = frame_number,
            outputs = request.output_buffers.len(),
            has_input = request.input_buffer.is_some(),
            fps = format!("{:.1}", state.fps.current()),
            "Capture request"
        );

        let mut settings = match request.settings.take() {
            Some(settings) => settings,
            None => match &state.last_settings {
                Some(cached) => CameraMetadata::clone(cached),
                None => {
                    error!(frame = frame_number, "First request does not have metadata");
                    return Err(HalError::MissingSettings);
                }
            },
        };

        if let Some(input) = request.input_buffer.as_mut() {
            debug!(frame = frame_number, "Ignoring input buffer");
            input.release_fence = Fence::None;
        }

        callbacks.notify_shutter(frame_number, timestamp);

        let lease = state
            .sections
            .time("lock", || state.source.read_lock())
            .inspect_err(|e| warn!(frame = frame_number, error = %e, "No frame for request"))?;

        let quality = settings
            .get_u8(MetadataTag::JpegQuality)
            .unwrap_or(state.default_jpeg_quality);
        let filled = fill_outputs(
            &state.source,
            &state.pipeline,
            &mut state.sections,
            &lease,
            &request.output_buffers,
            OutputParams {
                frame_number,
                quality,
                fence_timeout: state.fence_timeout,
            },
        );

        let unlocked = state
            .sections
            .time("unlock", || state.source.unlock(&lease));

        let statuses = match (filled, unlocked) {
            (Ok(statuses), Ok(())) => statuses,
            (Err(e), unlocked) => {
                if let Err(unlock_err) = unlocked {
                    error!(frame = frame_number, error = %unlock_err, "Unlock after failed request");
                }
                error!(frame = frame_number, error = %e, "Capture request aborted");
                return Err(e);
            }
            (Ok(_), Err(e)) => return Err(e),
        };

        for (buffer, status) in request.output_buffers.iter_mut().zip(statuses) {
            buffer.acquire_fence = Fence::None;
            buffer.release_fence = Fence::None;
            buffer.status = status;
        }

        settings.set(
            MetadataTag::SensorTimestamp,
            MetadataValue::I64(timestamp as i64),
        );
        settings.set(
            MetadataTag::SyncFrameNumber,
            MetadataValue::I64(frame_number as i64),
        );
        let metadata = Arc::new(settings);
        state.last_settings = Some(Arc::clone(&metadata));

        callbacks.process_capture_result(CaptureResult {
            frame_number,
            metadata,
            output_buffers: request.output_buffers,
        });

        debug!(
            frame = frame_number,
            fps = format!("{:.1}", state.fps.average()),
            times = %state.sections.summary(),
            "Capture request done"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct OutputParams {
    frame_number: u32,
    quality: u8,
    fence_timeout: Duration,
}

/// Write the checked-out frame into every output buffer.
///
/// Returns the per-buffer status. All mappings are released before
/// returning, on success and on abort alike.
fn fill_outputs(
    source: &FrameSource,
    pipeline: &ConversionPipeline,
    sections: &mut SectionTimes,
    lease: &FrameLease,
    outputs: &[StreamBuffer],
    params: OutputParams,
) -> HalResult<Vec<BufferStatus>> {
    let frame = source.frame_bytes(lease)?;
    let targets: Vec<Arc<dyn GraphicBuffer>> =
        outputs.iter().map(|b| Arc::clone(&b.buffer)).collect();
    let mut mappings: Vec<Box<dyn BufferMapping + '_>> = Vec::with_capacity(targets.len());
    let mut statuses = vec![BufferStatus::Ok; outputs.len()];
    // First RGBA output converted in this request, for reuse by same-size outputs
    let mut rgba_done: Option<(usize, Resolution)> = None;

    for (i, out) in outputs.iter().enumerate() {
        if !out.acquire_fence.wait(params.fence_timeout) {
            error!(
                frame = params.frame_number,
                buffer = i,
                "Wait on acquire fence timed out"
            );
            return Err(HalError::FenceTimeout {
                frame_number: params.frame_number,
                buffer: i,
            });
        }
        let mapping = targets[i].map().inspect_err(|e| {
            error!(frame = params.frame_number, buffer = i, error = %e, "Buffer lock failed")
        })?;
        mappings.push(mapping);

        let dst_res = Resolution::new(out.stream.width, out.stream.height);
        match out.stream.format {
            StreamFormat::Rgba8888 => match rgba_done {
                Some((prev, res)) if res == dst_res => {
                    let needed = dst_res.area() as usize * 4;
                    let (done, current) = mappings.split_at_mut(i);
                    let src = done[prev].bytes();
                    let dst = current[0].bytes_mut();
                    if dst.len() < needed {
                        return Err(HalError::InvalidBufferSize {
                            needed,
                            available: dst.len(),
                        });
                    }
                    sections.time("copy", || dst[..needed].copy_from_slice(&src[..needed]));
                }
                _ => {
                    let dst = mappings[i].bytes_mut();
                    sections.time("yuv->rgba", || {
                        pipeline.yuv422_to_rgba(frame, lease.layout, lease.resolution, dst, dst_res)
                    })?;
                    if rgba_done.is_none() {
                        rgba_done = Some((i, dst_res));
                    }
                }
            },
            StreamFormat::Blob => {
                let buf = mappings[i].bytes_mut();
                let capacity = jpeg::image_capacity(buf.len());
                let outcome = sections.time("yuv->jpeg", || {
                    pipeline.yuv422_to_jpeg(
                        frame,
                        lease.layout,
                        lease.resolution,
                        params.quality,
                        &mut buf[..capacity],
                    )
                })?;
                match outcome {
                    JpegOutcome::Written(len) => jpeg::write_blob_trailer(buf, len)?,
                    JpegOutcome::TooLarge { encoded_len } => {
                        error!(
                            frame = params.frame_number,
                            buffer = i,
                            encoded_len,
                            capacity,
                            "JPEG image too big"
                        );
                        // Unlike every other delivered buffer this one is not Ok:
                        // it holds no image and no trailer
                        statuses[i] = BufferStatus::Error;
                    }
                }
            }
            other => {
                warn!(
                    frame = params.frame_number,
                    buffer = i,
                    format = ?other,
                    "Unknown pixel format in buffer, ignoring"
                );
            }
        }
    }

    Ok(statuses)
}
