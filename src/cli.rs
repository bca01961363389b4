// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Listing capture devices
//! - Showing sensor information
//! - Capturing a single frame as JPEG and/or RGBA
//! - Streaming requests and reporting the frame rate

use crate::{CaptureFormat, DeviceArgs};
use camera_hal::backends::camera::v4l2_utils::discover_capture_devices;
use camera_hal::backends::camera::{
    CaptureDevice, PixelLayout, Resolution, SyntheticDevice, V4l2Device,
};
use camera_hal::media::jpeg::read_blob_trailer;
use camera_hal::pipelines::capture::{
    BufferStatus, Camera, CameraMetadata, CaptureCallbacks, CaptureRequest, CaptureResult,
    GraphicBuffer, HeapBuffer, MetadataTag, MetadataValue, Stream, StreamBuffer, StreamFormat,
};
use camera_hal::Config;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

/// Default folder name for saved captures
const DEFAULT_SAVE_FOLDER: &str = "camera-hal";

/// Sizes offered by the synthetic device
const SYNTHETIC_SIZES: [Resolution; 3] = [
    Resolution::new(1280, 720),
    Resolution::new(1920, 1080),
    Resolution::new(640, 480),
];

/// Forwards capture results to the calling thread
struct ChannelCallbacks {
    results: mpsc::Sender<CaptureResult>,
}

impl CaptureCallbacks for ChannelCallbacks {
    fn notify_shutter(&self, frame_number: u32, timestamp_ns: u64) {
        tracing::trace!(frame = frame_number, timestamp_ns, "Shutter");
    }

    fn process_capture_result(&self, result: CaptureResult) {
        // Receiver gone means the command is exiting
        let _ = self.results.send(result);
    }
}

fn open_device(args: &DeviceArgs, config: &Config) -> Box<dyn CaptureDevice> {
    if args.synthetic {
        Box::new(SyntheticDevice::new(
            SYNTHETIC_SIZES.to_vec(),
            config.pixel_layout(),
        ))
    } else {
        let path = args.device.clone().unwrap_or_else(|| config.device_path.clone());
        Box::new(V4l2Device::new(path))
    }
}

fn open_camera(
    args: &DeviceArgs,
) -> Result<(Camera, mpsc::Receiver<CaptureResult>), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let camera = Camera::new(open_device(args, &config), &config);
    camera.open()?;
    let (sender, receiver) = mpsc::channel();
    camera.initialize(Arc::new(ChannelCallbacks { results: sender }));
    Ok((camera, receiver))
}

/// List all V4L2 capture devices
pub fn list_devices() -> Result<(), Box<dyn std::error::Error>> {
    let devices = discover_capture_devices();

    if devices.is_empty() {
        println!("No capture devices found.");
        return Ok(());
    }

    println!("Available capture devices:");
    println!();
    for info in &devices {
        println!("  {}  {} ({})", info.path, info.card, info.driver);
        if info.real_path != info.path {
            println!("      Node: {}", info.real_path);
        }

        let mut device = V4l2Device::new(info.path.clone());
        for layout in [PixelLayout::Uyvy, PixelLayout::Yuyv] {
            let sizes = device.enumerate_frame_sizes(layout.fourcc()).unwrap_or_default();
            if sizes.is_empty() {
                continue;
            }
            let sizes: Vec<String> = sizes.iter().map(|s| s.to_string()).collect();
            println!("      {}: {}", layout, sizes.join(", "));
        }
        println!();
    }

    Ok(())
}

/// Print sensor information
pub fn show_info(args: &DeviceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let camera = Camera::new(open_device(args, &config), &config);
    let info = camera.camera_info()?;

    println!("Device:       {}", info.device_path);
    println!("Facing:       {:?}", info.facing);
    println!("Orientation:  {}°", info.orientation);
    println!("Pixel format: {}", info.pixel_layout);
    println!("Sensor size:  {}", info.sensor_resolution);
    let sizes: Vec<String> = info
        .available_resolutions
        .iter()
        .map(|r| r.to_string())
        .collect();
    println!("Resolutions:  {}", sizes.join(", "));
    println!("JPEG buffer:  {} bytes", info.jpeg_max_size);
    Ok(())
}

/// Capture one frame and save it
pub fn capture(
    args: &DeviceArgs,
    format: CaptureFormat,
    size: Option<(u32, u32)>,
    quality: Option<u8>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (camera, results) = open_camera(args)?;
    let info = camera.camera_info()?;

    let resolution = match size {
        Some((width, height)) => Resolution::new(width, height),
        None => *info
            .available_resolutions
            .first()
            .ok_or("No resolutions available")?,
    };
    println!("Using device: {}", info.device_path);
    println!("Capture size: {}", resolution);

    let want_jpeg = matches!(format, CaptureFormat::Jpeg | CaptureFormat::Both);
    let want_rgba = matches!(format, CaptureFormat::Rgba | CaptureFormat::Both);

    let mut streams = Vec::new();
    if want_rgba {
        streams.push(Stream::output(
            StreamFormat::Rgba8888,
            resolution.width,
            resolution.height,
        ));
    }
    if want_jpeg {
        streams.push(Stream::output(
            StreamFormat::Blob,
            resolution.width,
            resolution.height,
        ));
    }
    let captured = camera.configure_streams(&mut streams)?;
    if captured != resolution {
        println!("Device captures at {}, outputs are scaled", captured);
    }

    let mut settings = CameraMetadata::new();
    if let Some(quality) = quality {
        settings.set(MetadataTag::JpegQuality, MetadataValue::U8(quality));
    }

    let mut request = CaptureRequest::new(0, Some(settings));
    let mut buffers: Vec<(Stream, Arc<HeapBuffer>)> = Vec::new();
    for stream in &streams {
        let len = match stream.format {
            StreamFormat::Blob => camera.jpeg_buffer_size(),
            _ => stream.area() as usize * 4,
        };
        let buffer = Arc::new(HeapBuffer::new(len));
        buffers.push((stream.clone(), Arc::clone(&buffer)));
        request = request.with_output(StreamBuffer::new(
            stream.clone(),
            buffer as Arc<dyn GraphicBuffer>,
        ));
    }

    println!("Capturing...");
    camera.process_capture_request(request)?;
    let result = results.recv_timeout(Duration::from_secs(5))?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let base = match output {
        Some(path) => path,
        None => {
            let dir = get_default_capture_dir();
            std::fs::create_dir_all(&dir)?;
            dir.join(format!("capture_{}", timestamp))
        }
    };

    for ((stream, buffer), out) in buffers.iter().zip(&result.output_buffers) {
        if out.status == BufferStatus::Error {
            eprintln!("Output {:?} failed", stream.format);
            continue;
        }
        let data = buffer.snapshot();
        match stream.format {
            StreamFormat::Blob => {
                let len = read_blob_trailer(&data).ok_or("JPEG buffer has no valid trailer")?;
                let path = base.with_extension("jpg");
                std::fs::write(&path, &data[..len])?;
                println!("JPEG saved: {} ({} bytes)", path.display(), len);
            }
            _ => {
                let path = base.with_extension("png");
                save_rgba(&path, data, stream)?;
                println!("RGBA saved: {}", path.display());
            }
        }
    }

    camera.close()?;
    Ok(())
}

/// Write an RGBA output buffer as PNG at its stream's size
fn save_rgba(path: &Path, data: Vec<u8>, stream: &Stream) -> Result<(), Box<dyn std::error::Error>> {
    let image = image::RgbaImage::from_raw(stream.width, stream.height, data)
        .ok_or("RGBA buffer does not match stream size")?;
    image.save(path)?;
    Ok(())
}

/// Issue capture requests until the frame count is reached or Ctrl+C
pub fn stream(args: &DeviceArgs, frames: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let (camera, results) = open_camera(args)?;
    let info = camera.camera_info()?;
    let resolution = *info
        .available_resolutions
        .first()
        .ok_or("No resolutions available")?;

    let mut streams = vec![Stream::output(
        StreamFormat::Rgba8888,
        resolution.width,
        resolution.height,
    )];
    let resolution = camera.configure_streams(&mut streams)?;
    let buffer: Arc<dyn GraphicBuffer> =
        Arc::new(HeapBuffer::new(resolution.area() as usize * 4));

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = Arc::clone(&stop_flag);
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    println!("Streaming {} from {}", resolution, info.device_path);
    println!("Press Ctrl+C to stop");

    let start = Instant::now();
    let mut last_report = Instant::now();
    let mut reported_frames = 0u64;
    let mut frame_number = 0u32;
    let mut settings = Some(CameraMetadata::new());

    while !stop_flag.load(Ordering::SeqCst) {
        if frames.is_some_and(|n| u64::from(frame_number) >= n) {
            break;
        }

        let request = CaptureRequest::new(frame_number, settings.take()).with_output(
            StreamBuffer::new(streams[0].clone(), Arc::clone(&buffer)),
        );
        match camera.process_capture_request(request) {
            Ok(()) => {
                // Dropping the result releases the buffer for the next request
                drop(results.recv_timeout(Duration::from_secs(5))?);
            }
            Err(e) if e.is_not_ready() => {
                tracing::warn!(error = %e, "Frame not ready");
                continue;
            }
            Err(e) => return Err(e.into()),
        }
        frame_number = frame_number.wrapping_add(1);

        if last_report.elapsed() >= Duration::from_secs(1) {
            let done = u64::from(frame_number) - reported_frames;
            let fps = done as f64 / last_report.elapsed().as_secs_f64();
            println!("{:6} frames  {:5.1} fps", frame_number, fps);
            reported_frames = u64::from(frame_number);
            last_report = Instant::now();
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    if elapsed > 0.0 {
        println!(
            "{} frames in {:.1}s ({:.1} fps avg)",
            frame_number,
            elapsed,
            frame_number as f64 / elapsed
        );
    }
    println!("Timing: {}", camera.timing_summary());
    camera.close()?;
    Ok(())
}

/// Get default capture directory
fn get_default_capture_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_saved_at_stream_size_when_capture_is_larger() {
        let device = SyntheticDevice::new(
            vec![Resolution::new(128, 96), Resolution::new(64, 48)],
            PixelLayout::Uyvy,
        );
        let config = Config {
            worker_threads: Some(2),
            ..Config::default()
        };
        let camera = Camera::new(Box::new(device), &config);
        camera.open().unwrap();
        let (sender, results) = mpsc::channel();
        camera.initialize(Arc::new(ChannelCallbacks { results: sender }));

        // The JPEG stream drives the capture size above the RGBA stream's
        let mut streams = vec![
            Stream::output(StreamFormat::Rgba8888, 64, 48),
            Stream::output(StreamFormat::Blob, 128, 96),
        ];
        let captured = camera.configure_streams(&mut streams).unwrap();
        assert_eq!(captured, Resolution::new(128, 96));

        let rgba = &streams[0];
        let buffer = Arc::new(HeapBuffer::new(rgba.area() as usize * 4));
        let request = CaptureRequest::new(0, Some(CameraMetadata::new())).with_output(
            StreamBuffer::new(rgba.clone(), buffer.clone() as Arc<dyn GraphicBuffer>),
        );
        camera.process_capture_request(request).unwrap();
        let result = results.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.output_buffers[0].status, BufferStatus::Ok);

        let path = std::env::temp_dir().join(format!("camera-hal-cli-{}.png", std::process::id()));
        save_rgba(&path, buffer.snapshot(), rgba).unwrap();

        let saved = image::open(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!((saved.width(), saved.height()), (64, 48));
    }

    #[test]
    fn test_rgba_size_mismatch_rejected() {
        let stream = Stream::output(StreamFormat::Rgba8888, 64, 48);
        let path = std::env::temp_dir().join("camera-hal-cli-mismatch.png");
        assert!(save_rgba(&path, vec![0; 16], &stream).is_err());
    }
}
