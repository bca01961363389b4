// SPDX-License-Identifier: MPL-2.0

//! Integration tests for stream configuration and capture requests

use camera_hal::backends::camera::{PixelLayout, Resolution, SyntheticDevice};
use camera_hal::media::jpeg::read_blob_trailer;
use camera_hal::pipelines::capture::{
    BufferStatus, Camera, CameraMetadata, CaptureCallbacks, CaptureRequest, CaptureResult, Fence,
    FenceSignal, GraphicBuffer, HeapBuffer, MetadataTag, MetadataValue, Stream, StreamBuffer,
    StreamFormat, StreamType, usage,
};
use camera_hal::{Config, HalError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

enum Event {
    Shutter { frame: u32, timestamp: u64 },
    Result(CaptureResult),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl CaptureCallbacks for Recorder {
    fn notify_shutter(&self, frame_number: u32, timestamp_ns: u64) {
        self.events.lock().unwrap().push(Event::Shutter {
            frame: frame_number,
            timestamp: timestamp_ns,
        });
    }

    fn process_capture_result(&self, result: CaptureResult) {
        self.events.lock().unwrap().push(Event::Result(result));
    }
}

impl Recorder {
    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    fn results(&self) -> Vec<CaptureResult> {
        self.take()
            .into_iter()
            .filter_map(|e| match e {
                Event::Result(r) => Some(r),
                Event::Shutter { .. } => None,
            })
            .collect()
    }
}

fn test_config() -> Config {
    Config {
        worker_threads: Some(2),
        conversion_bands: 4,
        dequeue_timeout_ms: 100,
        fence_timeout_ms: 50,
        ..Config::default()
    }
}

fn open_camera(sizes: Vec<Resolution>) -> (Camera, Arc<Recorder>) {
    let device = SyntheticDevice::new(sizes, PixelLayout::Uyvy);
    let camera = Camera::new(Box::new(device), &test_config());
    camera.open().unwrap();
    let recorder = Arc::new(Recorder::default());
    camera.initialize(recorder.clone());
    (camera, recorder)
}

fn small_camera() -> (Camera, Arc<Recorder>, Stream) {
    let (camera, recorder) = open_camera(vec![Resolution::new(64, 48)]);
    let mut streams = vec![Stream::output(StreamFormat::Rgba8888, 64, 48)];
    camera.configure_streams(&mut streams).unwrap();
    let stream = streams.remove(0);
    (camera, recorder, stream)
}

fn output(stream: &Stream, len: usize) -> (Arc<HeapBuffer>, StreamBuffer) {
    let buffer = Arc::new(HeapBuffer::new(len));
    let entry = StreamBuffer::new(stream.clone(), buffer.clone() as Arc<dyn GraphicBuffer>);
    (buffer, entry)
}

fn settings() -> CameraMetadata {
    let mut settings = CameraMetadata::new();
    settings
        .set(MetadataTag::ControlMode, MetadataValue::U8(1))
        .set(MetadataTag::JpegQuality, MetadataValue::U8(85));
    settings
}

#[test]
fn test_rgba_and_jpeg_request_uses_largest_stream() {
    let (camera, recorder) = open_camera(vec![
        Resolution::new(1280, 720),
        Resolution::new(1920, 1080),
        Resolution::new(640, 480),
    ]);
    assert_eq!(camera.resolution(), Some(Resolution::new(1280, 720)));

    let mut streams = vec![
        Stream::output(StreamFormat::Rgba8888, 1280, 720),
        Stream::output(StreamFormat::Blob, 1920, 1080),
    ];
    let selected = camera.configure_streams(&mut streams).unwrap();
    assert_eq!(selected, Resolution::new(1920, 1080));
    assert_eq!(camera.resolution(), Some(Resolution::new(1920, 1080)));

    let (rgba, rgba_entry) = output(&streams[0], 1280 * 720 * 4);
    let (jpeg, jpeg_entry) = output(&streams[1], camera.jpeg_buffer_size());
    let request = CaptureRequest::new(0, Some(settings()))
        .with_output(rgba_entry)
        .with_output(jpeg_entry);
    camera.process_capture_request(request).unwrap();

    let results = recorder.results();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.frame_number, 0);
    assert!(
        result
            .output_buffers
            .iter()
            .all(|b| b.status == BufferStatus::Ok)
    );

    // Top-left pixel of the colour bars is white
    let pixels = rgba.snapshot();
    assert_eq!(&pixels[..4], &[255, 255, 255, 255]);

    let blob = jpeg.snapshot();
    let len = read_blob_trailer(&blob).unwrap();
    assert!(len > 0);
    assert_eq!(&blob[..2], &[0xFF, 0xD8]);
    let decoded = image::load_from_memory(&blob[..len]).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (1920, 1080));
}

#[test]
fn test_configure_streams_adjusts_streams() {
    let (camera, _recorder) = open_camera(vec![Resolution::new(64, 48), Resolution::new(32, 24)]);
    let mut streams = vec![
        Stream::output(StreamFormat::ImplementationDefined, 32, 24),
        Stream {
            stream_type: StreamType::Input,
            ..Stream::output(StreamFormat::Rgba8888, 32, 24)
        },
    ];
    let selected = camera.configure_streams(&mut streams).unwrap();
    assert_eq!(selected, Resolution::new(32, 24));

    assert_eq!(streams[0].format, StreamFormat::Rgba8888);
    assert_eq!(streams[0].usage, usage::SW_WRITE_OFTEN);
    assert_eq!(streams[1].usage, usage::SW_READ_OFTEN);
    assert!(streams.iter().all(|s| s.max_buffers == 1));
}

#[test]
fn test_configure_streams_rejections() {
    let (camera, _recorder) = open_camera(vec![Resolution::new(64, 48)]);

    assert_eq!(camera.configure_streams(&mut []), Err(HalError::NoStreams));

    let input = Stream {
        stream_type: StreamType::Input,
        ..Stream::output(StreamFormat::Rgba8888, 64, 48)
    };
    let bidirectional = Stream {
        stream_type: StreamType::Bidirectional,
        ..input.clone()
    };
    assert_eq!(
        camera.configure_streams(&mut [input, bidirectional]),
        Err(HalError::MultipleInputStreamsRejected)
    );

    let zsl = Stream {
        usage: usage::HW_CAMERA_ZSL,
        ..Stream::output(StreamFormat::Rgba8888, 64, 48)
    };
    assert!(matches!(
        camera.configure_streams(&mut [zsl]),
        Err(HalError::UnsupportedStreamUsage(_))
    ));
}

#[test]
fn test_settings_are_reused_when_omitted() {
    let (camera, recorder, stream) = small_camera();

    let (_, first) = output(&stream, 64 * 48 * 4);
    camera
        .process_capture_request(CaptureRequest::new(0, Some(settings())).with_output(first))
        .unwrap();
    thread::sleep(Duration::from_millis(2));
    let (_, second) = output(&stream, 64 * 48 * 4);
    camera
        .process_capture_request(CaptureRequest::new(1, None).with_output(second))
        .unwrap();

    let results = recorder.results();
    assert_eq!(results.len(), 2);
    let a: &CameraMetadata = &results[0].metadata;
    let b: &CameraMetadata = &results[1].metadata;
    assert_eq!(a.get_i64(MetadataTag::SyncFrameNumber), Some(0));
    assert_eq!(b.get_i64(MetadataTag::SyncFrameNumber), Some(1));
    assert!(
        b.get_i64(MetadataTag::SensorTimestamp).unwrap()
            > a.get_i64(MetadataTag::SensorTimestamp).unwrap()
    );

    let strip = |m: &CameraMetadata| {
        let mut m = m.clone();
        m.remove(MetadataTag::SensorTimestamp);
        m.remove(MetadataTag::SyncFrameNumber);
        m
    };
    assert_eq!(strip(a), strip(b));
    assert_eq!(strip(a), settings());
}

#[test]
fn test_first_request_without_settings_fails() {
    let (camera, recorder, stream) = small_camera();
    let (_, entry) = output(&stream, 64 * 48 * 4);
    assert_eq!(
        camera.process_capture_request(CaptureRequest::new(0, None).with_output(entry)),
        Err(HalError::MissingSettings)
    );
    // Nothing was delivered, not even a shutter
    assert!(recorder.take().is_empty());
}

#[test]
fn test_request_before_initialize_fails() {
    let device = SyntheticDevice::new(vec![Resolution::new(64, 48)], PixelLayout::Uyvy);
    let camera = Camera::new(Box::new(device), &test_config());
    camera.open().unwrap();
    assert_eq!(
        camera.process_capture_request(CaptureRequest::new(0, Some(settings()))),
        Err(HalError::NotInitialized)
    );
}

#[test]
fn test_shutter_precedes_result() {
    let (camera, recorder, stream) = small_camera();
    for frame in 0..3 {
        let (_, entry) = output(&stream, 64 * 48 * 4);
        camera
            .process_capture_request(CaptureRequest::new(frame, Some(settings())).with_output(entry))
            .unwrap();
    }

    let events = recorder.take();
    assert_eq!(events.len(), 6);
    for (frame, pair) in events.chunks(2).enumerate() {
        match pair {
            [Event::Shutter { frame: f, timestamp }, Event::Result(result)] => {
                assert_eq!(*f, frame as u32);
                assert_eq!(result.frame_number, frame as u32);
                assert_eq!(
                    result.metadata.get_i64(MetadataTag::SensorTimestamp),
                    Some(*timestamp as i64)
                );
            }
            _ => panic!("events out of order for frame {}", frame),
        }
    }
}

#[test]
fn test_fence_timeout_still_returns_frame() {
    let (camera, recorder, stream) = small_camera();

    let (_, entry) = output(&stream, 64 * 48 * 4);
    let never = FenceSignal::new();
    let request = CaptureRequest::new(5, Some(settings()))
        .with_output(entry.with_acquire_fence(Fence::Signal(never)));
    assert_eq!(
        camera.process_capture_request(request),
        Err(HalError::FenceTimeout {
            frame_number: 5,
            buffer: 0
        })
    );
    assert!(recorder.results().is_empty());

    // The frame went back to the device; later requests still work
    for frame in 6..10 {
        let (_, entry) = output(&stream, 64 * 48 * 4);
        camera
            .process_capture_request(CaptureRequest::new(frame, Some(settings())).with_output(entry))
            .unwrap();
    }
    assert_eq!(recorder.results().len(), 4);
}

#[test]
fn test_fence_signalled_from_another_thread() {
    let (camera, recorder, stream) = small_camera();
    let signal = FenceSignal::new();
    let (buffer, entry) = output(&stream, 64 * 48 * 4);
    let request = CaptureRequest::new(0, Some(settings()))
        .with_output(entry.with_acquire_fence(Fence::Signal(signal.clone())));

    let signaller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        signal.signal();
    });
    camera.process_capture_request(request).unwrap();
    signaller.join().unwrap();

    let results = recorder.results();
    assert_eq!(results.len(), 1);
    assert!(results[0].output_buffers[0].acquire_fence.is_none());
    assert_eq!(&buffer.snapshot()[..4], &[255, 255, 255, 255]);
}

#[test]
fn test_unknown_format_is_skipped() {
    let (camera, recorder, stream) = small_camera();
    let odd = Stream::output(StreamFormat::Other(0x23), 64, 48);
    let (untouched, odd_entry) = output(&odd, 128);
    let (rgba, rgba_entry) = output(&stream, 64 * 48 * 4);

    camera
        .process_capture_request(
            CaptureRequest::new(0, Some(settings()))
                .with_output(odd_entry)
                .with_output(rgba_entry),
        )
        .unwrap();

    let results = recorder.results();
    assert!(
        results[0]
            .output_buffers
            .iter()
            .all(|b| b.status == BufferStatus::Ok)
    );
    assert!(untouched.snapshot().iter().all(|b| *b == 0));
    assert_eq!(&rgba.snapshot()[..4], &[255, 255, 255, 255]);
}

#[test]
fn test_same_size_rgba_outputs_are_identical() {
    let (camera, recorder, stream) = small_camera();
    let (a, a_entry) = output(&stream, 64 * 48 * 4);
    let (b, b_entry) = output(&stream, 64 * 48 * 4);
    camera
        .process_capture_request(
            CaptureRequest::new(0, Some(settings()))
                .with_output(a_entry)
                .with_output(b_entry),
        )
        .unwrap();
    assert_eq!(recorder.results().len(), 1);
    assert_eq!(a.snapshot(), b.snapshot());
    assert!(a.snapshot().iter().any(|v| *v != 0));
}

#[test]
fn test_jpeg_too_large_marks_buffer_error() {
    let (camera, recorder, stream) = small_camera();
    let blob = Stream::output(StreamFormat::Blob, 64, 48);
    let (tiny, blob_entry) = output(&blob, 64);
    let (_, rgba_entry) = output(&stream, 64 * 48 * 4);
    camera
        .process_capture_request(
            CaptureRequest::new(0, Some(settings()))
                .with_output(blob_entry)
                .with_output(rgba_entry),
        )
        .unwrap();

    let results = recorder.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].output_buffers[0].status, BufferStatus::Error);
    // The other output of the same request is still delivered as Ok
    assert_eq!(results[0].output_buffers[1].status, BufferStatus::Ok);
    // Nothing, not even a trailer, was written into the small buffer
    assert!(tiny.snapshot().iter().all(|b| *b == 0));
    assert_eq!(read_blob_trailer(&tiny.snapshot()), None);
}

#[test]
fn test_jpeg_quality_follows_settings() {
    let (camera, recorder, _) = small_camera();
    let blob = Stream::output(StreamFormat::Blob, 64, 48);
    let mut sizes = Vec::new();
    for (frame, quality) in [(0u32, 10u8), (1, 100)] {
        let (buffer, entry) = output(&blob, camera.jpeg_buffer_size());
        let mut request_settings = settings();
        request_settings.set(MetadataTag::JpegQuality, MetadataValue::U8(quality));
        camera
            .process_capture_request(
                CaptureRequest::new(frame, Some(request_settings)).with_output(entry),
            )
            .unwrap();
        sizes.push(read_blob_trailer(&buffer.snapshot()).unwrap());
    }
    assert_eq!(recorder.results().len(), 2);
    assert!(sizes[0] < sizes[1], "quality 10 gave {} bytes, 100 gave {}", sizes[0], sizes[1]);
}

#[test]
fn test_close_and_reopen() {
    let (camera, recorder, stream) = small_camera();
    camera.close().unwrap();
    camera.open().unwrap();
    let mut streams = vec![stream.clone()];
    camera.configure_streams(&mut streams).unwrap();

    // Cached settings do not survive a close
    let (_, entry) = output(&stream, 64 * 48 * 4);
    assert_eq!(
        camera.process_capture_request(CaptureRequest::new(0, None).with_output(entry)),
        Err(HalError::MissingSettings)
    );
    let (_, entry) = output(&stream, 64 * 48 * 4);
    camera
        .process_capture_request(CaptureRequest::new(1, Some(settings())).with_output(entry))
        .unwrap();
    assert_eq!(recorder.results().len(), 1);
}

#[test]
fn test_fence_timeout_releases_earlier_mappings() {
    let (camera, recorder, stream) = small_camera();

    let (first, first_entry) = output(&stream, 64 * 48 * 4);
    let (_, second_entry) = output(&stream, 64 * 48 * 4);
    let never = FenceSignal::new();
    let request = CaptureRequest::new(3, Some(settings()))
        .with_output(first_entry)
        .with_output(second_entry.with_acquire_fence(Fence::Signal(never)));
    assert_eq!(
        camera.process_capture_request(request),
        Err(HalError::FenceTimeout {
            frame_number: 3,
            buffer: 1
        })
    );

    // Buffer 0 was mapped and written before the abort; its mapping is gone
    assert!(first.map().is_ok());
    assert!(first.snapshot().iter().any(|v| *v != 0));
    assert!(recorder.results().is_empty());

    let (_, entry) = output(&stream, 64 * 48 * 4);
    camera
        .process_capture_request(CaptureRequest::new(4, Some(settings())).with_output(entry))
        .unwrap();
    assert_eq!(recorder.results().len(), 1);
}

#[test]
fn test_map_failure_aborts_request() {
    let (camera, recorder, stream) = small_camera();

    // Same buffer twice: the second map finds it already mapped
    let shared = Arc::new(HeapBuffer::new(64 * 48 * 4));
    let request = CaptureRequest::new(0, Some(settings()))
        .with_output(StreamBuffer::new(stream.clone(), shared.clone()))
        .with_output(StreamBuffer::new(stream.clone(), shared.clone()));
    assert!(matches!(
        camera.process_capture_request(request),
        Err(HalError::BufferMapFailed(_))
    ));
    assert!(recorder.results().is_empty());
    assert!(shared.map().is_ok());

    // A mapping held by the client fails the request the same way
    let (held, entry) = output(&stream, 64 * 48 * 4);
    let mapping = held.map().unwrap();
    assert!(matches!(
        camera.process_capture_request(CaptureRequest::new(1, Some(settings())).with_output(entry)),
        Err(HalError::BufferMapFailed(_))
    ));
    drop(mapping);

    // The frame went back each time; the device is still usable
    for frame in 2..7 {
        let (_, entry) = output(&stream, 64 * 48 * 4);
        camera
            .process_capture_request(CaptureRequest::new(frame, Some(settings())).with_output(entry))
            .unwrap();
    }
    assert_eq!(recorder.results().len(), 5);
}
