// SPDX-License-Identifier: GPL-3.0-only

//! HAL-wide constants

use std::time::Duration;

/// Number of memory-mapped buffers in the device ring
pub const DEFAULT_BUFFER_COUNT: u32 = 4;

/// Default capture device node
pub const DEFAULT_DEVICE_PATH: &str = "/dev/video0";

/// Default capture pixel format (packed 4:2:2, U Y0 V Y1)
pub const DEFAULT_PIXEL_FORMAT: &str = "UYVY";

/// Enumerated sizes above this width are dropped to cap buffer memory
pub const MAX_ENUMERATED_WIDTH: u32 = 1920;

/// Enumerated sizes above this height are dropped to cap buffer memory
pub const MAX_ENUMERATED_HEIGHT: u32 = 1080;

/// How long a read lock waits for the device to complete a buffer
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(5000);

/// How long a capture request waits on each output buffer's acquire fence
pub const FENCE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Number of row bands an RGBA conversion is split into
pub const CONVERSION_BAND_COUNT: usize = 30;

/// JPEG quality used when request settings carry none
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Marker written into the JPEG blob trailer
pub const JPEG_BLOB_ID: u16 = 0x00FF;

/// Size of the trailer at the end of every JPEG output buffer
/// (u16 id, 2 bytes padding, u32 size)
pub const JPEG_BLOB_TRAILER_SIZE: usize = 8;

/// Page granularity used when sizing JPEG buffers
pub const PAGE_SIZE: usize = 4096;

/// Samples kept by the frame rate counter
pub const FPS_COUNTER_SAMPLES: usize = 120;

/// Environment variable overriding the capture resolution (`WIDTHxHEIGHT`)
pub const RESOLUTION_OVERRIDE_ENV: &str = "CAMERA_HAL_RESOLUTION";

/// Environment variable pointing at an explicit config file
pub const CONFIG_PATH_ENV: &str = "CAMERA_HAL_CONFIG";

/// Maximum JPEG buffer size for a sensor of the given size
///
/// Budgets 9 bytes per pixel, adds the blob trailer and rounds up to a page.
pub fn jpeg_buffer_size(width: u32, height: u32) -> usize {
    let raw = width as usize * height as usize * 9 + JPEG_BLOB_TRAILER_SIZE;
    (raw + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}
