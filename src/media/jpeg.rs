// SPDX-License-Identifier: GPL-3.0-only

//! JPEG output buffers
//!
//! A JPEG destination buffer is sized for the worst case and ends with a
//! fixed 8-byte trailer that tells the consumer how many leading bytes are
//! the actual image:
//!
//! ```text
//! ┌──────────────────────────────┬─────────┬─────┬──────────┐
//! │ JPEG bytes ... (unused tail) │ id u16  │ pad │ size u32 │
//! └──────────────────────────────┴─────────┴─────┴──────────┘
//!                                 ◄──── 8 bytes, LE ───────►
//! ```

use crate::backends::camera::types::Resolution;
use crate::constants::{JPEG_BLOB_ID, JPEG_BLOB_TRAILER_SIZE};
use crate::errors::{HalError, HalResult};

/// Result of writing an encoded image into a bounded buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpegOutcome {
    /// Image written; the value is its length in bytes
    Written(usize),
    /// Image did not fit; nothing was written
    TooLarge { encoded_len: usize },
}

impl JpegOutcome {
    pub fn written(&self) -> Option<usize> {
        match self {
            JpegOutcome::Written(len) => Some(*len),
            JpegOutcome::TooLarge { .. } => None,
        }
    }
}

/// Baseline-encode a packed RGB8 image; quality is clamped to 1..=100
pub fn encode_rgb(rgb: &[u8], resolution: Resolution, quality: u8) -> HalResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder
        .encode(
            rgb,
            resolution.width,
            resolution.height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| HalError::EncodeFailed(e.to_string()))?;
    Ok(buffer)
}

/// Copy `jpeg` to the start of `dst` if it fits
pub fn write_bounded(jpeg: &[u8], dst: &mut [u8]) -> JpegOutcome {
    if jpeg.len() > dst.len() {
        return JpegOutcome::TooLarge {
            encoded_len: jpeg.len(),
        };
    }
    dst[..jpeg.len()].copy_from_slice(jpeg);
    JpegOutcome::Written(jpeg.len())
}

/// Bytes of `buffer_len` usable for the image itself
pub fn image_capacity(buffer_len: usize) -> usize {
    buffer_len.saturating_sub(JPEG_BLOB_TRAILER_SIZE)
}

/// Stamp the trailer into the last 8 bytes of `buffer`
pub fn write_blob_trailer(buffer: &mut [u8], jpeg_size: usize) -> HalResult<()> {
    if buffer.len() < JPEG_BLOB_TRAILER_SIZE {
        return Err(HalError::InvalidBufferSize {
            needed: JPEG_BLOB_TRAILER_SIZE,
            available: buffer.len(),
        });
    }
    let size = u32::try_from(jpeg_size).map_err(|_| HalError::EncodeTooLarge {
        encoded: jpeg_size,
        capacity: u32::MAX as usize,
    })?;
    let start = buffer.len() - JPEG_BLOB_TRAILER_SIZE;
    let trailer = &mut buffer[start..];
    trailer[0..2].copy_from_slice(&JPEG_BLOB_ID.to_le_bytes());
    trailer[2..4].fill(0);
    trailer[4..8].copy_from_slice(&size.to_le_bytes());
    Ok(())
}

/// Image length recorded in a buffer's trailer, if the trailer is valid
pub fn read_blob_trailer(buffer: &[u8]) -> Option<usize> {
    let start = buffer.len().checked_sub(JPEG_BLOB_TRAILER_SIZE)?;
    let trailer = &buffer[start..];
    let id = u16::from_le_bytes([trailer[0], trailer[1]]);
    if id != JPEG_BLOB_ID {
        return None;
    }
    let size = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]) as usize;
    (size <= start).then_some(size)
}
