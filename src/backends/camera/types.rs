// SPDX-License-Identifier: GPL-3.0-only
// Shared types for the capture device and frame source

//! Shared types for camera backends

use crate::errors::HalError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use v4l::FourCC;

/// Frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True if either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True if both dimensions are within `max`
    pub fn fits_within(&self, max: Resolution) -> bool {
        self.width <= max.width && self.height <= max.height
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = HalError;

    /// Parse `WIDTHxHEIGHT` (e.g. `1280x720`); both parts must be nonzero decimals
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HalError::InvalidResolution(s.to_string());
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        let res = Resolution::new(width, height);
        if res.is_empty() {
            return Err(invalid());
        }
        Ok(res)
    }
}

/// Packed 4:2:2 layouts the device can deliver
///
/// Both carry two pixels per 4-byte group sharing one U and one V sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelLayout {
    /// U Y0 V Y1
    #[default]
    Uyvy,
    /// Y0 U Y1 V (a.k.a. YUY2)
    Yuyv,
}

impl PixelLayout {
    /// Bytes per pixel in the packed source
    pub const BYTES_PER_PIXEL: usize = 2;

    /// V4L2 FourCC for this layout
    pub fn fourcc(&self) -> FourCC {
        match self {
            PixelLayout::Uyvy => FourCC::new(b"UYVY"),
            PixelLayout::Yuyv => FourCC::new(b"YUYV"),
        }
    }

    /// Map a V4L2 FourCC back to a layout
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"UYVY" => Some(PixelLayout::Uyvy),
            b"YUYV" | b"YUY2" => Some(PixelLayout::Yuyv),
            _ => None,
        }
    }

    /// Byte offsets of (Y0, U, Y1, V) inside a 4-byte group
    pub fn offsets(&self) -> [usize; 4] {
        match self {
            PixelLayout::Uyvy => [1, 0, 3, 2],
            PixelLayout::Yuyv => [0, 1, 2, 3],
        }
    }

    /// Size of one packed frame
    pub fn frame_size(&self, resolution: Resolution) -> usize {
        resolution.area() as usize * Self::BYTES_PER_PIXEL
    }
}

impl std::fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelLayout::Uyvy => write!(f, "UYVY"),
            PixelLayout::Yuyv => write!(f, "YUYV"),
        }
    }
}

impl FromStr for PixelLayout {
    type Err = HalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UYVY" => Ok(PixelLayout::Uyvy),
            "YUYV" | "YUY2" => Ok(PixelLayout::Yuyv),
            other => Err(HalError::UnsupportedPixelFormat(other.to_string())),
        }
    }
}

/// Render a FourCC as text, replacing non-printable bytes
pub fn fourcc_to_string(fourcc: FourCC) -> String {
    fourcc
        .repr
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}

/// Device information from V4L2 capability
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    /// Name of the device (V4L2 card)
    pub card: String,
    /// Driver name (V4L2 driver)
    pub driver: String,
    /// Device path (e.g., /dev/video0)
    pub path: String,
    /// Real device path (resolved symlinks)
    pub real_path: String,
}

/// Checkout state of one ring buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Owned by the device queue, waiting to be filled
    Queued,
    /// Dequeued and handed to a reader
    CheckedOut,
}

/// Lifecycle state of a frame source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Disconnected,
    Connected,
    Streaming,
}

impl SourceState {
    pub fn name(&self) -> &'static str {
        match self {
            SourceState::Disconnected => "disconnected",
            SourceState::Connected => "connected",
            SourceState::Streaming => "streaming",
        }
    }
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What the device reported for a completed buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: u32,
    pub bytes_used: u32,
    pub sequence: u32,
}

/// Proof of a checked-out ring buffer
///
/// Handed out by `FrameSource::read_lock` and passed back to `unlock`.
/// Not `Clone`: one lease exists per checkout.
#[derive(Debug, PartialEq, Eq)]
pub struct FrameLease {
    pub(crate) index: usize,
    pub(crate) generation: u64,
    /// Device sequence number of the frame
    pub sequence: u32,
    /// Bytes of valid data reported by the device
    pub bytes_used: usize,
    /// Frame size
    pub resolution: Resolution,
    /// Packed layout of the frame
    pub layout: PixelLayout,
}

impl FrameLease {
    /// Ring index of the checked-out buffer
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Memory mapping of one device buffer; unmapped when dropped
pub trait MappedFrame: Send {
    fn as_slice(&self) -> &[u8];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parse() {
        assert_eq!(
            "1280x720".parse::<Resolution>().ok(),
            Some(Resolution::new(1280, 720))
        );
        assert!("1280".parse::<Resolution>().is_err());
        assert!("widexhigh".parse::<Resolution>().is_err());
        assert!("0x720".parse::<Resolution>().is_err());
        assert!("x".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_layout_fourcc_round_trip() {
        for layout in [PixelLayout::Uyvy, PixelLayout::Yuyv] {
            assert_eq!(PixelLayout::from_fourcc(layout.fourcc()), Some(layout));
        }
        assert_eq!(PixelLayout::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_layout_offsets_pick_luma() {
        // Y0 = 10, Y1 = 30, U = 20, V = 40 in each layout
        let uyvy = [20u8, 10, 40, 30];
        let yuyv = [10u8, 20, 30, 40];
        for (layout, group) in [(PixelLayout::Uyvy, uyvy), (PixelLayout::Yuyv, yuyv)] {
            let [y0, u, y1, v] = layout.offsets();
            assert_eq!([group[y0], group[u], group[y1], group[v]], [10, 20, 30, 40]);
        }
    }

    #[test]
    fn test_fourcc_to_string() {
        assert_eq!(fourcc_to_string(FourCC::new(b"UYVY")), "UYVY");
    }
}
