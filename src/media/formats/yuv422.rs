// SPDX-License-Identifier: GPL-3.0-only

//! Packed YUV 4:2:2 to RGB row kernels
//!
//! Integer BT.601 limited-range math so every thread, every run and every
//! band split produces the same bytes. Chroma is upsampled by repeating the
//! shared U/V sample for both pixels of a pair. When the destination size
//! differs from the frame, rows and columns are sampled nearest-neighbour.

use crate::backends::camera::types::{PixelLayout, Resolution};

/// Destination pixel packing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RgbPacking {
    /// R G B A with opaque alpha
    Rgba8,
    /// R G B
    Rgb8,
}

impl RgbPacking {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            RgbPacking::Rgba8 => 4,
            RgbPacking::Rgb8 => 3,
        }
    }

    /// Bytes needed for a full frame of `resolution`
    pub fn frame_size(&self, resolution: Resolution) -> usize {
        resolution.area() as usize * self.bytes_per_pixel()
    }
}

/// Convert one limited-range BT.601 sample to RGB
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    [
        r.clamp(0, 255) as u8,
        g.clamp(0, 255) as u8,
        b.clamp(0, 255) as u8,
    ]
}

/// Convert destination rows `[first_row, first_row + n)` where `n` is however
/// many whole rows fit in `dst`.
///
/// `src` must hold a full `src_res` frame and `src_res.width` must be even.
pub fn convert_rows(
    src: &[u8],
    layout: PixelLayout,
    src_res: Resolution,
    dst: &mut [u8],
    dst_res: Resolution,
    first_row: usize,
    packing: RgbPacking,
) {
    let src_w = src_res.width as usize;
    let src_h = src_res.height as usize;
    let dst_w = dst_res.width as usize;
    let dst_h = dst_res.height as usize;
    let bpp = packing.bytes_per_pixel();
    let dst_stride = dst_w * bpp;
    let src_stride = src_w * PixelLayout::BYTES_PER_PIXEL;
    if dst_stride == 0 || src_stride == 0 {
        return;
    }

    let [y0_off, u_off, y1_off, v_off] = layout.offsets();
    let same_width = src_w == dst_w;

    for (i, out) in dst.chunks_exact_mut(dst_stride).enumerate() {
        let dst_y = first_row + i;
        let src_y = if src_h == dst_h {
            dst_y
        } else {
            dst_y * src_h / dst_h
        };
        let row = &src[src_y * src_stride..(src_y + 1) * src_stride];

        for (dst_x, px) in out.chunks_exact_mut(bpp).enumerate() {
            let src_x = if same_width {
                dst_x
            } else {
                dst_x * src_w / dst_w
            };
            let group = &row[(src_x / 2) * 4..(src_x / 2) * 4 + 4];
            let luma = if src_x % 2 == 0 {
                group[y0_off]
            } else {
                group[y1_off]
            };
            let [r, g, b] = yuv_to_rgb(luma, group[u_off], group[v_off]);
            px[0] = r;
            px[1] = g;
            px[2] = b;
            if bpp == 4 {
                px[3] = 255;
            }
        }
    }
}

/// Convert a whole frame on the calling thread
pub fn convert_frame(
    src: &[u8],
    layout: PixelLayout,
    src_res: Resolution,
    dst_res: Resolution,
    packing: RgbPacking,
) -> Vec<u8> {
    let mut out = vec![0u8; packing.frame_size(dst_res)];
    convert_rows(src, layout, src_res, &mut out, dst_res, 0, packing);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_colours() {
        assert_eq!(yuv_to_rgb(16, 128, 128), [0, 0, 0]);
        assert_eq!(yuv_to_rgb(235, 128, 128), [255, 255, 255]);
        // Limited-range red
        let [r, g, b] = yuv_to_rgb(81, 90, 240);
        assert!(r >= 250 && g <= 5 && b <= 5, "got {r} {g} {b}");
    }

    #[test]
    fn test_out_of_range_clamps() {
        assert_eq!(yuv_to_rgb(0, 128, 128), [0, 0, 0]);
        assert_eq!(yuv_to_rgb(255, 128, 128), [255, 255, 255]);
    }

    #[test]
    fn test_layouts_agree() {
        let res = Resolution::new(2, 1);
        // Two pixels, Y0 = 100, Y1 = 200, U = 90, V = 160
        let uyvy = [90u8, 100, 160, 200];
        let yuyv = [100u8, 90, 200, 160];
        let a = convert_frame(&uyvy, PixelLayout::Uyvy, res, res, RgbPacking::Rgba8);
        let b = convert_frame(&yuyv, PixelLayout::Yuyv, res, res, RgbPacking::Rgba8);
        assert_eq!(a, b);
        assert_eq!(a[3], 255);
        assert_eq!(&a[..3], &yuv_to_rgb(100, 90, 160));
        assert_eq!(&a[4..7], &yuv_to_rgb(200, 90, 160));
    }

    #[test]
    fn test_rgb_packing_has_no_alpha() {
        let res = Resolution::new(2, 1);
        let src = [128u8, 235, 128, 235];
        let out = convert_frame(&src, PixelLayout::Uyvy, res, res, RgbPacking::Rgb8);
        assert_eq!(out, vec![255; 6]);
    }

    #[test]
    fn test_downscale_samples_nearest() {
        let src_res = Resolution::new(4, 2);
        // Row 0 white, row 1 black
        let src = [
            128u8, 235, 128, 235, 128, 235, 128, 235, //
            128, 16, 128, 16, 128, 16, 128, 16,
        ];
        let out = convert_frame(
            &src,
            PixelLayout::Uyvy,
            src_res,
            Resolution::new(2, 1),
            RgbPacking::Rgba8,
        );
        assert_eq!(out, vec![255, 255, 255, 255, 255, 255, 255, 255]);
    }
}
