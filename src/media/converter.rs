// SPDX-License-Identifier: GPL-3.0-only

//! Parallel frame conversion
//!
//! A frame is cut into horizontal bands of destination rows. Each band is
//! one pool job writing its own disjoint slice of the destination, reading
//! the shared source frame, so jobs never synchronise with each other and
//! the output does not depend on which worker ran which band.

use super::formats::{RgbPacking, convert_rows};
use super::jpeg::{self, JpegOutcome};
use super::workers::WorkerPool;
use crate::backends::camera::types::{PixelLayout, Resolution};
use crate::errors::{HalError, HalResult};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Contiguous range of destination rows handled by one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub start: usize,
    pub count: usize,
}

/// Split `height` rows into at most `bands` bands of `ceil(height / bands)`
/// rows each; the last band takes whatever remains.
pub fn partition_rows(height: usize, bands: usize) -> Vec<Band> {
    if height == 0 {
        return Vec::new();
    }
    let per_band = height.div_ceil(bands.max(1));
    let mut out = Vec::with_capacity(bands.max(1));
    let mut start = 0;
    while start < height {
        let count = per_band.min(height - start);
        out.push(Band { start, count });
        start += count;
    }
    out
}

/// Converts captured frames into RGBA and JPEG output buffers
pub struct ConversionPipeline {
    pool: WorkerPool,
    band_count: usize,
}

impl ConversionPipeline {
    pub fn new(pool: WorkerPool, band_count: usize) -> Self {
        Self {
            pool,
            band_count: band_count.max(1),
        }
    }

    pub fn start(&mut self) -> HalResult<()> {
        self.pool.start()
    }

    pub fn stop(&mut self) {
        self.pool.stop();
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    pub fn band_count(&self) -> usize {
        self.band_count
    }

    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    fn check_source(src: &[u8], layout: PixelLayout, res: Resolution) -> HalResult<()> {
        if res.is_empty() || res.width % 2 != 0 {
            return Err(HalError::InvalidResolution(format!(
                "{} is not a valid 4:2:2 frame size",
                res
            )));
        }
        let needed = layout.frame_size(res);
        if src.len() < needed {
            return Err(HalError::InvalidBufferSize {
                needed,
                available: src.len(),
            });
        }
        Ok(())
    }

    fn convert_banded(
        &self,
        src: &[u8],
        layout: PixelLayout,
        src_res: Resolution,
        dst: &mut [u8],
        dst_res: Resolution,
        packing: RgbPacking,
    ) -> HalResult<()> {
        Self::check_source(src, layout, src_res)?;
        if dst_res.is_empty() {
            return Err(HalError::InvalidResolution(dst_res.to_string()));
        }
        let needed = packing.frame_size(dst_res);
        if dst.len() < needed {
            return Err(HalError::InvalidBufferSize {
                needed,
                available: dst.len(),
            });
        }

        let stride = dst_res.width as usize * packing.bytes_per_pixel();
        let bands = partition_rows(dst_res.height as usize, self.band_count);
        trace!(bands = bands.len(), %src_res, %dst_res, "Converting frame");

        let mut rest = &mut dst[..needed];
        self.pool.scope(|s| {
            for band in bands {
                let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(band.count * stride);
                rest = tail;
                s.submit(move || {
                    convert_rows(src, layout, src_res, chunk, dst_res, band.start, packing)
                });
            }
        })
    }

    /// Convert a packed 4:2:2 frame into RGBA8, scaling to `dst_res` if needed
    pub fn yuv422_to_rgba(
        &self,
        src: &[u8],
        layout: PixelLayout,
        src_res: Resolution,
        dst: &mut [u8],
        dst_res: Resolution,
    ) -> HalResult<()> {
        let started = Instant::now();
        self.convert_banded(src, layout, src_res, dst, dst_res, RgbPacking::Rgba8)?;
        debug!(
            elapsed_us = started.elapsed().as_micros() as u64,
            %dst_res,
            "yuv->rgba"
        );
        Ok(())
    }

    /// Encode a packed 4:2:2 frame as JPEG into the start of `dst`.
    ///
    /// Returns [`JpegOutcome::TooLarge`] without touching `dst` if the image
    /// does not fit.
    pub fn yuv422_to_jpeg(
        &self,
        src: &[u8],
        layout: PixelLayout,
        res: Resolution,
        quality: u8,
        dst: &mut [u8],
    ) -> HalResult<JpegOutcome> {
        let started = Instant::now();
        let mut rgb = vec![0u8; RgbPacking::Rgb8.frame_size(res)];
        self.convert_banded(src, layout, res, &mut rgb, res, RgbPacking::Rgb8)?;
        let encoded = jpeg::encode_rgb(&rgb, res, quality)?;

        let outcome = jpeg::write_bounded(&encoded, dst);
        match outcome {
            JpegOutcome::Written(len) => debug!(
                elapsed_us = started.elapsed().as_micros() as u64,
                bytes = len,
                quality,
                "yuv->jpeg"
            ),
            JpegOutcome::TooLarge { encoded_len } => warn!(
                encoded_len,
                capacity = dst.len(),
                "JPEG image too big for output buffer"
            ),
        }
        Ok(outcome)
    }
}
