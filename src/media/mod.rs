// SPDX-License-Identifier: MPL-2.0

//! Frame processing: worker pool, color conversion and JPEG output
//!
//! # Color Space Conversion
//!
//! Frames arrive as packed YUV 4:2:2 (UYVY or YUYV). The [`converter`] module
//! turns them into RGBA in parallel bands on the [`workers`] pool, using the
//! row kernels in [`formats`].
//!
//! # JPEG Output
//!
//! The [`jpeg`] module wraps the baseline encoder and the fixed trailer that
//! marks the image length inside an oversized output buffer.
//!
//! # Modules
//!
//! - [`converter`]: Banded RGBA conversion and JPEG encoding
//! - [`formats`]: YUV 4:2:2 row kernels
//! - [`jpeg`]: Encoder wrapper and blob trailer
//! - [`workers`]: Fixed-size worker thread pool

pub mod converter;
pub mod formats;
pub mod jpeg;
pub mod workers;

// Re-export commonly used types
pub use converter::{Band, ConversionPipeline, partition_rows};
pub use jpeg::JpegOutcome;
pub use workers::{TaskHandle, WorkerPool};
