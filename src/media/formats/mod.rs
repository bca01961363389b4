// SPDX-License-Identifier: MPL-2.0

//! Pixel format conversion kernels
//!
//! Single-threaded, allocation-free row converters. The conversion pipeline
//! splits frames into bands and runs these kernels on the worker pool.

pub mod yuv422;

pub use yuv422::{RgbPacking, convert_frame, convert_rows, yuv_to_rgb};
