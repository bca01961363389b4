// SPDX-License-Identifier: MPL-2.0

//! Hardware access
//!
//! - [`camera`]: capture devices (V4L2 and synthetic) and the frame source
//!   that owns their buffer ring

pub mod camera;
