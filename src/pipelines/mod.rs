// SPDX-License-Identifier: MPL-2.0

//! Request processing pipelines
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Frame source │ ──▶ │ Capture pipeline  │ ──▶ │ Output       │
//! │ (UYVY/YUYV)  │     │  - fence waits    │     │ buffers      │
//! │              │     │  - YUV→RGBA       │     │ (RGBA, JPEG) │
//! │              │     │  - JPEG encoding  │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```

pub mod capture;
