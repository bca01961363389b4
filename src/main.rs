// SPDX-License-Identifier: GPL-3.0-only

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-hal")]
#[command(about = "V4L2 capture HAL: enumerate, capture and stream from a camera")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Which capture device to use
#[derive(Args, Clone)]
pub struct DeviceArgs {
    /// Device node (default: from config, usually /dev/video0)
    #[arg(short, long)]
    pub device: Option<String>,

    /// Use the built-in colour-bar generator instead of a device
    #[arg(long)]
    pub synthetic: bool,
}

/// Output formats produced by `capture`
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureFormat {
    Jpeg,
    Rgba,
    Both,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices and their frame sizes
    List,

    /// Show sensor information for a device
    Info {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Capture a single frame
    Capture {
        #[command(flatten)]
        device: DeviceArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "jpeg")]
        format: CaptureFormat,

        /// Output width (default: first available resolution)
        #[arg(long, requires = "height")]
        width: Option<u32>,

        /// Output height (default: first available resolution)
        #[arg(long, requires = "width")]
        height: Option<u32>,

        /// JPEG quality 1-100 (default: from config)
        #[arg(short, long)]
        quality: Option<u8>,

        /// Output file path (default: ~/Pictures/camera-hal/capture_TIMESTAMP.jpg)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run capture requests continuously and report the frame rate
    Stream {
        #[command(flatten)]
        device: DeviceArgs,

        /// Stop after this many frames (default: run until Ctrl+C)
        #[arg(short = 'n', long)]
        frames: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camera_hal=trace, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    tracing::info!(version = env!("GIT_VERSION"), "camera-hal starting");

    let cli = Cli::parse();

    match cli.command {
        Commands::List => cli::list_devices(),
        Commands::Info { device } => cli::show_info(&device),
        Commands::Capture {
            device,
            format,
            width,
            height,
            quality,
            output,
        } => {
            let size = width.zip(height);
            cli::capture(&device, format, size, quality, output)
        }
        Commands::Stream { device, frames } => cli::stream(&device, frames),
    }
}
