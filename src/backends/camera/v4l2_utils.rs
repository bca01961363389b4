// SPDX-License-Identifier: GPL-3.0-only

//! Raw V4L2 ioctl plumbing
//!
//! The `v4l` crate covers format negotiation and frame size enumeration; the
//! memory-mapped buffer queue is driven here with hand-written `repr(C)`
//! structs so that buffer checkout stays under our control.

use super::types::DeviceInfo;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::debug;

/// Single-planar video capture buffer type
pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;

/// Buffers are memory mapped from the driver
pub const V4L2_MEMORY_MMAP: u32 = 1;

/// V4L2 capability flag for single-planar video capture
pub const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;

/// V4L2 capability flag for streaming I/O
pub const V4L2_CAP_STREAMING: u32 = 0x0400_0000;

const IOC_WRITE: libc::c_ulong = 1;
const IOC_READ: libc::c_ulong = 2;

const fn ioc(dir: libc::c_ulong, nr: libc::c_ulong, size: usize) -> libc::c_ulong {
    (dir << 30) | ((size as libc::c_ulong) << 16) | ((b'V' as libc::c_ulong) << 8) | nr
}

/// VIDIOC_QUERYCAP ioctl number
const VIDIOC_QUERYCAP: libc::c_ulong = 0x80685600;
const VIDIOC_REQBUFS: libc::c_ulong =
    ioc(IOC_READ | IOC_WRITE, 8, std::mem::size_of::<V4l2RequestBuffers>());
const VIDIOC_QUERYBUF: libc::c_ulong =
    ioc(IOC_READ | IOC_WRITE, 9, std::mem::size_of::<V4l2Buffer>());
const VIDIOC_QBUF: libc::c_ulong = ioc(IOC_READ | IOC_WRITE, 15, std::mem::size_of::<V4l2Buffer>());
const VIDIOC_DQBUF: libc::c_ulong =
    ioc(IOC_READ | IOC_WRITE, 17, std::mem::size_of::<V4l2Buffer>());
const VIDIOC_STREAMON: libc::c_ulong = ioc(IOC_WRITE, 18, std::mem::size_of::<libc::c_int>());
const VIDIOC_STREAMOFF: libc::c_ulong = ioc(IOC_WRITE, 19, std::mem::size_of::<libc::c_int>());

/// V4L2 capability structure for VIDIOC_QUERYCAP ioctl
#[repr(C)]
struct V4l2Capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

/// Request structure for VIDIOC_REQBUFS
#[repr(C)]
struct V4l2RequestBuffers {
    count: u32,
    type_: u32,
    memory: u32,
    capabilities: u32,
    flags: u8,
    reserved: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct V4l2Timecode {
    type_: u32,
    flags: u32,
    frames: u8,
    seconds: u8,
    minutes: u8,
    hours: u8,
    userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
union V4l2BufferM {
    offset: u32,
    userptr: libc::c_ulong,
    planes: *mut libc::c_void,
    fd: i32,
}

/// Buffer descriptor shared by QUERYBUF, QBUF and DQBUF
#[repr(C)]
struct V4l2Buffer {
    index: u32,
    type_: u32,
    bytesused: u32,
    flags: u32,
    field: u32,
    timestamp: libc::timeval,
    timecode: V4l2Timecode,
    sequence: u32,
    memory: u32,
    m: V4l2BufferM,
    length: u32,
    reserved2: u32,
    request_fd: i32,
}

impl V4l2Buffer {
    fn capture(index: u32) -> Self {
        let mut buf: V4l2Buffer = unsafe { std::mem::zeroed() };
        buf.index = index;
        buf.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = V4L2_MEMORY_MMAP;
        buf
    }
}

/// Where the driver placed one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPlacement {
    pub offset: u32,
    pub length: u32,
}

/// A completed buffer as reported by VIDIOC_DQBUF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedBuffer {
    pub index: u32,
    pub bytes_used: u32,
    pub sequence: u32,
}

fn check(result: libc::c_int) -> std::io::Result<()> {
    if result < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Ask the driver for `count` memory-mapped capture buffers.
///
/// Returns the number actually granted; `count == 0` releases all buffers.
pub fn request_buffers(fd: RawFd, count: u32) -> std::io::Result<u32> {
    let mut req: V4l2RequestBuffers = unsafe { std::mem::zeroed() };
    req.count = count;
    req.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
    req.memory = V4L2_MEMORY_MMAP;
    check(unsafe { libc::ioctl(fd, VIDIOC_REQBUFS as _, &mut req as *mut V4l2RequestBuffers) })?;
    Ok(req.count)
}

/// Look up the mmap offset and length of buffer `index`
pub fn query_buffer(fd: RawFd, index: u32) -> std::io::Result<BufferPlacement> {
    let mut buf = V4l2Buffer::capture(index);
    check(unsafe { libc::ioctl(fd, VIDIOC_QUERYBUF as _, &mut buf as *mut V4l2Buffer) })?;
    // SAFETY: QUERYBUF with MMAP memory fills the offset member
    let offset = unsafe { buf.m.offset };
    Ok(BufferPlacement {
        offset,
        length: buf.length,
    })
}

/// Hand buffer `index` back to the driver's incoming queue
pub fn queue_buffer(fd: RawFd, index: u32) -> std::io::Result<()> {
    let mut buf = V4l2Buffer::capture(index);
    check(unsafe { libc::ioctl(fd, VIDIOC_QBUF as _, &mut buf as *mut V4l2Buffer) })
}

/// Take the oldest completed buffer off the driver's outgoing queue
pub fn dequeue_buffer(fd: RawFd) -> std::io::Result<CompletedBuffer> {
    let mut buf = V4l2Buffer::capture(0);
    check(unsafe { libc::ioctl(fd, VIDIOC_DQBUF as _, &mut buf as *mut V4l2Buffer) })?;
    Ok(CompletedBuffer {
        index: buf.index,
        bytes_used: buf.bytesused,
        sequence: buf.sequence,
    })
}

/// Start or stop streaming on the capture queue
pub fn set_stream(fd: RawFd, enable: bool) -> std::io::Result<()> {
    let buf_type: libc::c_int = V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
    let request = if enable {
        VIDIOC_STREAMON
    } else {
        VIDIOC_STREAMOFF
    };
    check(unsafe { libc::ioctl(fd, request as _, &buf_type as *const libc::c_int) })
}

/// Wait up to `timeout_ms` for the descriptor to become readable.
///
/// Returns `Ok(false)` on timeout. EINTR is reported as a timeout so the
/// caller can decide whether to retry.
pub fn poll_readable(fd: RawFd, timeout_ms: i32) -> std::io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN | libc::POLLRDNORM,
        revents: 0,
    };
    let result = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if result < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(result > 0 && pfd.revents & (libc::POLLIN | libc::POLLRDNORM) != 0)
}

/// Query V4L2 capabilities for an open file descriptor.
///
/// Issues the `VIDIOC_QUERYCAP` ioctl and returns the capability struct,
/// or `None` if the ioctl fails.
fn query_v4l2_cap(fd: RawFd) -> Option<V4l2Capability> {
    let mut cap: V4l2Capability = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::ioctl(fd, VIDIOC_QUERYCAP as _, &mut cap as *mut V4l2Capability) };
    if result < 0 { None } else { Some(cap) }
}

fn c_string(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).to_string()
}

/// Query card and driver names and check for streaming capture support.
///
/// Returns `None` if the node cannot be opened, the ioctl fails, or the node
/// is not a streaming video capture device (e.g. a UVC metadata node).
pub fn inspect_capture_device(device_path: &str) -> Option<DeviceInfo> {
    let file = std::fs::File::open(device_path).ok()?;
    let cap = query_v4l2_cap(file.as_raw_fd())?;

    // Use device_caps if available, otherwise capabilities
    let caps = if cap.device_caps != 0 {
        cap.device_caps
    } else {
        cap.capabilities
    };
    if caps & V4L2_CAP_VIDEO_CAPTURE == 0 || caps & V4L2_CAP_STREAMING == 0 {
        debug!(device_path, caps, "Not a streaming capture node");
        return None;
    }

    let real_path = std::fs::canonicalize(device_path)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| device_path.to_string());

    let info = DeviceInfo {
        card: c_string(&cap.card),
        driver: c_string(&cap.driver),
        path: device_path.to_string(),
        real_path,
    };
    debug!(device_path, driver = %info.driver, card = %info.card, "Found V4L2 capture device");
    Some(info)
}

/// List `/dev/video*` nodes that are streaming capture devices, sorted by path
pub fn discover_capture_devices() -> Vec<DeviceInfo> {
    let entries = match std::fs::read_dir("/dev") {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut paths: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.starts_with("video").then(|| format!("/dev/{}", name))
        })
        .collect();
    paths.sort();

    paths
        .iter()
        .filter_map(|path| inspect_capture_device(path))
        .collect()
}
