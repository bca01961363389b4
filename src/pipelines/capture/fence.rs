// SPDX-License-Identifier: GPL-3.0-only

//! Buffer synchronization fences

use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;

/// In-process one-shot signal
#[derive(Debug, Default)]
pub struct FenceSignal {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl FenceSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn signal(&self) {
        *self.signaled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
    }

    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |signaled| !*signaled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Fence guarding a shared buffer
#[derive(Debug, Default)]
pub enum Fence {
    /// Nothing to wait for
    #[default]
    None,
    /// Signalled by another thread of this process
    Signal(Arc<FenceSignal>),
    /// Kernel sync file; signalled once readable
    SyncFile(OwnedFd),
}

impl Fence {
    pub fn is_none(&self) -> bool {
        matches!(self, Fence::None)
    }

    /// Block until signalled; returns `false` if `timeout` passed first
    pub fn wait(&self, timeout: Duration) -> bool {
        match self {
            Fence::None => true,
            Fence::Signal(signal) => signal.wait(timeout),
            Fence::SyncFile(fd) => wait_sync_file(fd, timeout),
        }
    }
}

fn wait_sync_file(fd: &OwnedFd, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let mut pfd = libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = remaining.as_millis().min(i32::MAX as u128) as i32;
        let result = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if result > 0 {
            return pfd.revents & libc::POLLIN != 0;
        }
        if result == 0 {
            return false;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted || remaining.is_zero() {
            warn!(error = %err, "Polling sync file failed");
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_always_ready() {
        assert!(Fence::None.wait(Duration::ZERO));
    }

    #[test]
    fn test_signal_from_other_thread() {
        let signal = FenceSignal::new();
        let fence = Fence::Signal(Arc::clone(&signal));
        assert!(!fence.wait(Duration::from_millis(10)));

        let remote = Arc::clone(&signal);
        let handle = std::thread::spawn(move || remote.signal());
        assert!(fence.wait(Duration::from_secs(5)));
        handle.join().unwrap();
        assert!(signal.is_signaled());
    }
}
