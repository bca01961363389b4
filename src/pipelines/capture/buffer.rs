// SPDX-License-Identifier: GPL-3.0-only

//! Destination buffers handed in by the client

use crate::errors::{HalError, HalResult};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

/// CPU access to a mapped buffer; unmapped when dropped
pub trait BufferMapping {
    fn bytes(&self) -> &[u8];
    fn bytes_mut(&mut self) -> &mut [u8];
}

/// Client-owned image memory that the HAL maps for writing
pub trait GraphicBuffer: Send + Sync + fmt::Debug {
    /// Size of the buffer in bytes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Map for CPU access. Fails if the buffer is already mapped.
    fn map(&self) -> HalResult<Box<dyn BufferMapping + '_>>;
}

/// Heap-allocated [`GraphicBuffer`]
#[derive(Debug)]
pub struct HeapBuffer {
    data: Mutex<Vec<u8>>,
    len: usize,
}

struct HeapMapping<'a> {
    guard: MutexGuard<'a, Vec<u8>>,
}

impl BufferMapping for HeapMapping<'_> {
    fn bytes(&self) -> &[u8] {
        &self.guard
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.guard
    }
}

impl HeapBuffer {
    /// Zero-filled buffer of `len` bytes
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            data: Mutex::new(data),
            len,
        }
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<u8> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl GraphicBuffer for HeapBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn map(&self) -> HalResult<Box<dyn BufferMapping + '_>> {
        let guard = match self.data.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return Err(HalError::BufferMapFailed(
                    "buffer is already mapped".to_string(),
                ));
            }
        };
        Ok(Box::new(HeapMapping { guard }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_map_fails() {
        let buffer = HeapBuffer::new(8);
        let mut first = buffer.map().unwrap();
        first.bytes_mut()[0] = 9;
        assert!(matches!(buffer.map(), Err(HalError::BufferMapFailed(_))));
        drop(first);
        assert_eq!(buffer.snapshot()[0], 9);
        assert!(buffer.map().is_ok());
    }
}
