//! Bounded pool of decoded frame buffers
//!
//! Decoders write pictures and samples into buffers checked out of a
//! [`FramePool`]. A [`FrameBuffer`] goes back to the pool when dropped, so a
//! unit that is rendered, dropped as late, or discarded on reset always
//! releases its memory.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
    trim_capacity: usize,
    outstanding: AtomicUsize,
}

impl PoolInner {
    fn release(&self, mut buf: Vec<u8>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        buf.clear();
        buf.shrink_to(self.trim_capacity);
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(buf);
        }
    }
}

/// Shared, bounded buffer pool. Cloning shares the same pool.
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

impl FramePool {
    /// Default trim size for buffers returned to the pool
    pub const DEFAULT_TRIM_CAPACITY: usize = 4 * 1024 * 1024;

    /// Create a pool allowing at most `capacity` buffers checked out at once
    pub fn new(capacity: usize) -> Self {
        Self::with_trim_capacity(capacity, Self::DEFAULT_TRIM_CAPACITY)
    }

    /// Create a pool that shrinks returned buffers to `trim_capacity` bytes
    pub fn with_trim_capacity(capacity: usize, trim_capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(capacity.min(16))),
                capacity,
                trim_capacity,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Check out a zeroed buffer of `len` bytes, or `None` if the pool is exhausted
    pub fn acquire(&self, len: usize) -> Option<FrameBuffer> {
        let mut buf = self.reserve()?;
        buf.resize(len, 0);
        Some(self.wrap(buf))
    }

    /// Check out a buffer holding a copy of `data`
    pub fn acquire_copy(&self, data: &[u8]) -> Option<FrameBuffer> {
        let mut buf = self.reserve()?;
        buf.extend_from_slice(data);
        Some(self.wrap(buf))
    }

    /// Maximum number of buffers checked out at once
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Buffers currently checked out
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Released buffers kept for reuse
    pub fn idle(&self) -> usize {
        self.inner.free.lock().len()
    }

    fn reserve(&self) -> Option<Vec<u8>> {
        let capacity = self.inner.capacity;
        self.inner
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .ok()?;
        Some(self.inner.free.lock().pop().unwrap_or_default())
    }

    fn wrap(&self, buf: Vec<u8>) -> FrameBuffer {
        FrameBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("capacity", &self.capacity())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// A checked-out buffer; returns to its pool on drop
pub struct FrameBuffer {
    buf: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl FrameBuffer {
    /// Length in bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Deref for FrameBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for FrameBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.buf.len())
            .finish()
    }
}
