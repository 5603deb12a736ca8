//! Pooled capture buffers for ClientHello records.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Initial capacity of a fresh capture buffer; fits a typical ClientHello.
const INITIAL_CAPACITY: usize = 2048;
/// Buffers that grew past this are dropped instead of pooled.
const MAX_POOLED_CAPACITY: usize = 16 * 1024;

/// Bounded free list of capture buffers shared by all connections.
#[derive(Debug)]
pub struct HelloBufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
}

impl HelloBufferPool {
    /// Create a pool that keeps at most `max_pooled` idle buffers.
    pub fn new(max_pooled: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
        })
    }

    /// Borrow an empty buffer; it returns to the pool when dropped.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buf = self
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(INITIAL_CAPACITY));
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    /// Idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        let mut free = self.lock();
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A capture buffer on loan from a [`HelloBufferPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<HelloBufferPool>,
}

impl PooledBuffer {
    /// Copy the contents out and give the buffer back to the pool.
    pub fn into_private_copy(self) -> Vec<u8> {
        self.buf.clone()
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
