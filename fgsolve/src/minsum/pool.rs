//! Reusable scratch vectors.
//!
//! Message updates that need a temporary copy of a message (damping) take it from a
//! [`BufferPool`] instead of allocating. A buffer goes back to its pool when its
//! [`PooledBuffer`] guard is dropped, so every exit path of an update releases it.
//!
//! A pool is not `Sync`: use one pool per thread.

use std::cell::{Cell, RefCell};
use std::ops::{Deref, DerefMut};

#[derive(Debug)]
pub struct BufferPool {
    free: RefCell<Vec<Vec<f64>>>,
    capacity: usize,
    allocations: Cell<usize>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(crate::Config::default().pool_capacity)
    }
}

impl BufferPool {
    /// Pool keeping at most `capacity` released buffers.
    pub fn new(capacity: usize) -> Self {
        Self {
            free: RefCell::new(Vec::new()),
            capacity,
            allocations: Cell::new(0),
        }
    }

    /// A buffer of length `len`. Its content is unspecified.
    pub fn acquire(&self, len: usize) -> PooledBuffer<'_> {
        let mut buf = self.take(len);
        buf.resize(len, 0.0);
        PooledBuffer { pool: self, buf }
    }

    /// A buffer holding a copy of `src`.
    pub fn acquire_copy(&self, src: &[f64]) -> PooledBuffer<'_> {
        let mut buf = self.take(src.len());
        buf.extend_from_slice(src);
        PooledBuffer { pool: self, buf }
    }

    /// Empty buffer with capacity at least `len`: the smallest free one that fits, or a new one.
    fn take(&self, len: usize) -> Vec<f64> {
        let mut free = self.free.borrow_mut();
        let best = free
            .iter()
            .enumerate()
            .filter(|(_, b)| b.capacity() >= len)
            .min_by_key(|(_, b)| b.capacity())
            .map(|(i, _)| i);
        let mut buf = match best {
            Some(i) => free.swap_remove(i),
            None => {
                self.allocations.set(self.allocations.get() + 1);
                Vec::with_capacity(len)
            }
        };
        buf.clear();
        buf
    }

    fn release(&self, buf: Vec<f64>) {
        let mut free = self.free.borrow_mut();
        if free.len() < self.capacity {
            free.push(buf);
        }
    }

    /// Number of buffers ready for reuse.
    pub fn available(&self) -> usize {
        self.free.borrow().len()
    }

    /// Number of buffers allocated by this pool since its creation.
    pub fn allocations(&self) -> usize {
        self.allocations.get()
    }
}

/// Scoped buffer, returned to its pool on drop.
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Vec<f64>,
}

impl Deref for PooledBuffer<'_> {
    type Target = [f64];
    fn deref(&self) -> &[f64] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [f64] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
