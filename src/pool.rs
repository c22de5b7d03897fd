//! A lock-free pool of reusable receive buffers.
//!
//! Buffers are rented for the duration of one frame and returned once their
//! contents have been copied out, so the pool's steady-state size stays
//! bounded regardless of message volume.

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

/// Pool of pre-allocated, reusable [`BytesMut`] blocks.
#[derive(Debug)]
pub struct BufferPool {
    buffers: ArrayQueue<BytesMut>,
    capacity: usize,
}

impl BufferPool {
    /// Create a pool holding up to `size` pre-allocated blocks of `capacity`
    /// bytes each.
    pub fn new(size: usize, capacity: usize) -> Self {
        let buffers = ArrayQueue::new(size.max(1));
        for _ in 0..size {
            let _ = buffers.push(BytesMut::with_capacity(capacity));
        }
        Self { buffers, capacity }
    }

    /// Rent a buffer from the pool, allocating a new one if the pool is
    /// empty.
    #[inline]
    pub fn acquire(&self) -> BytesMut {
        self.buffers
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.capacity))
    }

    /// Return a buffer to the pool for reuse. Buffers are cleared before
    /// being stored; if the pool is at capacity the buffer is simply
    /// dropped.
    #[inline]
    pub fn release(&self, mut buffer: BytesMut) {
        buffer.clear();
        let _ = self.buffers.push(buffer);
    }

    /// Configured per-block capacity.
    pub fn block_capacity(&self) -> usize {
        self.capacity
    }
}
