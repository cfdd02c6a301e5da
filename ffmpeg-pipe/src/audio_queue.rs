use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;

/// Blocks kept per pipeline before the oldest is discarded.
pub const AUDIO_QUEUE_CAPACITY: usize = 10;

/// Bounded FIFO of PCM blocks with drop-oldest overflow.
///
/// Blocks are pushed whole, so a consumer never sees a partial block.
pub struct AudioQueue {
    inner: Mutex<VecDeque<Bytes>>,
    capacity: usize,
}

impl AudioQueue {
    pub fn new() -> Self {
        Self::with_capacity(AUDIO_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Appends a block; returns the block evicted to make room, if any.
    pub fn push(&self, block: Bytes) -> Option<Bytes> {
        let mut queue = self.inner.lock();
        let dropped = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(block);
        dropped
    }

    pub fn pop(&self) -> Option<Bytes> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl Default for AudioQueue {
    fn default() -> Self {
        Self::new()
    }
}
