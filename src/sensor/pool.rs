use crossbeam::queue::ArrayQueue;
use std::sync::Arc;

/// Lock-free pool of frame buffers owned by the sensor runtime.
/// A buffer that is never handed back keeps its slot busy; once every slot
/// is out the runtime has nothing to fill and skips ticks.
#[derive(Clone)]
pub struct BufferPool {
    queue: Arc<ArrayQueue<Vec<u8>>>,
    buffer_len: usize,
}

impl BufferPool {
    /// Create a pool of `capacity` zeroed buffers of `buffer_len` bytes
    pub fn new(capacity: usize, buffer_len: usize) -> Self {
        let capacity = capacity.max(1);
        let queue = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            let _ = queue.push(vec![0u8; buffer_len]);
        }
        Self {
            queue: Arc::new(queue),
            buffer_len,
        }
    }

    /// Take a free buffer (non-blocking)
    /// Returns None when every buffer is still leased
    pub fn take(&self) -> Option<Vec<u8>> {
        self.queue.pop()
    }

    /// Hand a buffer back. Buffers of the wrong size are dropped and replaced.
    pub fn give_back(&self, mut buffer: Vec<u8>) {
        if buffer.len() != self.buffer_len {
            buffer = vec![0u8; self.buffer_len];
        }
        // Pool full means the buffer did not come from here; drop it
        let _ = self.queue.push(buffer);
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    /// Buffers currently held by consumers
    #[cfg(test)]
    pub fn leased(&self) -> usize {
        self.queue.capacity() - self.queue.len()
    }
}
