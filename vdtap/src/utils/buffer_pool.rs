use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// A thread-safe pool of sample buffers shared between the transfer worker
/// and the consumer of its events.
///
/// The worker hands each filled sample buffer to the consumer as is and
/// resubmits the transfer with a buffer taken from the pool. The consumer
/// gives the filled buffer back once the synchronizer has seen it. Clones
/// share the same pool.
#[derive(Debug, Clone)]
pub struct BufferPool {
    pool: Arc<Mutex<VecDeque<Vec<u8>>>>,
    max_size: usize,
    buffer_capacity: usize,
}

impl BufferPool {
    /// Creates a new buffer pool.
    ///
    /// # Arguments
    ///
    /// * `max_size` - Maximum number of idle buffers kept for reuse
    /// * `buffer_capacity` - Initial capacity of freshly allocated buffers
    pub fn new(max_size: usize, buffer_capacity: usize) -> Self {
        Self {
            pool: Arc::new(Mutex::new(VecDeque::with_capacity(max_size))),
            max_size,
            buffer_capacity,
        }
    }

    /// Takes an empty buffer from the pool, allocating one if none is idle.
    pub fn acquire(&self) -> Vec<u8> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        pool.pop_front()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_capacity))
    }

    /// Returns a buffer to the pool. Buffers beyond `max_size` are dropped.
    pub fn release(&self, mut buffer: Vec<u8>) {
        buffer.clear();

        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.len() < self.max_size {
            pool.push_back(buffer);
        }
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(64, 32 * 1024)
    }
}

#[test]
fn released_buffers_are_reused_and_capped() {
    let pool = BufferPool::new(1, 16);
    let shared = pool.clone();

    let mut a = pool.acquire();
    a.extend_from_slice(&[1, 2, 3]);
    let b = pool.acquire();

    shared.release(a);
    shared.release(b);
    assert_eq!(pool.idle(), 1);

    let reused = pool.acquire();
    assert!(reused.is_empty());
    assert!(reused.capacity() >= 3);
    assert_eq!(pool.idle(), 0);
}
