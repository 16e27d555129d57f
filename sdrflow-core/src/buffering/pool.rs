//! Size-classed pool of reusable sample buffers.
//!
//! Every buffer is backed by a power-of-two block (minimum [`MIN_CLASS_LEN`]
//! samples). A [`SampleBuffer`] remembers the index of the class it was
//! checked out from, so `release` files it back under the same class without
//! any lookup. Free lists grow without bound; reuse always wins over a fresh
//! allocation.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, SdrflowError};

/// Smallest block handed out, in samples.
pub const MIN_CLASS_LEN: usize = 64;

/// Largest single request accepted (2^26 samples = 256 MiB of f32).
pub const MAX_BUFFER_LEN: usize = 1 << 26;

/// An exclusively-owned block of `f32` samples checked out from a [`BufferPool`].
///
/// Dereferences to exactly `len()` samples; the rest of the block is hidden.
#[derive(Debug)]
pub struct SampleBuffer {
    data: Vec<f32>,
    len: usize,
    class: usize,
}

impl SampleBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index of the size class this block belongs to.
    pub fn size_class(&self) -> usize {
        self.class
    }

    /// Samples available in the underlying block.
    pub fn block_len(&self) -> usize {
        self.data.len()
    }

    /// Copy the visible samples out into a plain vector.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data[..self.len].to_vec()
    }
}

impl Deref for SampleBuffer {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.data[..self.len]
    }
}

impl DerefMut for SampleBuffer {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.data[..self.len]
    }
}

/// Counters describing pool behaviour since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Blocks allocated from the system allocator.
    pub created: usize,
    /// Acquisitions satisfied from a free list.
    pub reused: usize,
    /// Blocks returned through `release`.
    pub released: usize,
    /// Blocks currently sitting in free lists.
    pub free: usize,
}

/// Thread-safe, reuse-first allocator for [`SampleBuffer`]s.
#[derive(Default)]
pub struct BufferPool {
    /// `classes[i]` holds free blocks of `MIN_CLASS_LEN << i` samples.
    classes: Mutex<Vec<Vec<Vec<f32>>>>,
    created: AtomicUsize,
    reused: AtomicUsize,
    released: AtomicUsize,
}

fn class_index(len: usize) -> usize {
    let block = len.max(MIN_CLASS_LEN).next_power_of_two();
    (block.trailing_zeros() - MIN_CLASS_LEN.trailing_zeros()) as usize
}

fn class_len(class: usize) -> usize {
    MIN_CLASS_LEN << class
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-allocate `count` blocks able to hold `len` samples each.
    pub fn with_preallocated(len: usize, count: usize) -> Result<Self> {
        let pool = Self::new();
        let buffers = (0..count)
            .map(|_| pool.acquire(len))
            .collect::<Result<Vec<_>>>()?;
        for buffer in buffers {
            pool.release(buffer);
        }
        Ok(pool)
    }

    /// Check out a zeroed buffer of exactly `len` visible samples.
    ///
    /// # Errors
    /// - `SdrflowError::InvalidBufferSize` for `len == 0` or `len > MAX_BUFFER_LEN`.
    /// - `SdrflowError::Allocation` if the system allocator refuses the block.
    pub fn acquire(&self, len: usize) -> Result<SampleBuffer> {
        if len == 0 || len > MAX_BUFFER_LEN {
            return Err(SdrflowError::InvalidBufferSize {
                requested: len,
                max: MAX_BUFFER_LEN,
            });
        }

        let class = class_index(len);
        let recycled = self.classes.lock().get_mut(class).and_then(Vec::pop);

        let data = match recycled {
            Some(mut data) => {
                data[..len].fill(0.0);
                self.reused.fetch_add(1, Ordering::Relaxed);
                data
            }
            None => {
                let block = class_len(class);
                let mut data = Vec::new();
                data.try_reserve_exact(block)
                    .map_err(|source| SdrflowError::Allocation {
                        requested: block,
                        source,
                    })?;
                data.resize(block, 0.0);
                self.created.fetch_add(1, Ordering::Relaxed);
                debug!(class, block, "allocated new sample block");
                data
            }
        };

        Ok(SampleBuffer { data, len, class })
    }

    /// Check out a buffer initialised with a copy of `samples`.
    pub fn acquire_from(&self, samples: &[f32]) -> Result<SampleBuffer> {
        let mut buffer = self.acquire(samples.len())?;
        buffer.copy_from_slice(samples);
        Ok(buffer)
    }

    /// Return a buffer to its size class for reuse.
    pub fn release(&self, buffer: SampleBuffer) {
        let SampleBuffer { data, class, .. } = buffer;
        let mut classes = self.classes.lock();
        if classes.len() <= class {
            classes.resize_with(class + 1, Vec::new);
        }
        classes[class].push(data);
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of idle blocks that could serve a request of `len` samples.
    pub fn free_for(&self, len: usize) -> usize {
        self.classes
            .lock()
            .get(class_index(len))
            .map_or(0, Vec::len)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            free: self.classes.lock().iter().map(Vec::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_classes_round_up_to_power_of_two() {
        assert_eq!(class_index(1), 0);
        assert_eq!(class_index(64), 0);
        assert_eq!(class_index(65), 1);
        assert_eq!(class_index(128), 1);
        assert_eq!(class_index(1000), 4);
        assert_eq!(class_len(4), 1024);
    }

    #[test]
    fn acquire_returns_zeroed_buffer_of_requested_len() {
        let pool = BufferPool::new();
        let buffer = pool.acquire(100).expect("acquire");
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.block_len(), 128);
        assert!(buffer.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn released_buffer_is_reused_and_rezeroed() {
        let pool = BufferPool::new();
        let mut buffer = pool.acquire(200).expect("acquire");
        buffer.fill(3.5);
        pool.release(buffer);
        assert_eq!(pool.free_for(200), 1);

        let again = pool.acquire(150).expect("reacquire");
        assert!(again.iter().all(|s| *s == 0.0));
        assert_eq!(again.len(), 150);

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.free, 0);
    }

    #[test]
    fn different_classes_do_not_share_blocks() {
        let pool = BufferPool::new();
        let small = pool.acquire(10).expect("small");
        pool.release(small);
        let large = pool.acquire(4096).expect("large");
        assert_eq!(pool.stats().created, 2);
        assert_eq!(pool.free_for(10), 1);
        pool.release(large);
        assert_eq!(pool.stats().free, 2);
    }

    #[test]
    fn nonsensical_sizes_are_rejected() {
        let pool = BufferPool::new();
        assert!(matches!(
            pool.acquire(0),
            Err(SdrflowError::InvalidBufferSize { requested: 0, .. })
        ));
        assert!(pool.acquire(MAX_BUFFER_LEN + 1).is_err());
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn acquire_from_copies_caller_samples() {
        let pool = BufferPool::new();
        let buffer = pool.acquire_from(&[1.0, -2.0, 3.0]).expect("acquire_from");
        assert_eq!(&*buffer, &[1.0, -2.0, 3.0]);
        assert_eq!(buffer.to_vec(), vec![1.0, -2.0, 3.0]);
    }

    #[test]
    fn preallocation_fills_free_list() {
        let pool = BufferPool::with_preallocated(512, 4).expect("prealloc");
        assert_eq!(pool.free_for(512), 4);
        let _a = pool.acquire(512).expect("a");
        assert_eq!(pool.stats().created, 4);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn concurrent_acquire_release_is_consistent() {
        use std::sync::Arc;
        use std::thread;

        let pool = Arc::new(BufferPool::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..500 {
                        let buffer = pool.acquire(64 + (i % 3) * 100).expect("acquire");
                        pool.release(buffer);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }

        let stats = pool.stats();
        assert_eq!(stats.created + stats.reused, 2000);
        assert_eq!(stats.released, 2000);
        assert_eq!(stats.free, stats.created);
    }
}
