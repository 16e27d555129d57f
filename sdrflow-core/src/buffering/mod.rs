//! Lock-free SPSC ring buffer for radio samples.
//!
//! Uses `ringbuf::HeapRb<f32>`, whose producer/consumer halves publish their
//! cursors with release stores and observe the opposite cursor with acquire
//! loads. `push_slice` / `pop_slice` are wait-free and split into two copies
//! when a run crosses the end of the backing storage.
//!
//! A ring of capacity `N` keeps one slot empty, so it holds at most `N - 1`
//! samples: `available_data + available_space == N - 1` for every snapshot.

pub mod chunk;
pub mod pool;

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

use crate::error::{Result, SdrflowError};

/// Default ring size: 2^20 slots ≈ 0.5 s of interleaved IQ at 1 MS/s.
pub const DEFAULT_RING_CAPACITY: usize = 1 << 20;

/// Occupancy seen from one consistent read of the cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLevels {
    pub available_data: usize,
    pub available_space: usize,
}

/// Write half, held by the real-time capture context.
pub struct SampleProducer {
    inner: HeapProd<f32>,
    capacity: usize,
}

/// Read half, held by the pipeline drain thread.
pub struct SampleConsumer {
    inner: HeapCons<f32>,
    capacity: usize,
}

/// Create a matched producer/consumer pair over a ring of `capacity` slots.
///
/// # Errors
/// `SdrflowError::InvalidRingCapacity` if `capacity < 2` (no usable slot).
pub fn create_sample_ring(capacity: usize) -> Result<(SampleProducer, SampleConsumer)> {
    if capacity < 2 {
        return Err(SdrflowError::InvalidRingCapacity { capacity });
    }
    let (producer, consumer) = HeapRb::<f32>::new(capacity - 1).split();
    Ok((
        SampleProducer {
            inner: producer,
            capacity,
        },
        SampleConsumer {
            inner: consumer,
            capacity,
        },
    ))
}

fn levels(capacity: usize, occupied: usize) -> RingLevels {
    RingLevels {
        available_data: occupied,
        available_space: capacity - 1 - occupied,
    }
}

impl SampleProducer {
    /// Write as many samples as currently fit and return how many were written.
    ///
    /// Never blocks and never fails: a batch larger than the free space is
    /// truncated to exactly `available_space()` samples.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        if samples.is_empty() {
            return 0;
        }
        self.inner.push_slice(samples)
    }

    pub fn available_data(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn available_space(&self) -> usize {
        self.levels().available_space
    }

    pub fn levels(&self) -> RingLevels {
        levels(self.capacity, self.inner.occupied_len())
    }

    /// Total slots `N`, including the one that always stays empty.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl SampleConsumer {
    /// Read exactly `n` samples, or nothing at all.
    ///
    /// Returns `None` without consuming anything when fewer than `n` samples
    /// are available. `n == 0` always succeeds with an empty vector.
    pub fn try_read(&mut self, n: usize) -> Option<Vec<f32>> {
        if n == 0 {
            return Some(Vec::new());
        }
        if self.inner.occupied_len() < n {
            return None;
        }
        let mut out = vec![0.0f32; n];
        let read = self.inner.pop_slice(&mut out);
        debug_assert_eq!(read, n);
        Some(out)
    }

    /// Fill `out` completely from the ring, or leave both untouched.
    ///
    /// Allocation-free variant of [`try_read`](Self::try_read) for pooled buffers.
    pub fn try_read_into(&mut self, out: &mut [f32]) -> bool {
        if out.is_empty() {
            return true;
        }
        if self.inner.occupied_len() < out.len() {
            return false;
        }
        let read = self.inner.pop_slice(out);
        debug_assert_eq!(read, out.len());
        true
    }

    /// Discard all unread samples. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        self.inner.clear()
    }

    pub fn available_data(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn available_space(&self) -> usize {
        self.levels().available_space
    }

    pub fn levels(&self) -> RingLevels {
        levels(self.capacity, self.inner.occupied_len())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
