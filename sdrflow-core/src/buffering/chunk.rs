//! Typed sample frame passed from the ring buffer to the worker pools.

use super::pool::SampleBuffer;

/// A contiguous block of samples drained from the ring, tagged with capture metadata.
///
/// The buffer is owned outright; whoever holds the frame is responsible for
/// returning the buffer to its pool.
#[derive(Debug)]
pub struct SampleFrame {
    /// Monotonic index of this frame within the current engine run.
    pub sequence: u64,
    /// Interleaved I/Q or planar samples, depending on the kernel.
    pub buffer: SampleBuffer,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Tuner centre frequency at capture time, in Hz.
    pub center_frequency_hz: f64,
}

impl SampleFrame {
    pub fn new(sequence: u64, buffer: SampleBuffer, sample_rate: u32, center_frequency_hz: f64) -> Self {
        Self {
            sequence,
            buffer,
            sample_rate,
            center_frequency_hz,
        }
    }

    /// Duration covered by this frame, assuming one value per sample.
    pub fn duration_secs(&self) -> f64 {
        self.buffer.len() as f64 / self.sample_rate as f64
    }

    pub fn samples(&self) -> &[f32] {
        &self.buffer
    }

    pub fn into_buffer(self) -> SampleBuffer {
        self.buffer
    }
}
