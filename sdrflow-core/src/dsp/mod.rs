//! Spectrum kernel abstraction.
//!
//! The `SpectrumKernel` trait decouples the pipeline from any specific DSP
//! algorithm (FFT power spectrum, demodulator, channel filter, etc.). The
//! engine only schedules, transports and times calls to `process`.
//!
//! Kernels take `&self` because one instance is shared by every worker slot
//! of the FFT pool; any per-call scratch space lives on the caller's stack.

#[cfg(feature = "fft")]
pub mod fft;
pub mod stub;

#[cfg(feature = "fft")]
pub use fft::FftKernel;
pub use stub::StubKernel;

use std::sync::Arc;

/// Contract for compute kernels run on the FFT worker pool.
pub trait SpectrumKernel: Send + Sync + 'static {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Number of `f32` values per input frame, if the kernel requires a fixed size.
    fn frame_len(&self) -> Option<usize> {
        None
    }

    /// Turn one frame of samples into output bins.
    ///
    /// # Errors
    /// Any error is reported as a failed task for this frame only.
    fn process(&self, frame: &[f32]) -> anyhow::Result<Vec<f32>>;
}

/// Shared, cloneable handle to any `SpectrumKernel` implementor.
#[derive(Clone)]
pub struct KernelHandle(pub Arc<dyn SpectrumKernel>);

impl KernelHandle {
    pub fn new<K: SpectrumKernel>(kernel: K) -> Self {
        Self(Arc::new(kernel))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn frame_len(&self) -> Option<usize> {
        self.0.frame_len()
    }

    pub fn process(&self, frame: &[f32]) -> anyhow::Result<Vec<f32>> {
        self.0.process(frame)
    }
}

impl std::fmt::Debug for KernelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelHandle")
            .field("name", &self.0.name())
            .finish_non_exhaustive()
    }
}
