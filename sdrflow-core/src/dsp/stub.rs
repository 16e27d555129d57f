//! `StubKernel`: placeholder kernel that reports frame power without a transform.
//!
//! Produces a single bin holding the mean power of the frame so the whole
//! ring → pool → event path can be exercised without the `fft` feature.

use std::time::Duration;

use tracing::debug;

use super::SpectrumKernel;

/// Mean-power stub with an optional artificial processing delay.
#[derive(Debug, Clone, Default)]
pub struct StubKernel {
    delay: Option<Duration>,
}

impl StubKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every `process` call, to simulate heavy kernels.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

impl SpectrumKernel for StubKernel {
    fn name(&self) -> &str {
        "stub"
    }

    fn process(&self, frame: &[f32]) -> anyhow::Result<Vec<f32>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if frame.is_empty() {
            return Ok(vec![0.0]);
        }
        let power = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
        debug!(samples = frame.len(), power, "StubKernel::process");
        Ok(vec![power])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn reports_mean_power() {
        let kernel = StubKernel::new();
        let bins = kernel.process(&[0.5, -0.5, 0.5, -0.5]).expect("process");
        assert_eq!(bins.len(), 1);
        assert_relative_eq!(bins[0], 0.25);
    }

    #[test]
    fn empty_frame_is_zero_power() {
        assert_eq!(StubKernel::new().process(&[]).expect("process"), vec![0.0]);
    }
}
