//! Windowed FFT power-spectrum kernel via `rustfft`.
//!
//! Input: one frame of interleaved I/Q (`2 * size` values).
//! Output: `size` bins in dBFS, shifted so DC sits in the middle
//! (bin 0 = most negative frequency).
//!
//! | Step        | Detail                                   |
//! |-------------|------------------------------------------|
//! | Window      | Hann, `size` taps                        |
//! | Transform   | forward complex FFT, planned once        |
//! | Scale       | `|X|^2 / (Σw)^2`, so a full-scale tone ≈ 0 dB |
//! | Floor       | `MIN_POWER_DB`                           |

use std::sync::Arc;

use anyhow::{bail, ensure};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::SpectrumKernel;

/// Power reported for empty bins.
pub const MIN_POWER_DB: f32 = -200.0;

pub struct FftKernel {
    size: usize,
    window: Vec<f32>,
    window_gain: f32,
    fft: Arc<dyn Fft<f32>>,
}

impl FftKernel {
    /// Plan a forward FFT of `size` complex points.
    pub fn new(size: usize) -> anyhow::Result<Self> {
        ensure!(size >= 2, "FFT size must be at least 2 (got {size})");
        let window = build_hann_window(size);
        let window_gain = window.iter().sum::<f32>();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(size);
        Ok(Self {
            size,
            window,
            window_gain,
            fft,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

fn build_hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / size as f32;
            0.5 - 0.5 * phase.cos()
        })
        .collect()
}

impl SpectrumKernel for FftKernel {
    fn name(&self) -> &str {
        "fft"
    }

    fn frame_len(&self) -> Option<usize> {
        Some(self.size * 2)
    }

    fn process(&self, frame: &[f32]) -> anyhow::Result<Vec<f32>> {
        if frame.len() != self.size * 2 {
            bail!(
                "expected {} interleaved IQ values, got {}",
                self.size * 2,
                frame.len()
            );
        }

        let mut bins: Vec<Complex<f32>> = frame
            .chunks_exact(2)
            .zip(&self.window)
            .map(|(iq, w)| Complex::new(iq[0] * w, iq[1] * w))
            .collect();
        self.fft.process(&mut bins);

        let scale = self.window_gain * self.window_gain;
        let half = self.size / 2;
        let power = (0..self.size)
            .map(|i| {
                let bin = bins[(i + self.size - half) % self.size];
                let p = bin.norm_sqr() / scale;
                if p > 0.0 {
                    (10.0 * p.log10()).max(MIN_POWER_DB)
                } else {
                    MIN_POWER_DB
                }
            })
            .collect();
        Ok(power)
    }
}
