//! Rolling-window performance monitor.
//!
//! Keeps the most recent [`WINDOW_CAPACITY`] processing durations plus a
//! queue-depth scalar. Its snapshot is the only signal callers use to decide
//! whether to keep submitting work; the monitor itself never throttles.
//!
//! ## Throughput sentinel
//!
//! `throughput = 1000 / avg_processing_time` (operations per second), capped
//! at [`THROUGHPUT_CEILING`]. An empty window reports `0.0`. A non-empty
//! window whose average is exactly zero reports `THROUGHPUT_CEILING`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SdrflowError};

/// Number of most recent samples the window keeps.
pub const WINDOW_CAPACITY: usize = 100;

/// Upper bound on reported throughput (one operation per microsecond).
pub const THROUGHPUT_CEILING: f64 = 1_000_000.0;

/// Point-in-time view of the monitor. Durations are in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub avg_processing_time: f64,
    pub min_processing_time: f64,
    pub max_processing_time: f64,
    /// Operations per second derived from the window average.
    pub throughput: f64,
    pub queue_depth: usize,
    pub total_operations: u64,
}

/// Recorder for processing latency and backlog.
pub struct MetricsMonitor {
    window: Mutex<VecDeque<f64>>,
    capacity: usize,
    queue_depth: AtomicUsize,
    total_operations: AtomicU64,
}

impl Default for MetricsMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsMonitor {
    pub fn new() -> Self {
        Self::with_window(WINDOW_CAPACITY)
    }

    /// Monitor with a custom window length (at least one sample).
    pub fn with_window(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            queue_depth: AtomicUsize::new(0),
            total_operations: AtomicU64::new(0),
        }
    }

    /// Append one processing duration, evicting the oldest beyond the window.
    ///
    /// # Errors
    /// `SdrflowError::InvalidMetric` for negative or non-finite durations.
    pub fn record_processing_time(&self, duration_ms: f64) -> Result<()> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(SdrflowError::InvalidMetric(format!(
                "processing time must be a finite, non-negative number of ms (got {duration_ms})"
            )));
        }
        self.push_sample(duration_ms);
        Ok(())
    }

    pub fn record_duration(&self, elapsed: Duration) {
        self.push_sample(elapsed.as_secs_f64() * 1_000.0);
    }

    fn push_sample(&self, duration_ms: f64) {
        let mut window = self.window.lock();
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(duration_ms);
        self.total_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn increment_queue_depth(&self) {
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn decrement_queue_depth(&self) {
        let _ = self
            .queue_depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |depth| {
                depth.checked_sub(1)
            });
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        let window = self.window.lock();
        let queue_depth = self.queue_depth.load(Ordering::Relaxed);
        let total_operations = self.total_operations.load(Ordering::Relaxed);

        if window.is_empty() {
            return MetricsSnapshot {
                queue_depth,
                total_operations,
                ..MetricsSnapshot::default()
            };
        }

        let (sum, min, max) = window.iter().fold(
            (0.0f64, f64::INFINITY, f64::NEG_INFINITY),
            |(sum, min, max), &sample| (sum + sample, min.min(sample), max.max(sample)),
        );
        let avg = sum / window.len() as f64;

        MetricsSnapshot {
            avg_processing_time: avg,
            min_processing_time: min,
            max_processing_time: max,
            throughput: throughput_for(avg),
            queue_depth,
            total_operations,
        }
    }

    /// Clear the window, the operation counter and the queue depth.
    pub fn reset(&self) {
        let mut window = self.window.lock();
        window.clear();
        self.total_operations.store(0, Ordering::Relaxed);
        self.queue_depth.store(0, Ordering::Relaxed);
    }
}

fn throughput_for(avg_ms: f64) -> f64 {
    if avg_ms <= 0.0 {
        THROUGHPUT_CEILING
    } else {
        (1_000.0 / avg_ms).min(THROUGHPUT_CEILING)
    }
}

/// Caller-side verdict on whether to submit more work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Admission {
    Accept,
    Shed,
}

/// Thresholds that turn a [`MetricsSnapshot`] into an [`Admission`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AdmissionLimits {
    /// Shed once this many tasks are outstanding.
    pub max_queue_depth: usize,
    /// Shed while the rolling average exceeds this many ms. `None` disables the check.
    pub max_avg_processing_ms: Option<f64>,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_queue_depth: 64,
            max_avg_processing_ms: None,
        }
    }
}

impl AdmissionLimits {
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Admission {
        if snapshot.queue_depth >= self.max_queue_depth {
            return Admission::Shed;
        }
        match self.max_avg_processing_ms {
            Some(limit) if snapshot.avg_processing_time > limit => Admission::Shed,
            _ => Admission::Accept,
        }
    }
}
