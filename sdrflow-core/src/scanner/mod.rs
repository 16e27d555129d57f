//! Band scanning on the generic DSP pool.
//!
//! A scan request is cut into independently schedulable tasks, each task
//! measures a run of frequencies through a [`PowerProbe`], and the results are
//! stitched back together in request order no matter which slot finishes
//! first:
//!
//! ```text
//! scan_band ─► [task 0][task 1]…[task k] ─► DSP pool ─► (index, points) ─► reorder slots ─► Vec
//! ```
//!
//! [`find_active_signals`] is pure post-processing over finished results.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{Result, SdrflowError, TaskError},
    scheduler::Priority,
    worker::WorkerPool,
};

/// Default number of frequency steps measured by one task.
pub const DEFAULT_STEPS_PER_TASK: usize = 64;

/// Largest number of points a single range may expand to.
pub const MAX_STEPS_PER_RANGE: usize = 1 << 20;

/// Measures received power at one frequency.
///
/// Implemented for any `Fn(f64) -> anyhow::Result<f32>` closure.
pub trait PowerProbe: Send + Sync + 'static {
    /// Power in dB at `frequency_hz`.
    fn measure(&self, frequency_hz: f64) -> anyhow::Result<f32>;
}

impl<F> PowerProbe for F
where
    F: Fn(f64) -> anyhow::Result<f32> + Send + Sync + 'static,
{
    fn measure(&self, frequency_hz: f64) -> anyhow::Result<f32> {
        self(frequency_hz)
    }
}

/// One measured point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanPoint {
    pub frequency: f64,
    pub power: f32,
}

/// A band to sweep: `[center - span/2, center + span/2]` every `step_hz`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRange {
    pub center_hz: f64,
    pub span_hz: f64,
    pub step_hz: f64,
}

impl ScanRange {
    pub fn new(center_hz: f64, span_hz: f64, step_hz: f64) -> Self {
        Self {
            center_hz,
            span_hz,
            step_hz,
        }
    }

    /// Expand into the ordered list of frequencies to measure.
    ///
    /// # Errors
    /// `SdrflowError::InvalidScan` for non-finite values, a non-positive step,
    /// a negative span, or more than `MAX_STEPS_PER_RANGE` points.
    pub fn frequencies(&self) -> Result<Vec<f64>> {
        let Self {
            center_hz,
            span_hz,
            step_hz,
        } = *self;
        if !(center_hz.is_finite() && span_hz.is_finite() && step_hz.is_finite()) {
            return Err(SdrflowError::InvalidScan(format!(
                "non-finite range parameters: {self:?}"
            )));
        }
        if step_hz <= 0.0 {
            return Err(SdrflowError::InvalidScan(format!(
                "step must be positive (got {step_hz} Hz)"
            )));
        }
        if span_hz < 0.0 {
            return Err(SdrflowError::InvalidScan(format!(
                "span must not be negative (got {span_hz} Hz)"
            )));
        }

        // Small tolerance so that e.g. span 1e6 / step 1e5 yields 11 points.
        let steps = (span_hz / step_hz + 1e-9).floor();
        if steps >= MAX_STEPS_PER_RANGE as f64 {
            return Err(SdrflowError::InvalidScan(format!(
                "range expands to more than {MAX_STEPS_PER_RANGE} points"
            )));
        }
        let start = center_hz - span_hz / 2.0;
        Ok((0..=steps as usize)
            .map(|i| start + i as f64 * step_hz)
            .collect())
    }
}

/// A contiguous run of above-floor points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSignal {
    pub start_frequency: f64,
    pub end_frequency: f64,
    pub peak_frequency: f64,
    pub peak_power: f32,
    /// `peak_power - noise_floor`, in dB.
    pub snr: f32,
    /// Number of scan points merged into this signal.
    pub points: usize,
}

impl ActiveSignal {
    pub fn bandwidth(&self) -> f64 {
        self.end_frequency - self.start_frequency
    }
}

/// Runs whose neighbours sit further apart than this many steps are split.
const GAP_TOLERANCE_STEPS: f64 = 1.5;

/// Merge runs of points whose power exceeds `noise_floor` into signals.
///
/// Points are considered in ascending frequency order; `NaN` power counts as
/// below the floor. The scan step is taken to be the smallest spacing between
/// neighbouring points, and two above-floor points further apart than that
/// (for example the edges of two separate ranges) never share a signal. Use
/// [`find_active_signals_with_step`] when the input mixes step sizes.
/// Pure: touches no pool or queue.
pub fn find_active_signals(results: &[ScanPoint], noise_floor: f32) -> Vec<ActiveSignal> {
    let sorted = sorted_by_frequency(results);
    let step_hz = sorted
        .windows(2)
        .map(|pair| pair[1].frequency - pair[0].frequency)
        .filter(|gap| *gap > 0.0)
        .min_by(f64::total_cmp);
    merge_runs(sorted, noise_floor, step_hz)
}

/// Like [`find_active_signals`], with the step between adjacent points given.
///
/// A non-positive or non-finite `step_hz` disables gap splitting.
pub fn find_active_signals_with_step(
    results: &[ScanPoint],
    noise_floor: f32,
    step_hz: f64,
) -> Vec<ActiveSignal> {
    let step_hz = (step_hz.is_finite() && step_hz > 0.0).then_some(step_hz);
    merge_runs(sorted_by_frequency(results), noise_floor, step_hz)
}

fn sorted_by_frequency(results: &[ScanPoint]) -> Vec<ScanPoint> {
    let mut sorted = results.to_vec();
    sorted.sort_by(|a, b| a.frequency.total_cmp(&b.frequency));
    sorted
}

fn merge_runs(sorted: Vec<ScanPoint>, noise_floor: f32, step_hz: Option<f64>) -> Vec<ActiveSignal> {
    let max_gap = step_hz.map(|step| step * GAP_TOLERANCE_STEPS);
    let mut signals = Vec::new();
    let mut current: Option<ActiveSignal> = None;

    for point in sorted {
        let above_floor = point.power > noise_floor;
        if !above_floor {
            signals.extend(current.take());
            continue;
        }
        if let (Some(signal), Some(max_gap)) = (current.as_ref(), max_gap) {
            if point.frequency - signal.end_frequency > max_gap {
                signals.extend(current.take());
            }
        }
        match current.as_mut() {
            Some(signal) => {
                signal.end_frequency = point.frequency;
                signal.points += 1;
                if point.power > signal.peak_power {
                    signal.peak_power = point.power;
                    signal.peak_frequency = point.frequency;
                    signal.snr = point.power - noise_floor;
                }
            }
            None => {
                current = Some(ActiveSignal {
                    start_frequency: point.frequency,
                    end_frequency: point.frequency,
                    peak_frequency: point.frequency,
                    peak_power: point.power,
                    snr: point.power - noise_floor,
                    points: 1,
                });
            }
        }
    }
    signals.extend(current);
    signals
}

/// Fans scan requests out over a shared DSP [`WorkerPool`].
pub struct BandScanner {
    pool: Arc<WorkerPool>,
    probe: Arc<dyn PowerProbe>,
    steps_per_task: usize,
    priority: Priority,
}

impl BandScanner {
    pub fn new<P: PowerProbe>(pool: Arc<WorkerPool>, probe: P) -> Self {
        Self {
            pool,
            probe: Arc::new(probe),
            steps_per_task: DEFAULT_STEPS_PER_TASK,
            priority: Priority::BACKGROUND,
        }
    }

    /// Frequencies measured per task (at least one).
    pub fn with_steps_per_task(mut self, steps: usize) -> Self {
        self.steps_per_task = steps.max(1);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sweep one band and return its points in ascending frequency order.
    ///
    /// Blocks the caller until every step task has completed, so it must not
    /// be called from a task running on the scanner's own pool: with every
    /// slot waiting on itself no step could ever run. Such calls are refused.
    ///
    /// # Errors
    /// - `SdrflowError::InvalidScan` for malformed parameters.
    /// - `SdrflowError::ReentrantScan` when called from one of the pool's slots.
    /// - `SdrflowError::Task` if any step failed; the earliest failing chunk wins.
    pub fn scan_band(&self, center_hz: f64, span_hz: f64, step_hz: f64) -> Result<Vec<ScanPoint>> {
        let frequencies = ScanRange::new(center_hz, span_hz, step_hz).frequencies()?;
        let batches: Vec<Vec<f64>> = frequencies
            .chunks(self.steps_per_task)
            .map(<[f64]>::to_vec)
            .collect();
        debug!(
            center_hz,
            span_hz,
            step_hz,
            points = frequencies.len(),
            tasks = batches.len(),
            "scan_band"
        );
        let per_task = self.run_ordered(batches)?;
        Ok(per_task.into_iter().flatten().collect())
    }

    /// Sweep several bands, one task per band, returning results in input order.
    ///
    /// # Errors
    /// Same as [`scan_band`](Self::scan_band), including the restriction on
    /// calling from the pool's own slots; every range is validated before
    /// anything is submitted.
    pub fn batch_scan_ranges(&self, ranges: &[ScanRange]) -> Result<Vec<Vec<ScanPoint>>> {
        let batches = ranges
            .iter()
            .map(ScanRange::frequencies)
            .collect::<Result<Vec<_>>>()?;
        debug!(ranges = ranges.len(), "batch_scan_ranges");
        self.run_ordered(batches)
    }

    /// Submit one task per batch and collect results by task index.
    fn run_ordered(&self, batches: Vec<Vec<f64>>) -> Result<Vec<Vec<ScanPoint>>> {
        if self.pool.is_worker_thread() {
            warn!(pool = %self.pool.name(), "refusing scan from one of its own worker slots");
            return Err(SdrflowError::ReentrantScan {
                pool: self.pool.name().to_string(),
            });
        }
        let total = batches.len();
        let (tx, rx) = crossbeam_channel::unbounded();

        for (index, batch) in batches.into_iter().enumerate() {
            let probe = Arc::clone(&self.probe);
            let tx = tx.clone();
            self.pool.submit_with_callback(
                move |frequencies: Vec<f64>| measure_batch(probe.as_ref(), &frequencies),
                batch,
                self.priority,
                move |outcome| {
                    let _ = tx.send((index, outcome));
                },
            );
        }
        // Only the task callbacks hold senders now; a dropped task disconnects.
        drop(tx);

        let mut slots: Vec<Option<std::result::Result<Vec<ScanPoint>, TaskError>>> =
            (0..total).map(|_| None).collect();
        for _ in 0..total {
            let (index, outcome) = rx.recv().map_err(|_| {
                SdrflowError::Task(TaskError::PoolShutDown(self.pool.name().to_string()))
            })?;
            slots[index] = Some(outcome);
        }

        slots
            .into_iter()
            .map(|slot| match slot {
                Some(Ok(points)) => Ok(points),
                Some(Err(e)) => {
                    warn!(error = %e, "scan task failed");
                    Err(SdrflowError::Task(e))
                }
                None => Err(SdrflowError::Task(TaskError::Cancelled)),
            })
            .collect()
    }
}

fn measure_batch(probe: &dyn PowerProbe, frequencies: &[f64]) -> anyhow::Result<Vec<ScanPoint>> {
    frequencies
        .iter()
        .map(|&frequency| {
            let power = probe.measure(frequency)?;
            Ok(ScanPoint { frequency, power })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::PoolConfig;
    use approx::assert_relative_eq;
    use std::time::Duration;

    fn dsp_pool(workers: usize) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(&PoolConfig::dsp().with_workers(workers)).expect("spawn pool"))
    }

    fn flat_probe(frequency: f64) -> anyhow::Result<f32> {
        Ok((frequency / 1e6) as f32)
    }

    #[test]
    fn range_expands_inclusive_of_both_edges() {
        let freqs = ScanRange::new(100e6, 1e6, 100e3).frequencies().expect("range");
        assert_eq!(freqs.len(), 11);
        assert_relative_eq!(freqs[0], 99.5e6);
        assert_relative_eq!(freqs[10], 100.5e6, max_relative = 1e-12);
    }

    #[test]
    fn zero_span_is_a_single_point() {
        let freqs = ScanRange::new(433.92e6, 0.0, 25e3).frequencies().expect("range");
        assert_eq!(freqs, vec![433.92e6]);
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        assert!(ScanRange::new(1e6, 1e3, 0.0).frequencies().is_err());
        assert!(ScanRange::new(1e6, 1e3, -5.0).frequencies().is_err());
        assert!(ScanRange::new(1e6, -1e3, 5.0).frequencies().is_err());
        assert!(ScanRange::new(f64::NAN, 1e3, 5.0).frequencies().is_err());
        assert!(ScanRange::new(1e9, 1e9, 1.0).frequencies().is_err());
    }

    #[test]
    fn scan_band_preserves_frequency_order_across_tasks() {
        let pool = dsp_pool(4);
        // Later frequencies finish first: the reorder slots must undo that.
        let probe = |frequency: f64| -> anyhow::Result<f32> {
            let offset = (101e6 - frequency) / 1e6;
            std::thread::sleep(Duration::from_micros((offset * 2_000.0) as u64));
            Ok(frequency as f32)
        };
        let scanner = BandScanner::new(pool, probe).with_steps_per_task(3);
        let points = scanner.scan_band(100e6, 2e6, 100e3).expect("scan");

        assert_eq!(points.len(), 21);
        for pair in points.windows(2) {
            assert!(pair[0].frequency < pair[1].frequency);
        }
        assert_relative_eq!(points[0].frequency, 99e6);
    }

    #[test]
    fn batch_scan_returns_ranges_in_input_order() {
        let pool = dsp_pool(3);
        let scanner = BandScanner::new(pool, flat_probe);
        let ranges = [
            ScanRange::new(460e6, 50e3, 12.5e3),
            ScanRange::new(88e6, 200e3, 100e3),
            ScanRange::new(1090e6, 0.0, 1.0),
        ];
        let results = scanner.batch_scan_ranges(&ranges).expect("batch");
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].len(), 5);
        assert_eq!(results[1].len(), 3);
        assert_eq!(results[2].len(), 1);
        assert_relative_eq!(results[1][0].frequency, 87.9e6);
        assert_relative_eq!(results[2][0].power, 1090.0);
    }

    #[test]
    fn empty_batch_is_empty() {
        let scanner = BandScanner::new(dsp_pool(1), flat_probe);
        assert!(scanner.batch_scan_ranges(&[]).expect("batch").is_empty());
    }

    #[test]
    fn invalid_range_in_batch_submits_nothing() {
        let pool = dsp_pool(1);
        let scanner = BandScanner::new(Arc::clone(&pool), flat_probe);
        let ranges = [ScanRange::new(88e6, 1e6, 1e5), ScanRange::new(88e6, 1e6, 0.0)];
        assert!(matches!(
            scanner.batch_scan_ranges(&ranges),
            Err(SdrflowError::InvalidScan(_))
        ));
        assert_eq!(pool.metrics().get_metrics().total_operations, 0);
    }

    #[test]
    fn probe_failure_fails_the_scan() {
        let probe = |frequency: f64| -> anyhow::Result<f32> {
            if frequency > 100e6 {
                anyhow::bail!("tuner refused {frequency}");
            }
            Ok(-90.0)
        };
        let scanner = BandScanner::new(dsp_pool(2), probe).with_steps_per_task(2);
        let err = scanner.scan_band(100e6, 1e6, 250e3).expect_err("should fail");
        assert!(matches!(err, SdrflowError::Task(TaskError::Failed(_))));
    }

    #[test]
    fn shut_down_pool_reports_error() {
        let pool = dsp_pool(1);
        pool.shutdown();
        let scanner = BandScanner::new(pool, flat_probe);
        assert!(matches!(
            scanner.scan_band(100e6, 1e5, 1e4),
            Err(SdrflowError::Task(TaskError::PoolShutDown(_)))
        ));
    }

    #[test]
    fn active_signals_merge_contiguous_points() {
        let points: Vec<ScanPoint> = [
            (100.0, -95.0),
            (101.0, -60.0),
            (102.0, -40.0),
            (103.0, -70.0),
            (104.0, -95.0),
            (105.0, -50.0),
            (106.0, -96.0),
        ]
        .iter()
        .map(|&(frequency, power)| ScanPoint { frequency, power })
        .collect();

        let signals = find_active_signals(&points, -80.0);
        assert_eq!(signals.len(), 2);

        let first = signals[0];
        assert_eq!(first.start_frequency, 101.0);
        assert_eq!(first.end_frequency, 103.0);
        assert_eq!(first.peak_frequency, 102.0);
        assert_eq!(first.peak_power, -40.0);
        assert_eq!(first.points, 3);
        assert_relative_eq!(first.snr, 40.0);
        assert_relative_eq!(first.bandwidth(), 2.0);

        let second = signals[1];
        assert_eq!(second.peak_frequency, 105.0);
        assert_eq!(second.points, 1);
    }

    #[test]
    fn scan_from_a_slot_of_the_same_pool_is_refused() {
        let pool = dsp_pool(1);
        let scanner = Arc::new(BandScanner::new(Arc::clone(&pool), flat_probe));

        let nested = Arc::clone(&scanner);
        let handle = pool.submit(
            move |_: ()| Ok(nested.scan_band(100e6, 1e5, 1e4)),
            (),
            Priority::NORMAL,
        );
        let (tx, rx) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            let _ = tx.send(handle.wait());
        });
        let inner = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("nested scan must not hang the pool")
            .expect("outer task");
        assert!(matches!(inner, Err(SdrflowError::ReentrantScan { pool }) if pool == "dsp"));

        // Scans from outside the pool still work, and from another pool too.
        assert_eq!(scanner.scan_band(100e6, 1e5, 1e4).expect("scan").len(), 11);
        let other = dsp_pool(1);
        let nested = Arc::clone(&scanner);
        let points = other
            .submit(move |_: ()| Ok(nested.scan_band(100e6, 1e5, 1e4)), (), Priority::NORMAL)
            .wait()
            .expect("outer task")
            .expect("scan from another pool");
        assert_eq!(points.len(), 11);
    }

    #[test]
    fn active_signals_split_across_frequency_gaps() {
        // Two ranges 50 kHz apart, both above the floor at their facing edges.
        let points: Vec<ScanPoint> = [
            (88.000e6, -60.0),
            (88.005e6, -55.0),
            (88.010e6, -62.0),
            (88.060e6, -58.0),
            (88.065e6, -50.0),
        ]
        .iter()
        .map(|&(frequency, power)| ScanPoint { frequency, power })
        .collect();

        let signals = find_active_signals(&points, -90.0);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].points, 3);
        assert_eq!(signals[0].end_frequency, 88.010e6);
        assert_eq!(signals[1].start_frequency, 88.060e6);
        assert_eq!(signals[1].peak_power, -50.0);

        assert_eq!(find_active_signals_with_step(&points, -90.0, 5e3).len(), 2);
        assert_eq!(find_active_signals_with_step(&points, -90.0, 50e3).len(), 1);
        assert_eq!(find_active_signals_with_step(&points, -90.0, 0.0).len(), 1);
    }

    #[test]
    fn active_signals_handle_unsorted_input_and_edges() {
        let points = vec![
            ScanPoint { frequency: 3.0, power: -10.0 },
            ScanPoint { frequency: 1.0, power: -10.0 },
            ScanPoint { frequency: 2.0, power: f32::NAN },
        ];
        let signals = find_active_signals(&points, -50.0);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].start_frequency, 1.0);
        assert_eq!(signals[1].start_frequency, 3.0);

        assert!(find_active_signals(&[], -50.0).is_empty());
        assert!(find_active_signals(&points, 0.0).is_empty());
    }
}
