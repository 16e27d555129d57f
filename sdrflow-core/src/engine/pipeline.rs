//! Blocking drain loop.
//!
//! ## Pipeline stages (per iteration)
//!
//! ```text
//! 1. Wait until the ring holds one full frame (sleep drain_idle_ms otherwise)
//! 2. Check a block out of the BufferPool and try_read_into it
//! 3. Ask AdmissionLimits about the FFT pool's current MetricsSnapshot
//!    a. Shed  → buffer straight back to the pool, frame counted as shed
//!    b. Accept → submit to the FFT pool at frame_priority
//! 4. On a worker slot: kernel.process(frame); the buffer returns to the pool
//!    when the task's FrameLease drops (normal return, panic, or abandonment)
//! 5. Completion callback broadcasts a SpectrumEvent (or counts the failure)
//! ```
//!
//! The loop runs on its own named thread; it never waits on the kernel.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    buffering::{chunk::SampleFrame, pool::BufferPool, SampleConsumer},
    config::EngineConfig,
    dsp::KernelHandle,
    error::TaskError,
    ipc::events::SpectrumEvent,
    metrics::Admission,
    worker::WorkerPool,
};

pub struct PipelineDiagnostics {
    pub frames_in: AtomicUsize,
    pub frames_dispatched: AtomicUsize,
    pub frames_shed: AtomicUsize,
    pub kernel_errors: AtomicUsize,
    pub spectra_emitted: AtomicUsize,
    pub alloc_failures: AtomicUsize,
}

impl Default for PipelineDiagnostics {
    fn default() -> Self {
        Self {
            frames_in: AtomicUsize::new(0),
            frames_dispatched: AtomicUsize::new(0),
            frames_shed: AtomicUsize::new(0),
            kernel_errors: AtomicUsize::new(0),
            spectra_emitted: AtomicUsize::new(0),
            alloc_failures: AtomicUsize::new(0),
        }
    }
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.frames_in.store(0, Ordering::Relaxed);
        self.frames_dispatched.store(0, Ordering::Relaxed);
        self.frames_shed.store(0, Ordering::Relaxed);
        self.kernel_errors.store(0, Ordering::Relaxed);
        self.spectra_emitted.store(0, Ordering::Relaxed);
        self.alloc_failures.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            frames_shed: self.frames_shed.load(Ordering::Relaxed),
            kernel_errors: self.kernel_errors.load(Ordering::Relaxed),
            spectra_emitted: self.spectra_emitted.load(Ordering::Relaxed),
            alloc_failures: self.alloc_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub frames_dispatched: usize,
    pub frames_shed: usize,
    pub kernel_errors: usize,
    pub spectra_emitted: usize,
    pub alloc_failures: usize,
}

/// All context the drain loop needs, passed as one struct so the spawn closure stays tidy.
pub struct PipelineContext {
    pub config: EngineConfig,
    pub kernel: KernelHandle,
    pub consumer: SampleConsumer,
    pub running: Arc<AtomicBool>,
    pub fft_pool: Arc<WorkerPool>,
    pub buffers: Arc<BufferPool>,
    pub spectrum_tx: broadcast::Sender<SpectrumEvent>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Run the drain loop until `ctx.running` becomes false.
pub fn run(mut ctx: PipelineContext) {
    let frame_len = ctx.config.frame_len;
    let idle = Duration::from_millis(ctx.config.drain_idle_ms());
    info!(
        kernel = ctx.kernel.name(),
        frame_len,
        sample_rate = ctx.config.sample_rate,
        center_frequency_hz = ctx.config.center_frequency_hz,
        "pipeline started"
    );

    let mut next_frame = 0u64;

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        if ctx.consumer.available_data() < frame_len {
            std::thread::sleep(idle);
            continue;
        }

        let mut buffer = match ctx.buffers.acquire(frame_len) {
            Ok(buffer) => buffer,
            Err(e) => {
                ctx.diagnostics.alloc_failures.fetch_add(1, Ordering::Relaxed);
                warn!(frame_len, error = %e, "could not check out a frame buffer");
                std::thread::sleep(idle);
                continue;
            }
        };
        if !ctx.consumer.try_read_into(&mut buffer) {
            ctx.buffers.release(buffer);
            continue;
        }
        ctx.diagnostics.frames_in.fetch_add(1, Ordering::Relaxed);

        let frame = SampleFrame::new(
            next_frame,
            buffer,
            ctx.config.sample_rate,
            ctx.config.center_frequency_hz,
        );
        next_frame = next_frame.wrapping_add(1);

        let snapshot = ctx.fft_pool.metrics().get_metrics();
        if ctx.config.admission.evaluate(&snapshot) == Admission::Shed {
            ctx.diagnostics.frames_shed.fetch_add(1, Ordering::Relaxed);
            debug!(
                frame = frame.sequence,
                queue_depth = snapshot.queue_depth,
                avg_ms = snapshot.avg_processing_time,
                "backpressure, frame shed"
            );
            ctx.buffers.release(frame.into_buffer());
            continue;
        }

        dispatch_frame(&ctx, frame);
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        frames_in = snap.frames_in,
        frames_dispatched = snap.frames_dispatched,
        frames_shed = snap.frames_shed,
        kernel_errors = snap.kernel_errors,
        spectra_emitted = snap.spectra_emitted,
        alloc_failures = snap.alloc_failures,
        "pipeline stopped, diagnostics"
    );
}

/// A frame checked out of the `BufferPool`; dropping it hands the buffer back.
struct FrameLease {
    frame: Option<SampleFrame>,
    buffers: Arc<BufferPool>,
}

impl FrameLease {
    fn new(frame: SampleFrame, buffers: Arc<BufferPool>) -> Self {
        Self {
            frame: Some(frame),
            buffers,
        }
    }

    fn samples(&self) -> &[f32] {
        self.frame.as_ref().map(SampleFrame::samples).unwrap_or(&[])
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.buffers.release(frame.into_buffer());
        }
    }
}

/// Hand one admitted frame to the FFT pool.
fn dispatch_frame(ctx: &PipelineContext, frame: SampleFrame) {
    let frame_index = frame.sequence;
    let center_frequency_hz = frame.center_frequency_hz;
    let sample_rate = frame.sample_rate;

    let kernel = ctx.kernel.clone();
    let lease = FrameLease::new(frame, Arc::clone(&ctx.buffers));
    let spectrum_tx = ctx.spectrum_tx.clone();
    let seq = Arc::clone(&ctx.seq);
    let diagnostics = Arc::clone(&ctx.diagnostics);

    ctx.diagnostics
        .frames_dispatched
        .fetch_add(1, Ordering::Relaxed);

    ctx.fft_pool.submit_with_callback(
        move |lease: FrameLease| kernel.process(lease.samples()),
        lease,
        ctx.config.frame_priority,
        move |outcome: Result<Vec<f32>, TaskError>| match outcome {
            Ok(bins) => {
                let event = SpectrumEvent {
                    seq: seq.fetch_add(1, Ordering::Relaxed),
                    frame: frame_index,
                    center_frequency_hz,
                    sample_rate,
                    bins,
                };
                diagnostics.spectra_emitted.fetch_add(1, Ordering::Relaxed);
                let delivered = spectrum_tx.send(event).is_ok();
                debug!(frame = frame_index, delivered, "spectrum emitted");
            }
            Err(e) => {
                diagnostics.kernel_errors.fetch_add(1, Ordering::Relaxed);
                debug!(frame = frame_index, error = %e, "frame produced no spectrum");
            }
        },
    );
}
