//! `SpectrumEngine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! SpectrumEngine::new()
//!     └─► start()        → ring created, drain thread spawned, status = Streaming
//!         │                (returns the SampleProducer to the capture side)
//!         └─► stop()     → running=false, drain thread joined, status = Stopped
//! ```
//!
//! `start()`/`stop()` in the wrong state return an error rather than panicking.
//! A stopped engine can be started again; each run gets a fresh ring.
//!
//! ## Threading
//!
//! The drain loop runs on a dedicated `sdrflow-drain` thread so the library
//! does not require a Tokio runtime. Spectra are delivered over
//! `tokio::sync::broadcast`, which works from both sync and async receivers.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::{
    buffering::{create_sample_ring, pool::BufferPool, pool::PoolStats, SampleProducer},
    config::EngineConfig,
    dsp::KernelHandle,
    error::{Result, SdrflowError},
    ipc::events::{EngineStatus, EngineStatusEvent, SpectrumEvent},
    metrics::{Admission, MetricsSnapshot},
    scanner::{BandScanner, PowerProbe},
    worker::WorkerPool,
};

/// Broadcast channel capacity: 256 spectra buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// The top-level engine handle.
///
/// `SpectrumEngine` is `Send + Sync`; all fields use interior mutability.
/// Wrap in `Arc<SpectrumEngine>` to share between a capture thread and
/// event-forwarding tasks.
pub struct SpectrumEngine {
    config: EngineConfig,
    kernel: KernelHandle,
    buffers: Arc<BufferPool>,
    fft_pool: Arc<WorkerPool>,
    dsp_pool: Arc<WorkerPool>,
    /// `true` while the drain thread is active.
    running: Arc<AtomicBool>,
    status: Arc<Mutex<EngineStatus>>,
    spectrum_tx: broadcast::Sender<SpectrumEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    /// Monotonically increasing spectrum event counter.
    seq: Arc<AtomicU64>,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl SpectrumEngine {
    /// Create an engine and spawn its worker pools. Does not start draining; call `start()`.
    ///
    /// # Errors
    /// - `SdrflowError::InvalidConfig` if the config is inconsistent or the
    ///   kernel requires a different frame length.
    /// - `SdrflowError::Io` if a worker thread cannot be spawned.
    pub fn new(config: EngineConfig, kernel: KernelHandle) -> Result<Self> {
        config.validate()?;
        if let Some(required) = kernel.frame_len() {
            if required != config.frame_len {
                return Err(SdrflowError::InvalidConfig(format!(
                    "kernel `{}` needs frames of {required} values, frameLen is {}",
                    kernel.name(),
                    config.frame_len
                )));
            }
        }

        let fft_pool = Arc::new(WorkerPool::new(&config.fft_pool)?);
        let dsp_pool = Arc::new(WorkerPool::new(&config.dsp_pool)?);
        // One block per FFT slot plus one being filled by the drain loop.
        let buffers = Arc::new(BufferPool::with_preallocated(
            config.frame_len,
            fft_pool.size() + 1,
        )?);

        let (spectrum_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        info!(
            kernel = kernel.name(),
            frame_len = config.frame_len,
            fft_workers = fft_pool.size(),
            dsp_workers = dsp_pool.size(),
            "spectrum engine created"
        );

        Ok(Self {
            config,
            kernel,
            buffers,
            fft_pool,
            dsp_pool,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            spectrum_tx,
            status_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
            drain: Mutex::new(None),
        })
    }

    /// Create the sample ring and start the drain thread.
    ///
    /// The returned producer is the only way to feed samples into this run.
    ///
    /// # Errors
    /// - `SdrflowError::AlreadyRunning` if already started.
    /// - `SdrflowError::Io` if the drain thread cannot be spawned.
    pub fn start(&self) -> Result<SampleProducer> {
        let mut drain = self.drain.lock();
        if self.running.load(Ordering::SeqCst) {
            return Err(SdrflowError::AlreadyRunning);
        }

        let (producer, consumer) = create_sample_ring(self.config.ring_capacity)?;
        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);

        let ctx = pipeline::PipelineContext {
            config: self.config.clone(),
            kernel: self.kernel.clone(),
            consumer,
            running: Arc::clone(&self.running),
            fft_pool: Arc::clone(&self.fft_pool),
            buffers: Arc::clone(&self.buffers),
            spectrum_tx: self.spectrum_tx.clone(),
            seq: Arc::clone(&self.seq),
            diagnostics: Arc::clone(&self.diagnostics),
        };

        let spawned = thread::Builder::new()
            .name("sdrflow-drain".into())
            .spawn(move || pipeline::run(ctx));
        match spawned {
            Ok(handle) => {
                *drain = Some(handle);
                self.set_status(EngineStatus::Streaming, None);
                info!(ring_capacity = self.config.ring_capacity, "engine started, streaming");
                Ok(producer)
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Stop the drain thread and wait for it to exit.
    ///
    /// Frames already submitted to the FFT pool still complete and broadcast.
    ///
    /// # Errors
    /// - `SdrflowError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        let mut drain = self.drain.lock();
        if !self.running.load(Ordering::SeqCst) {
            return Err(SdrflowError::NotRunning);
        }
        self.running.store(false, Ordering::SeqCst);
        info!("engine stop requested");

        if let Some(handle) = drain.take() {
            if handle.join().is_err() {
                error!("drain thread terminated abnormally");
                self.set_status(EngineStatus::Error, Some("drain thread panicked".into()));
                return Err(SdrflowError::Other(anyhow::anyhow!(
                    "drain thread panicked"
                )));
            }
        }
        self.set_status(EngineStatus::Stopped, None);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to processed spectra.
    pub fn subscribe_spectra(&self) -> broadcast::Receiver<SpectrumEvent> {
        self.spectrum_tx.subscribe()
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Load metrics of the FFT pool.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.fft_pool.metrics().get_metrics()
    }

    /// What the drain loop would decide for a frame arriving now.
    pub fn admission(&self) -> Admission {
        self.config.admission.evaluate(&self.metrics())
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn buffer_stats(&self) -> PoolStats {
        self.buffers.stats()
    }

    pub fn fft_pool(&self) -> &Arc<WorkerPool> {
        &self.fft_pool
    }

    pub fn dsp_pool(&self) -> &Arc<WorkerPool> {
        &self.dsp_pool
    }

    /// Band scanner that runs its probe batches on the DSP pool.
    pub fn band_scanner<P: PowerProbe>(&self, probe: P) -> BandScanner {
        BandScanner::new(Arc::clone(&self.dsp_pool), probe)
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl Drop for SpectrumEngine {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

impl std::fmt::Debug for SpectrumEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumEngine")
            .field("kernel", &self.kernel)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
