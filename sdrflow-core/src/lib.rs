//! # sdrflow-core
//!
//! Sample-processing core for a software-defined-radio pipeline.
//!
//! ## Architecture
//!
//! ```text
//! Capture → SampleProducer → SPSC RingBuffer → drain thread (sdrflow-drain)
//!                                                   │
//!                                     BufferPool checkout + AdmissionLimits
//!                                                   │
//!                            PriorityQueue → WorkerPool "fft" → SpectrumKernel
//!                                                   │
//!                                  broadcast::Sender<SpectrumEvent>
//!
//! BandScanner → WorkerPool "dsp" → PowerProbe → ordered Vec<ScanPoint>
//! ```
//!
//! The capture side only ever touches the ring. All heap work happens in the
//! drain thread and the worker slots; each pool feeds a `MetricsMonitor` that
//! the drain loop consults for backpressure.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod metrics;
pub mod scanner;
pub mod scheduler;
pub mod worker;

// Convenience re-exports for downstream crates
pub use buffering::{
    create_sample_ring,
    pool::{BufferPool, PoolStats, SampleBuffer},
    SampleConsumer, SampleProducer,
};
pub use config::EngineConfig;
pub use dsp::{KernelHandle, SpectrumKernel, StubKernel};
pub use engine::{pipeline::DiagnosticsSnapshot, SpectrumEngine};
pub use error::{SdrflowError, TaskError};
pub use ipc::events::{EngineStatus, EngineStatusEvent, SpectrumEvent};
pub use metrics::{Admission, AdmissionLimits, MetricsMonitor, MetricsSnapshot};
pub use scanner::{
    find_active_signals, find_active_signals_with_step, ActiveSignal, BandScanner, PowerProbe,
    ScanPoint, ScanRange,
};
pub use scheduler::{Priority, PriorityQueue};
pub use worker::{PoolConfig, TaskHandle, TaskId, WorkerPool};

#[cfg(feature = "fft")]
pub use dsp::FftKernel;
