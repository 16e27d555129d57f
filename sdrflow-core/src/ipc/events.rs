//! Event types delivered to downstream collaborators (rendering, classification).
//!
//! ## Channels
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `SpectrumEvent` | `SpectrumEngine::subscribe_spectra` |
//! | `EngineStatusEvent` | `SpectrumEngine::subscribe_status` |
//!
//! All types serialise camelCase so they can be forwarded to a UI process as JSON.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Spectrum events
// ---------------------------------------------------------------------------

/// Emitted once per frame the kernel processed successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectrumEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Index of the source frame within the engine run.
    pub frame: u64,
    /// Tuner centre frequency of the source frame, in Hz.
    pub center_frequency_hz: f64,
    pub sample_rate: u32,
    /// Kernel output (for the FFT kernel: power per bin in dBFS).
    pub bins: Vec<f32>,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted when the engine changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the spectrum engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Draining the ring and dispatching frames.
    Streaming,
    /// Drain loop stopped; engine may be restarted.
    Stopped,
    /// Drain loop hit an unrecoverable error.
    Error,
}
