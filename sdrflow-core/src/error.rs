use std::collections::TryReserveError;

use thiserror::Error;

/// All errors produced by sdrflow-core.
#[derive(Debug, Error)]
pub enum SdrflowError {
    #[error("invalid ring capacity {capacity}: need at least 2 slots")]
    InvalidRingCapacity { capacity: usize },

    #[error("invalid buffer size {requested} (allowed 1..={max})")]
    InvalidBufferSize { requested: usize, max: usize },

    #[error("failed to allocate {requested} samples")]
    Allocation {
        requested: usize,
        #[source]
        source: TryReserveError,
    },

    #[error("invalid metric sample: {0}")]
    InvalidMetric(String),

    #[error("invalid scan request: {0}")]
    InvalidScan(String),

    #[error("scan issued from a worker of the `{pool}` pool it would wait on")]
    ReentrantScan { pool: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("task failed: {0}")]
    Task(#[from] TaskError),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Outcome of a single task that did not produce a value.
///
/// Delivered on the task's completion channel; never escapes the worker slot
/// that ran it.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("compute function failed: {0:#}")]
    Failed(anyhow::Error),

    #[error("compute function panicked: {0}")]
    Panicked(String),

    #[error("task cancelled before dispatch")]
    Cancelled,

    #[error("worker pool `{0}` is shut down")]
    PoolShutDown(String),
}

pub type Result<T> = std::result::Result<T, SdrflowError>;
