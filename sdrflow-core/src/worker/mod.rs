//! Fixed-size worker pool with priority-ordered dispatch.
//!
//! ## Threading
//!
//! ```text
//! submit() ──push──► PriorityQueue (parking_lot::Mutex) ──notify_one──► Condvar
//!                                                                          │
//!                          worker slot 0..W ◄──────────pop─────────────────┘
//!                                 │
//!                        catch_unwind(compute)
//!                                 │
//!                 MetricsMonitor  ◄┴► on_complete(Result<R, TaskError>)
//! ```
//!
//! Slots park on the condition variable while the queue is empty and are
//! woken by the push that makes work available. `submit` only takes the
//! queue lock long enough to insert.
//!
//! Two instances are normally created per engine: [`PoolConfig::fft`] for
//! heavy, coarse spectrum work and [`PoolConfig::dsp`] for short tasks such as
//! band-scan batches. Separate queues keep one class of work from starving the
//! other.

pub mod handle;

pub use handle::TaskHandle;

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, TaskError},
    metrics::MetricsMonitor,
    scheduler::{EntryId, Priority, PriorityQueue},
};

/// Identifier of a submitted task; valid until the task is dispatched.
pub type TaskId = EntryId;

/// Static configuration of one pool instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PoolConfig {
    /// Used for thread names and log fields.
    pub name: String,
    /// Number of worker slots. `0` means one per available hardware thread.
    pub workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::dsp()
    }
}

impl PoolConfig {
    /// Pool for FFT-class kernels.
    pub fn fft() -> Self {
        Self {
            name: "fft".into(),
            workers: 0,
        }
    }

    /// Generic pool for short DSP tasks.
    pub fn dsp() -> Self {
        Self {
            name: "dsp".into(),
            workers: 0,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Type-erased unit of queued work.
trait Job: Send + 'static {
    fn run(self: Box<Self>);

    /// Complete the task without running it.
    fn abandon(self: Box<Self>, reason: TaskError);
}

struct TaskJob<P, R, F, C> {
    payload: P,
    compute: F,
    on_complete: C,
    metrics: Arc<MetricsMonitor>,
    pool: Arc<str>,
    _result: PhantomData<fn() -> R>,
}

impl<P, R, F, C> Job for TaskJob<P, R, F, C>
where
    P: Send + 'static,
    R: Send + 'static,
    F: FnOnce(P) -> anyhow::Result<R> + Send + 'static,
    C: FnOnce(std::result::Result<R, TaskError>) + Send + 'static,
{
    fn run(self: Box<Self>) {
        let TaskJob {
            payload,
            compute,
            on_complete,
            metrics,
            pool,
            ..
        } = *self;

        let started = Instant::now();
        let outcome = match catch_unwind(AssertUnwindSafe(move || compute(payload))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TaskError::Failed(e)),
            Err(panic) => Err(TaskError::Panicked(panic_message(panic.as_ref()))),
        };
        let elapsed = started.elapsed();
        metrics.record_duration(elapsed);
        metrics.decrement_queue_depth();

        if let Err(ref e) = outcome {
            warn!(pool = %pool, error = %e, "task did not complete");
        } else {
            debug!(pool = %pool, elapsed_us = elapsed.as_micros() as u64, "task completed");
        }
        on_complete(outcome);
    }

    fn abandon(self: Box<Self>, reason: TaskError) {
        let TaskJob {
            on_complete,
            metrics,
            ..
        } = *self;
        metrics.decrement_queue_depth();
        on_complete(Err(reason));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// State shared between the pool handle, its slots and outstanding task handles.
pub(crate) struct PoolShared {
    name: Arc<str>,
    queue: Mutex<PriorityQueue<Box<dyn Job>>>,
    work_ready: Condvar,
    shutdown: AtomicBool,
    busy: AtomicUsize,
    metrics: Arc<MetricsMonitor>,
}

impl PoolShared {
    /// Remove a task that has not been dispatched yet.
    pub(crate) fn cancel(&self, id: TaskId) -> bool {
        let job = self.queue.lock().remove(id);
        match job {
            Some(job) => {
                debug!(pool = %self.name, task = id.seq(), "task cancelled before dispatch");
                job.abandon(TaskError::Cancelled);
                true
            }
            None => false,
        }
    }
}

/// A fixed set of worker threads draining one priority queue.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn the pool's worker slots with a fresh metrics monitor.
    ///
    /// # Errors
    /// `SdrflowError::Io` if the OS refuses to spawn a thread.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        Self::with_metrics(config, Arc::new(MetricsMonitor::new()))
    }

    /// Spawn the pool, reporting into an existing monitor.
    pub fn with_metrics(config: &PoolConfig, metrics: Arc<MetricsMonitor>) -> Result<Self> {
        let size = config.resolved_workers();
        let shared = Arc::new(PoolShared {
            name: Arc::from(config.name.as_str()),
            queue: Mutex::new(PriorityQueue::new()),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            busy: AtomicUsize::new(0),
            metrics,
        });

        let mut workers = Vec::with_capacity(size);
        for slot in 0..size {
            let shared_for_slot = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("sdrflow-{}-{slot}", config.name))
                .spawn(move || worker_loop(shared_for_slot, slot));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!(pool = %config.name, slot, "failed to spawn worker: {e}");
                    let pool = Self {
                        shared,
                        workers: Mutex::new(workers),
                        size,
                    };
                    pool.shutdown();
                    return Err(e.into());
                }
            }
        }

        info!(pool = %config.name, workers = size, "worker pool started");
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            size,
        })
    }

    /// Queue `compute(payload)` and return a handle to its eventual result.
    ///
    /// Never blocks on the computation. Completion can be awaited
    /// (`TaskHandle` is a `Future`), waited on, or polled.
    pub fn submit<P, R, F>(&self, compute: F, payload: P, priority: Priority) -> TaskHandle<R>
    where
        P: Send + 'static,
        R: Send + 'static,
        F: FnOnce(P) -> anyhow::Result<R> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let id = self.submit_with_callback(compute, payload, priority, move |outcome| {
            let _ = tx.send(outcome);
        });
        TaskHandle::new(rx, id, Arc::downgrade(&self.shared))
    }

    /// Queue `compute(payload)`; `on_complete` runs on the worker slot with the outcome.
    ///
    /// Returns `None` when the pool is shut down, in which case `on_complete`
    /// has already been called with `TaskError::PoolShutDown`.
    pub fn submit_with_callback<P, R, F, C>(
        &self,
        compute: F,
        payload: P,
        priority: Priority,
        on_complete: C,
    ) -> Option<TaskId>
    where
        P: Send + 'static,
        R: Send + 'static,
        F: FnOnce(P) -> anyhow::Result<R> + Send + 'static,
        C: FnOnce(std::result::Result<R, TaskError>) + Send + 'static,
    {
        let job: Box<dyn Job> = Box::new(TaskJob {
            payload,
            compute,
            on_complete,
            metrics: Arc::clone(&self.shared.metrics),
            pool: Arc::clone(&self.shared.name),
            _result: PhantomData,
        });
        self.shared.metrics.increment_queue_depth();

        let mut queue = self.shared.queue.lock();
        if self.shared.shutdown.load(Ordering::Acquire) {
            drop(queue);
            job.abandon(TaskError::PoolShutDown(self.shared.name.to_string()));
            return None;
        }
        let id = queue.push(job, priority);
        drop(queue);

        self.shared.work_ready.notify_one();
        Some(id)
    }

    /// Remove a queued task; returns `false` if it already started or finished.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.shared.cancel(id)
    }

    pub fn metrics(&self) -> &Arc<MetricsMonitor> {
        &self.shared.metrics
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Number of worker slots.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks waiting for a slot.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Slots currently executing a task.
    pub fn busy(&self) -> usize {
        self.shared.busy.load(Ordering::Relaxed)
    }

    /// Whether the calling thread is one of this pool's worker slots.
    pub fn is_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.workers
            .lock()
            .iter()
            .any(|handle| handle.thread().id() == current)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting work, let running tasks finish, join the slots, and
    /// complete every still-queued task with `TaskError::PoolShutDown`.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        {
            let _queue = self.shared.queue.lock();
            self.shared.shutdown.store(true, Ordering::Release);
        }
        self.shared.work_ready.notify_all();

        let handles = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                // Dropped from inside one of our own tasks; that slot exits on its own.
                continue;
            }
            if handle.join().is_err() {
                error!(pool = %self.shared.name, "worker slot terminated abnormally");
            }
        }

        let leftover = self.shared.queue.lock().drain();
        if !leftover.is_empty() {
            debug!(pool = %self.shared.name, abandoned = leftover.len(), "abandoning queued tasks");
        }
        for job in leftover {
            job.abandon(TaskError::PoolShutDown(self.shared.name.to_string()));
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

fn worker_loop(shared: Arc<PoolShared>, slot: usize) {
    debug!(pool = %shared.name, slot, "worker slot started");
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    debug!(pool = %shared.name, slot, "worker slot exiting");
                    return;
                }
                if let Some(job) = queue.pop() {
                    break job;
                }
                shared.work_ready.wait(&mut queue);
            }
        };

        shared.busy.fetch_add(1, Ordering::Relaxed);
        // Compute panics are caught inside the job; this only guards the callback.
        if catch_unwind(AssertUnwindSafe(|| job.run())).is_err() {
            error!(pool = %shared.name, slot, "completion callback panicked");
        }
        shared.busy.fetch_sub(1, Ordering::Relaxed);
    }
}
