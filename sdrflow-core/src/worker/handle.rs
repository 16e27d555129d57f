//! Completion handle returned by [`WorkerPool::submit`](super::WorkerPool::submit).

use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use tokio::sync::oneshot::{self, error::TryRecvError};

use super::{PoolShared, TaskId};
use crate::error::TaskError;

/// Eventual result of one submitted task.
///
/// Resolve it by `.await`ing (it is a `Future`), by the blocking [`wait`](Self::wait),
/// or by polling [`try_result`](Self::try_result). The handle does not keep
/// the pool alive.
pub struct TaskHandle<R> {
    rx: oneshot::Receiver<Result<R, TaskError>>,
    id: Option<TaskId>,
    pool: Weak<PoolShared>,
}

impl<R> TaskHandle<R> {
    pub(crate) fn new(
        rx: oneshot::Receiver<Result<R, TaskError>>,
        id: Option<TaskId>,
        pool: Weak<PoolShared>,
    ) -> Self {
        Self { rx, id, pool }
    }

    /// Queue id, or `None` if the pool refused the task.
    pub fn id(&self) -> Option<TaskId> {
        self.id
    }

    /// Remove the task from the queue if no slot has picked it up yet.
    ///
    /// The handle then resolves to `TaskError::Cancelled`. Returns `false`
    /// once the task is running or done.
    pub fn cancel(&self) -> bool {
        match (self.id, self.pool.upgrade()) {
            (Some(id), Some(pool)) => pool.cancel(id),
            _ => false,
        }
    }

    /// Block the current thread until the task completes.
    ///
    /// # Panics
    /// Panics if called from inside an async runtime; `.await` the handle there.
    pub fn wait(self) -> Result<R, TaskError> {
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(TaskError::Cancelled))
    }

    /// Non-blocking check; `None` while the task is still pending.
    pub fn try_result(&mut self) -> Option<Result<R, TaskError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(TaskError::Cancelled)),
        }
    }
}

impl<R> Future for TaskHandle<R> {
    type Output = Result<R, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(TaskError::Cancelled)))
    }
}

impl<R> std::fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
