//! Caller-side handle of a running operation.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use hotrod_core::{HotRodError, Result};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// Awaitable result of an operation running on its own task.
///
/// Dropping the handle leaves the operation running. [`OperationHandle::cancel`]
/// stops the task; a request already written may still be executed by the
/// server.
#[derive(Debug)]
#[must_use = "the result of an operation is only observed by awaiting its handle"]
pub struct OperationHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
    abort: AbortHandle,
}

impl<T: Send + 'static> OperationHandle<T> {
    /// Runs `operation` on a new task.
    pub(crate) fn spawn<F>(operation: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let _ = tx.send(operation.await);
        });
        Self {
            rx,
            abort: task.abort_handle(),
        }
    }
}

impl<T> OperationHandle<T> {
    /// Stops the operation. Awaiting the handle afterwards yields `Cancelled`.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Returns `true` once the operation task has ended.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

impl<T> Future for OperationHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(HotRodError::Cancelled)))
    }
}
