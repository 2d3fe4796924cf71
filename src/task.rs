//! Cancellable asynchronous tasks.
//!
//! A [`TaskHandle`] owns the receiving end of a spawned computation plus a
//! [`CancelToken`]. Cancelling the token makes the handle resolve to
//! `ResponseError::Cancelled`, whatever the computation was doing.
//!
//! # Example
//!
//! ```ignore
//! let handle = service.execute(endpoint);
//! // ... later, the user navigated away
//! handle.cancel();
//! assert!(handle.await.unwrap_err().is_cancelled());
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{oneshot, Notify};

use crate::error::{NetworkError, Result};

#[derive(Debug, Default)]
struct CancelState {
  cancelled: AtomicBool,
  notify: Notify,
}

/// Cooperative cancellation flag shared between a handle and its work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  state: Arc<CancelState>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    if !self.state.cancelled.swap(true, Ordering::SeqCst) {
      self.state.notify.notify_waiters();
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.state.cancelled.load(Ordering::SeqCst)
  }

  /// Fail fast with `Cancelled` if cancellation was requested.
  pub fn check(&self) -> Result<()> {
    if self.is_cancelled() {
      Err(NetworkError::cancelled())
    } else {
      Ok(())
    }
  }

  /// Resolves once [`cancel`](Self::cancel) has been called.
  pub async fn cancelled(&self) {
    loop {
      let notified = self.state.notify.notified();
      if self.is_cancelled() {
        return;
      }
      notified.await;
    }
  }
}

/// Handle to an in-flight or completed computation producing `T`.
///
/// Dropping the handle detaches it; the work keeps running. Use
/// [`cancel`](Self::cancel) to stop it.
#[derive(Debug)]
pub struct TaskHandle<T> {
  token: CancelToken,
  receiver: oneshot::Receiver<Result<T>>,
}

impl<T: Send + 'static> TaskHandle<T> {
  /// Spawn `work` on the runtime, handing it the token it must observe.
  pub fn spawn<F, Fut>(work: F) -> Self
  where
    F: FnOnce(CancelToken) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let token = CancelToken::new();
    let (tx, rx) = oneshot::channel();
    let future = work(token.clone());
    let watch = token.clone();

    tokio::spawn(async move {
      let result = tokio::select! {
        biased;
        _ = watch.cancelled() => Err(NetworkError::cancelled()),
        result = future => result,
      };
      // A late cancel still wins over a value nobody asked to keep
      let result = match result {
        Ok(_) if watch.is_cancelled() => Err(NetworkError::cancelled()),
        other => other,
      };
      // Ignore send errors - the handle may have been dropped
      let _ = tx.send(result);
    });

    Self {
      token,
      receiver: rx,
    }
  }

  /// A handle that is already resolved.
  pub fn ready(result: Result<T>) -> Self {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(result);
    Self {
      token: CancelToken::new(),
      receiver: rx,
    }
  }
}

impl<T> TaskHandle<T> {
  pub fn cancel(&self) {
    self.token.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Wait for the result.
  pub async fn value(self) -> Result<T> {
    self.await
  }
}

impl<T> Future for TaskHandle<T> {
  type Output = Result<T>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    match Pin::new(&mut self.receiver).poll(cx) {
      Poll::Ready(Ok(result)) => Poll::Ready(result),
      // Sender dropped without sending - the task was aborted
      Poll::Ready(Err(_)) => Poll::Ready(Err(NetworkError::cancelled())),
      Poll::Pending => Poll::Pending,
    }
  }
}
