//! Fan-out/join of fallible tasks sharing one cancellation token.
//!
//! [`Join`] runs N tasks concurrently and collapses their outcome into one
//! result: the first error by completion order, `Ok` when every task
//! succeeded, or the cancellation error when the shared token fires first.
//!
//! When the token is cancelled (or the deadline passes), `join` waits a
//! short grace interval so that an error racing the cancellation still
//! surfaces. Tasks that are still running after `join` returned are left
//! detached; their outcome is discarded.
//!
//! # Example
//!
//! ```
//! use janus_core::future::Join;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut join: Join = Join::new(CancellationToken::new());
//! let mut answer = join.spawn(|_token| async { Ok(42) });
//! join.spawn(|_token| async { Ok(()) });
//!
//! join.join().await.unwrap();
//! assert_eq!(answer.take(), Some(42));
//! # }
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How long `join` keeps listening for task errors after cancellation.
pub const GRACE_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of [`Join::join`] when it does not succeed.
#[derive(Debug, thiserror::Error)]
pub enum JoinError<E = anyhow::Error> {
    /// A task returned an error.
    #[error("{0}")]
    Task(E),

    /// A task panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The shared token was cancelled before all tasks finished.
    #[error("context canceled")]
    Cancelled,

    /// The deadline passed before all tasks finished.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl<E> JoinError<E> {
    /// Returns the task error, if this is one.
    pub fn into_task_error(self) -> Option<E> {
        match self {
            Self::Task(err) => Some(err),
            _ => None,
        }
    }
}

/// Slot holding a task's output once it completed successfully.
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Pending<T> {
    /// Takes the output. `None` if the task failed or has not finished.
    pub fn take(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// A group of fallible tasks joined into one outcome.
///
/// `join` consumes the group, so its result is observed exactly once.
#[derive(Debug)]
pub struct Join<E = anyhow::Error> {
    token: CancellationToken,
    deadline: Option<Instant>,
    tx: mpsc::UnboundedSender<Result<(), JoinError<E>>>,
    rx: mpsc::UnboundedReceiver<Result<(), JoinError<E>>>,
    spawned: usize,
}

impl<E: Send + 'static> Join<E> {
    /// Creates an empty group bound to `token`.
    pub fn new(token: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            token,
            deadline: None,
            tx,
            rx,
            spawned: 0,
        }
    }

    /// Bounds the whole join by an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The shared cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Number of spawned tasks.
    pub const fn len(&self) -> usize {
        self.spawned
    }

    /// Whether no task was spawned.
    pub const fn is_empty(&self) -> bool {
        self.spawned == 0
    }

    /// Schedules a task without blocking. The task receives a clone of the token.
    pub fn spawn<T, F, Fut>(&mut self, task: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (out_tx, out_rx) = oneshot::channel();
        let done = self.tx.clone();
        let fut = task(self.token.clone());
        self.spawned += 1;

        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(value)) => {
                    let _ = out_tx.send(value);
                    Ok(())
                }
                Ok(Err(err)) => Err(JoinError::Task(err)),
                Err(panic) => Err(JoinError::Panicked(panic_message(panic.as_ref()))),
            };
            // the receiver is gone once join returned early; that is fine
            let _ = done.send(outcome);
        });

        Pending { rx: out_rx }
    }

    /// Waits for all tasks, the first error, or cancellation.
    pub async fn join(self) -> Result<(), JoinError<E>> {
        let Self {
            token,
            deadline,
            tx,
            mut rx,
            spawned,
        } = self;
        drop(tx);

        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expired);

        let mut remaining = spawned;
        while remaining > 0 {
            tokio::select! {
                biased;
                outcome = rx.recv() => match outcome {
                    Some(Ok(())) => remaining -= 1,
                    Some(Err(err)) => return Err(err),
                    None => break,
                },
                () = token.cancelled() => {
                    return drain_within_grace(&mut rx, JoinError::Cancelled).await;
                }
                () = &mut expired => {
                    return drain_within_grace(&mut rx, JoinError::DeadlineExceeded).await;
                }
            }
        }
        Ok(())
    }
}

async fn drain_within_grace<E>(
    rx: &mut mpsc::UnboundedReceiver<Result<(), JoinError<E>>>,
    fallback: JoinError<E>,
) -> Result<(), JoinError<E>> {
    tokio::time::sleep(GRACE_INTERVAL).await;
    while let Ok(outcome) = rx.try_recv() {
        outcome?;
    }
    Err(fallback)
}

/// Extracts the message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_join_all_ok() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut join: Join = Join::new(CancellationToken::new());
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            join.spawn(move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(join.len(), 8);
        assert!(join.join().await.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_join_empty() {
        let join: Join = Join::new(CancellationToken::new());
        assert!(join.is_empty());
        assert!(join.join().await.is_ok());
    }

    #[tokio::test]
    async fn test_join_returns_first_error_by_completion() {
        let mut join: Join<&'static str> = Join::new(CancellationToken::new());
        join.spawn(|_| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<(), _>("slow")
        });
        join.spawn(|_| async { Err::<(), _>("fast") });
        join.spawn(|_| async { Ok(()) });

        let err = join.join().await.unwrap_err();
        assert_eq!(err.into_task_error(), Some("fast"));
    }

    #[tokio::test]
    async fn test_join_error_does_not_wait_for_others() {
        let mut join: Join<&'static str> = Join::new(CancellationToken::new());
        join.spawn(|_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        join.spawn(|_| async { Err::<(), _>("boom") });

        let result = tokio::time::timeout(Duration::from_secs(1), join.join()).await;
        assert!(matches!(result, Ok(Err(JoinError::Task("boom")))));
    }

    #[tokio::test]
    async fn test_join_cancelled_returns_within_grace() {
        let token = CancellationToken::new();
        let mut join: Join = Join::new(token.clone());
        join.spawn(|token| async move {
            // ignores the token on purpose: a stuck task must not block join
            let _ = token;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let started = std::time::Instant::now();
        token.cancel();
        let err = join.join().await.unwrap_err();
        assert!(matches!(err, JoinError::Cancelled));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_join_cancellation_surfaces_racing_error() {
        let token = CancellationToken::new();
        let mut join: Join<&'static str> = Join::new(token.clone());
        join.spawn(|token| async move {
            token.cancelled().await;
            Err::<(), _>("shutdown failed")
        });
        token.cancel();

        let err = join.join().await.unwrap_err();
        // either the racing error or the cancellation, never a hang
        assert!(matches!(
            err,
            JoinError::Task("shutdown failed") | JoinError::Cancelled
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_deadline() {
        let mut join: Join = Join::new(CancellationToken::new())
            .with_deadline(Instant::now() + Duration::from_millis(10));
        join.spawn(|_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });
        let err = join.join().await.unwrap_err();
        assert!(matches!(err, JoinError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_join_reports_panics() {
        let mut join: Join = Join::new(CancellationToken::new());
        join.spawn(|_| async {
            if true {
                panic!("listener exploded");
            }
            Ok(())
        });
        let err = join.join().await.unwrap_err();
        match err {
            JoinError::Panicked(msg) => assert_eq!(msg, "listener exploded"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pending_output_only_on_success() {
        let mut join: Join<String> = Join::new(CancellationToken::new());
        let mut ok = join.spawn(|_| async { Ok::<_, String>("value".to_string()) });
        let mut failed = join.spawn(|_| async { Err::<u8, _>("nope".to_string()) });

        assert!(join.join().await.is_err());
        // the failing task may finish before the successful one
        tokio::task::yield_now().await;
        assert!(failed.take().is_none());
        let _ = ok.take();
    }
}
