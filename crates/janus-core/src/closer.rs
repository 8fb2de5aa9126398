//! Ordered teardown of resources at shutdown.
//!
//! Subsystems register a closer when they acquire something that must be
//! released (a database pool, a broker subscription, a client connection).
//! At shutdown the stack runs every closer last-registered-first, so a
//! resource is released before the resources it depends on.
//!
//! Each closer receives a [`CancellationToken`] that is cancelled when its
//! timeout expires, so work it hands off to other tasks can stop too.
//!
//! The server owns a stack of its own. [`CloserStack::global`] exists for
//! subsystems that are created before any server and still need cleanup.

use std::future::Future;
use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Default per-closer timeout.
pub const DEFAULT_CLOSER_TIMEOUT: Duration = Duration::from_secs(6 * 60);

type CloseFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

struct CloserEntry {
    name: String,
    order: usize,
    close: CloseFn,
}

/// Failure of a single closer.
#[derive(Debug, thiserror::Error)]
pub enum CloseError {
    /// The closer returned an error.
    #[error("closer `{name}` failed: {error:#}")]
    Failed {
        /// Closer name.
        name: String,
        /// The error it returned.
        error: anyhow::Error,
    },

    /// The closer did not finish within its timeout.
    #[error("closer `{name}` timed out after {timeout:?}")]
    TimedOut {
        /// Closer name.
        name: String,
        /// The timeout applied.
        timeout: Duration,
    },
}

/// Every failure collected by one [`CloserStack::run`].
#[derive(Debug, thiserror::Error)]
#[error("{} closer(s) failed: {}", .0.len(), join_messages(.0))]
pub struct CloseErrors(pub Vec<CloseError>);

fn join_messages(errors: &[CloseError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Append-only stack of teardown functions, consumed once at shutdown.
pub struct CloserStack {
    entries: Mutex<Vec<CloserEntry>>,
    registered: Mutex<usize>,
    timeout: Duration,
}

impl std::fmt::Debug for CloserStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloserStack")
            .field("pending", &self.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for CloserStack {
    fn default() -> Self {
        Self::new()
    }
}

impl CloserStack {
    /// Creates an empty stack with the default timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CLOSER_TIMEOUT)
    }

    /// Creates an empty stack with a custom per-closer timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            registered: Mutex::new(0),
            timeout,
        }
    }

    /// The process-wide stack.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<CloserStack>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Per-closer timeout.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Registers a closer. Closers run in reverse registration order.
    ///
    /// The token passed to `close` is cancelled once the closer's timeout
    /// expires.
    pub fn add<F, Fut>(&self, name: impl Into<String>, close: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let order = {
            let mut registered = self.registered.lock();
            *registered += 1;
            *registered
        };
        let entry = CloserEntry {
            name: name.into(),
            order,
            close: Box::new(move |token| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(close(token))
            }),
        };
        self.entries.lock().push(entry);
    }

    /// Closers not yet run.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no closer is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Runs every pending closer, last registered first.
    ///
    /// Continues past failures and returns them all. Errors caused by
    /// closing an already-closed standard stream are dropped. The caller
    /// must not run the same stack concurrently; a second run finds the
    /// stack empty.
    pub async fn run(&self) -> Result<(), CloseErrors> {
        let mut entries = std::mem::take(&mut *self.entries.lock());
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.order));

        let mut errors = Vec::new();
        for entry in entries {
            let CloserEntry { name, order, close } = entry;
            tracing::debug!(closer = %name, order, "running closer");

            let token = CancellationToken::new();
            let outcome = tokio::time::timeout(self.timeout, close(token.clone())).await;
            if outcome.is_err() {
                token.cancel();
            }
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) if is_std_stream_artifact(&error) => {
                    tracing::debug!(closer = %name, error = %error, "ignoring closed standard stream");
                }
                Ok(Err(error)) => {
                    tracing::error!(closer = %name, error = %error, "closer failed");
                    errors.push(CloseError::Failed { name, error });
                }
                Err(_) => {
                    tracing::error!(closer = %name, timeout = ?self.timeout, "closer timed out");
                    errors.push(CloseError::TimedOut {
                        name,
                        timeout: self.timeout,
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CloseErrors(errors))
        }
    }
}

const STD_STREAM_PATHS: [&str; 3] = ["/dev/stdout", "/dev/stderr", "/dev/stdin"];

fn is_std_stream_artifact(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        let broken_pipe = cause
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe);
        let text = cause.to_string();
        broken_pipe || STD_STREAM_PATHS.iter().any(|path| text.contains(path))
    })
}
