//! Shutdown triggers and connection accounting.
//!
//! [`ShutdownHandle`] starts draining, either from code or from SIGINT /
//! SIGTERM. [`ConnectionTracker`] counts open connections per listener so
//! the drain sequence can wait for them, and [`drive_connection`] closes a
//! single connection gracefully or aborts it.
//!
//! # Example
//!
//! ```rust
//! use janus_server::ShutdownHandle;
//!
//! let handle = ShutdownHandle::new();
//! let observer = handle.clone();
//!
//! handle.shutdown();
//! assert!(observer.is_shutdown());
//! ```

use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hyper_util::server::graceful::GracefulConnection;
use janus_core::duration::parse_duration;
use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Environment variable holding the pre-stop delay.
pub const PRE_STOP_ENV: &str = "PRE_STOP";

/// Delay used when `PRE_STOP` is `0` or above [`MAX_PRE_STOP`].
pub const FALLBACK_PRE_STOP: Duration = Duration::from_secs(60);

/// Longest accepted pre-stop delay.
pub const MAX_PRE_STOP: Duration = Duration::from_secs(5 * 60);

/// Triggers and awaits the start of draining.
///
/// Clones share the trigger; triggering more than once is a no-op.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    /// Creates an untriggered handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts draining.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("shutdown requested");
        }
        self.token.cancel();
    }

    /// Whether draining was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once draining was requested; immediately if it already was.
    pub fn recv(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }

    /// Triggers this handle on SIGINT or SIGTERM.
    pub fn listen_os_signals(&self) {
        let handle = self.clone();
        tokio::spawn(async move {
            if wait_for_os_signal().await {
                handle.shutdown();
            }
        });
    }
}

/// Waits for SIGTERM or SIGINT; `false` if no handler could be installed.
async fn wait_for_os_signal() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "failed to install signal handlers");
                return false;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "shutdown signal received"),
            _ = sigint.recv() => tracing::info!(signal = "SIGINT", "shutdown signal received"),
        }
        true
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!(signal = "ctrl_c", "shutdown signal received");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to wait for ctrl-c");
                false
            }
        }
    }
}

/// Pre-stop delay from `PRE_STOP`, if set.
pub fn pre_stop_delay() -> Option<Duration> {
    std::env::var(PRE_STOP_ENV)
        .ok()
        .and_then(|value| parse_pre_stop(&value))
}

/// Parses a pre-stop delay; `0`, an unparsable value or more than five
/// minutes become one minute.
pub fn parse_pre_stop(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let delay = if value == "0" {
        Duration::ZERO
    } else {
        parse_duration(value).unwrap_or_else(|e| {
            tracing::warn!(value, error = %e, "invalid PRE_STOP, using the default delay");
            Duration::ZERO
        })
    };
    if delay.is_zero() || delay > MAX_PRE_STOP {
        Some(FALLBACK_PRE_STOP)
    } else {
        Some(delay)
    }
}

/// Counts open connections of one listener.
///
/// ```rust
/// use janus_server::shutdown::ConnectionTracker;
///
/// let tracker = ConnectionTracker::new();
/// let token = tracker.acquire();
/// assert_eq!(tracker.active_connections(), 1);
///
/// drop(token);
/// assert_eq!(tracker.active_connections(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl ConnectionTracker {
    /// Creates a tracker with no connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection until the token is dropped.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionToken {
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Number of open connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until every connection closed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// An open connection; dropping it closes the slot.
#[derive(Debug)]
pub struct ConnectionToken {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}

/// Signals a served connection reacts to.
#[derive(Debug, Clone)]
pub struct ConnectionSignals {
    /// Close gracefully after this age.
    pub max_age: Option<Duration>,
    /// Close gracefully: finish in-flight requests, accept no new ones.
    pub drain: CancellationToken,
    /// Abort the connection.
    pub force: CancellationToken,
}

/// Drives a hyper connection to completion under `signals`.
pub async fn drive_connection<C>(conn: C, listener: &'static str, signals: ConnectionSignals)
where
    C: GracefulConnection,
    C::Error: Display,
{
    tokio::pin!(conn);
    let max_age = async {
        match signals.max_age {
            Some(age) => tokio::time::sleep(age).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(max_age);

    let mut closing = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(listener, error = %e, "connection ended with error");
                }
                return;
            }
            () = &mut max_age, if !closing => {
                tracing::debug!(listener, "connection reached max age");
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
            () = signals.drain.cancelled(), if !closing => {
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
            () = signals.force.cancelled() => {
                tracing::debug!(listener, "connection aborted");
                return;
            }
        }
    }
}
