//! Startup and shutdown hooks.
//!
//! Startup hooks run in registration order before any listener is bound;
//! the first failure aborts the start. Shutdown hooks run in reverse order
//! after the closer stack, and every hook runs even if an earlier one
//! failed.
//!
//! # Example
//!
//! ```rust
//! use janus_server::Lifecycle;
//!
//! let lifecycle = Lifecycle::new()
//!     .on_startup_named("warm_cache", || async { Ok(()) })
//!     .on_shutdown_named("flush_audit", || async { Ok(()) });
//!
//! assert_eq!(lifecycle.startup_hook_count(), 1);
//! assert_eq!(lifecycle.shutdown_hook_count(), 1);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use janus_middleware::BoxFuture;
use thiserror::Error;

/// Errors from lifecycle hooks.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A startup hook failed; the server did not start.
    #[error("startup hook {hook} failed: {message}")]
    StartupFailed {
        /// Hook name.
        hook: String,
        /// Failure message.
        message: String,
    },

    /// One or more shutdown hooks failed.
    #[error("shutdown hooks failed: {}", .0.join("; "))]
    ShutdownFailed(Vec<String>),

    /// Error raised by a hook body.
    #[error("{message}")]
    Hook {
        /// Description.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl LifecycleError {
    /// A hook error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Hook {
            message: message.into(),
            source: None,
        }
    }

    /// A hook error wrapping a source error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Hook {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result of a lifecycle hook.
pub type LifecycleResult<T = ()> = Result<T, LifecycleError>;

/// An erased lifecycle hook.
pub type LifecycleHook = Arc<dyn Fn() -> BoxFuture<'static, LifecycleResult> + Send + Sync>;

/// Ordered startup and shutdown hooks of a server.
#[must_use]
#[derive(Clone, Default)]
pub struct Lifecycle {
    startup_hooks: Vec<(String, LifecycleHook)>,
    shutdown_hooks: Vec<(String, LifecycleHook)>,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("startup_hooks", &self.startup_hooks.len())
            .field("shutdown_hooks", &self.shutdown_hooks.len())
            .finish()
    }
}

fn erase<F, Fut>(hook: F) -> LifecycleHook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LifecycleResult> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, LifecycleResult> { Box::pin(hook()) })
}

impl Lifecycle {
    /// Creates an empty lifecycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a startup hook named `startup_<n>`.
    pub fn on_startup<F, Fut>(self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifecycleResult> + Send + 'static,
    {
        let name = format!("startup_{}", self.startup_hooks.len());
        self.on_startup_named(name, hook)
    }

    /// Adds a named startup hook.
    pub fn on_startup_named<F, Fut>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifecycleResult> + Send + 'static,
    {
        self.startup_hooks.push((name.into(), erase(hook)));
        self
    }

    /// Adds a shutdown hook named `shutdown_<n>`.
    pub fn on_shutdown<F, Fut>(self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifecycleResult> + Send + 'static,
    {
        let name = format!("shutdown_{}", self.shutdown_hooks.len());
        self.on_shutdown_named(name, hook)
    }

    /// Adds a named shutdown hook.
    pub fn on_shutdown_named<F, Fut>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifecycleResult> + Send + 'static,
    {
        self.shutdown_hooks.push((name.into(), erase(hook)));
        self
    }

    /// Number of startup hooks.
    pub fn startup_hook_count(&self) -> usize {
        self.startup_hooks.len()
    }

    /// Number of shutdown hooks.
    pub fn shutdown_hook_count(&self) -> usize {
        self.shutdown_hooks.len()
    }

    /// Runs startup hooks in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// `StartupFailed` naming the failed hook.
    pub async fn run_startup(&self) -> LifecycleResult {
        for (name, hook) in &self.startup_hooks {
            tracing::debug!(hook = %name, "running startup hook");
            if let Err(e) = hook().await {
                tracing::error!(hook = %name, error = %e, "startup hook failed");
                return Err(LifecycleError::StartupFailed {
                    hook: name.clone(),
                    message: e.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Runs shutdown hooks in reverse order, collecting failures.
    ///
    /// # Errors
    ///
    /// `ShutdownFailed` with one entry per failed hook.
    pub async fn run_shutdown(&self) -> LifecycleResult {
        let mut errors = Vec::new();
        for (name, hook) in self.shutdown_hooks.iter().rev() {
            tracing::debug!(hook = %name, "running shutdown hook");
            if let Err(e) = hook().await {
                tracing::error!(hook = %name, error = %e, "shutdown hook failed");
                errors.push(format!("{name}: {e}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::ShutdownFailed(errors))
        }
    }

    /// Appends the hooks of `other`.
    pub fn merge(mut self, other: Lifecycle) -> Self {
        self.startup_hooks.extend(other.startup_hooks);
        self.shutdown_hooks.extend(other.shutdown_hooks);
        self
    }
}
