//! Server error types.

use std::io;
use std::net::SocketAddr;

use janus_core::{CloseErrors, JoinError, Status};
use thiserror::Error;

use crate::lifecycle::LifecycleError;

/// Errors raised while registering methods and routes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    /// The full method name is already registered.
    #[error("method {0} is already registered")]
    DuplicateMethod(String),

    /// The HTTP method and path are already bound.
    #[error("route {method} {path} is already bound")]
    DuplicateRoute {
        /// HTTP method.
        method: String,
        /// HTTP path.
        path: String,
    },

    /// A service or method name is empty or contains `/`.
    #[error("invalid name {0:?}: must be non-empty and free of '/'")]
    InvalidName(String),

    /// An HTTP path does not start with `/`.
    #[error("invalid route path {0:?}: must start with '/'")]
    InvalidPath(String),

    /// A route names a method that was never registered.
    #[error("route targets unknown method {0}")]
    UnknownMethod(String),
}

/// Listener and connection errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listener was closed.
    #[error("listener closed")]
    ListenerClosed,

    /// Binding a listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Accepting a connection failed.
    #[error("accept failed on {listener} listener: {source}")]
    Accept {
        /// Listener name.
        listener: &'static str,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Errors that can occur while running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A listener address could not be parsed.
    #[error("invalid {listener} address {addr:?}")]
    InvalidAddress {
        /// Listener name.
        listener: &'static str,
        /// The configured address.
        addr: String,
    },

    /// A listener or accept loop failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Method registration failed.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// A startup or shutdown hook failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Closers failed during shutdown.
    #[error(transparent)]
    Close(#[from] CloseErrors),

    /// An accept loop panicked.
    #[error("listener task panicked: {0}")]
    Panicked(String),

    /// `start` was called on a server that is not in the `Built` state.
    #[error("server already started")]
    AlreadyStarted,

    /// Both an authenticator and a custom pipeline were given to the builder.
    #[error("authenticator cannot be combined with a custom pipeline; add it to the pipeline")]
    AuthenticatorWithPipeline,
}

impl From<JoinError<TransportError>> for ServerError {
    fn from(err: JoinError<TransportError>) -> Self {
        match err {
            JoinError::Task(err) => Self::Transport(err),
            JoinError::Panicked(message) => Self::Panicked(message),
            JoinError::Cancelled | JoinError::DeadlineExceeded => {
                Self::Transport(TransportError::ListenerClosed)
            }
        }
    }
}

impl From<TransportError> for Status {
    fn from(err: TransportError) -> Self {
        Status::unavailable(err.to_string())
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_error_display() {
        let err = RegistrationError::DuplicateMethod("/demo.Echo/Say".to_string());
        assert_eq!(err.to_string(), "method /demo.Echo/Say is already registered");

        let err = RegistrationError::DuplicateRoute {
            method: "GET".to_string(),
            path: "/v1/echo".to_string(),
        };
        assert_eq!(err.to_string(), "route GET /v1/echo is already bound");
    }

    #[test]
    fn test_join_error_conversion() {
        let err: ServerError = JoinError::Task(TransportError::ListenerClosed).into();
        assert!(matches!(err, ServerError::Transport(TransportError::ListenerClosed)));

        let err: ServerError = JoinError::<TransportError>::Panicked("boom".to_string()).into();
        assert_eq!(err.to_string(), "listener task panicked: boom");
    }

    #[test]
    fn test_transport_error_as_status() {
        let status: Status = TransportError::ListenerClosed.into();
        assert_eq!(status.code(), janus_core::Code::UNAVAILABLE);
        assert_eq!(status.message(), "listener closed");
    }
}
