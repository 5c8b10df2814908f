//! Unified error type.

use std::time::Duration;

use crate::config::ConfigError;

/// The error type returned by servekit's fallible operations.
///
/// Application-level failures (404, 422, a handler that could not do its
/// job) are expressed as [`Outcome`](crate::Outcome)s and end up in a JSON
/// envelope, not as `Error`s. This type surfaces infrastructure failures:
/// building the route table, binding the listener, or draining on shutdown.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The listener could not be bound. The server never entered `Listening`.
    #[error("could not listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// A route path was rejected by the route table.
    #[error("invalid route `{path}`: {reason}")]
    InvalidRoute { path: String, reason: String },

    /// In-flight requests did not finish within the drain budget; the
    /// remaining connections were aborted.
    #[error("server forced to shut down: {in_flight} connection(s) still open after {budget:?}")]
    ForcedShutdown { in_flight: usize, budget: Duration },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind { addr: addr.into(), source }
    }
}
