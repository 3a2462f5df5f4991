//! Error type definitions
//!
//! Provides all error types surfaced by the connection and command layer.

use std::path::PathBuf;
use std::sync::Arc;

/// Message used by clients to report a connection that was torn down on purpose
pub const CONNECTION_CLOSED: &str = "Connection is closed.";

/// Result type alias for beeq
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for beeq
///
/// Errors are `Clone` so that a single in-flight script load can hand the
/// same failure to every waiting caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Errors reported by the fred client
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::RedisError),

    /// Errors reported by the redis-rs client
    #[error("Redis error: {0}")]
    RedisRs(Arc<redis::RedisError>),

    /// A script file could not be listed or read
    #[error("Script load error at {}: {source}", path.display())]
    ScriptLoad {
        /// Path (or entry) that failed
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A required script was not discovered
    #[error("Missing script: {0}")]
    MissingScript(String),

    /// The connection failed before it became ready
    #[error("Connection error: {0}")]
    Connection(String),

    /// The connection was torn down intentionally
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A script returned a reply that does not match its contract
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::RedisRs(Arc::new(err))
    }
}

impl Error {
    /// Build a script load error from an I/O failure
    pub fn script_load(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::ScriptLoad {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Build the error returned for requests on a closed connection
    pub fn closed() -> Self {
        Error::Aborted(CONNECTION_CLOSED.to_string())
    }

    /// Check if the error represents an intentional teardown
    ///
    /// fred has a dedicated `Canceled` kind; otherwise only the
    /// closed-connection message counts. A reset or broken pipe from the
    /// peer is a network fault, not an abort.
    pub fn is_abort(&self) -> bool {
        match self {
            Error::Aborted(_) => true,
            Error::Redis(e) => {
                *e.kind() == fred::error::RedisErrorKind::Canceled
                    || e.details() == CONNECTION_CLOSED
            }
            Error::RedisRs(e) => e.to_string().contains(CONNECTION_CLOSED),
            Error::Connection(msg) => msg == CONNECTION_CLOSED,
            _ => false,
        }
    }

    /// Check if the error is transient from the broker's point of view
    ///
    /// This is informational only. The layer never retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Redis(e) => matches!(
                e.kind(),
                fred::error::RedisErrorKind::IO | fred::error::RedisErrorKind::Timeout
            ),
            Error::RedisRs(e) => e.is_io_error() || e.is_timeout(),
            Error::ScriptLoad { .. } | Error::Connection(_) => true,
            _ => false,
        }
    }
}
