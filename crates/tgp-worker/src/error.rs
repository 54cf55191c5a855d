//! Error types for the worker agent.

use thiserror::Error;

/// Errors that can occur in the worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Scheduler connection failed or dropped.
    #[error("scheduler connection failed: {0}")]
    Connection(String),

    /// The scheduler refused the registration.
    #[error("registration rejected ({code}): {message}")]
    Registration {
        /// Scheduler error code.
        code: u32,
        /// Scheduler error message.
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Container runtime error.
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// Resource detection failed.
    #[error("resource detection failed: {0}")]
    Detection(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] tgp_proto::ProtoError),
}

impl From<tokio_tungstenite::tungstenite::Error> for WorkerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;
