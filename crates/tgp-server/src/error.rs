//! Daemon error type.

use std::net::SocketAddr;

use tgp_proto::ProtoError;
use thiserror::Error;

/// Errors raised by the scheduler daemon.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not bind.
    #[error("cannot listen on {addr}: {source}")]
    BindFailed {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Bad configuration value or file.
    #[error("configuration error: {0}")]
    Config(String),

    /// WebSocket transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A peer broke the message protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The outbound queue of a worker session is gone.
    #[error("worker session closed")]
    SessionClosed,

    /// Unexpected daemon state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<ProtoError> for ServerError {
    fn from(err: ProtoError) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ServerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result alias for the daemon.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_failure_names_address() {
        let err = ServerError::BindFailed {
            addr: "127.0.0.1:8080".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("cannot listen on 127.0.0.1:8080"));
        assert!(msg.ends_with("address in use"));
    }

    #[test]
    fn test_decode_failures_are_codec_errors() {
        let json_err = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        assert!(matches!(ServerError::from(json_err), ServerError::Codec(_)));

        let proto_err = ProtoError::Decoding("truncated".into());
        assert!(matches!(ServerError::from(proto_err), ServerError::Codec(m) if m.contains("truncated")));
    }
}
