//! Error types for Hot Rod operations.

use std::io;
use thiserror::Error;

use crate::protocol::constants::{ILLEGAL_LIFECYCLE_STATE_STATUS, NODE_SUSPECTED_STATUS};

/// The main error type for Hot Rod operations.
#[derive(Debug, Error)]
pub enum HotRodError {
    /// The channel closed before the operation's response was fully read.
    #[error("channel inactive: {0}")]
    ChannelInactive(String),

    /// Establishing a connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed or unexpected bytes on the wire.
    #[error("decode error: {0}")]
    Decode(String),

    /// The server answered with an error status.
    #[error("server error (status {status:#04x}, message id {message_id}): {message}")]
    Server {
        /// Message id of the failed request.
        message_id: u64,
        /// Status byte reported by the server.
        status: u8,
        /// Message carried in the error response body.
        message: String,
    },

    /// No response arrived within the socket timeout.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// Invalid client settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every candidate server has been tried or excluded.
    #[error("no available servers: {0}")]
    NoAvailableServers(String),

    /// The caller stopped waiting for the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The negotiated protocol version cannot express the request.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A client task failed without reaching the wire, such as a panicked
    /// scatter/gather group.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HotRodError {
    /// Returns `true` when the server reported an error status.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    /// Returns `true` for failures caused by the network or a lost server.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ChannelInactive(_)
                | Self::Connection(_)
                | Self::Decode(_)
                | Self::Timeout(_)
                | Self::Io(_)
        )
    }

    /// Returns `true` when a failed attempt may be repeated on another server.
    ///
    /// Server errors are final, except for the two statuses a node reports
    /// while it is leaving the cluster.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Server { status, .. } => {
                *status == NODE_SUSPECTED_STATUS || *status == ILLEGAL_LIFECYCLE_STATE_STATUS
            }
            other => other.is_transport(),
        }
    }

    /// Extracts an error that the framing layer wrapped inside an `io::Error`.
    pub fn unwrap_framing(self) -> Self {
        match self {
            Self::Io(err) if err.get_ref().is_some_and(|inner| inner.is::<HotRodError>()) => {
                match err.into_inner().map(|inner| inner.downcast::<HotRodError>()) {
                    Some(Ok(inner)) => inner.unwrap_framing(),
                    Some(Err(other)) => Self::Io(io::Error::new(io::ErrorKind::Other, other)),
                    None => Self::Decode("empty framing error".to_string()),
                }
            }
            other => other,
        }
    }

    /// Returns a copy suitable for reporting the same failure to several waiters.
    pub fn duplicate(&self) -> Self {
        match self {
            Self::ChannelInactive(m) => Self::ChannelInactive(m.clone()),
            Self::Connection(m) => Self::Connection(m.clone()),
            Self::Decode(m) => Self::Decode(m.clone()),
            Self::Server {
                message_id,
                status,
                message,
            } => Self::Server {
                message_id: *message_id,
                status: *status,
                message: message.clone(),
            },
            Self::Timeout(m) => Self::Timeout(m.clone()),
            Self::Configuration(m) => Self::Configuration(m.clone()),
            Self::NoAvailableServers(m) => Self::NoAvailableServers(m.clone()),
            Self::Cancelled => Self::Cancelled,
            Self::Unsupported(m) => Self::Unsupported(m.clone()),
            Self::Internal(m) => Self::Internal(m.clone()),
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
        }
    }
}

/// A specialized `Result` type for Hot Rod operations.
pub type Result<T> = std::result::Result<T, HotRodError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_inactive_display() {
        let err = HotRodError::ChannelInactive("connection reset by peer".to_string());
        assert_eq!(err.to_string(), "channel inactive: connection reset by peer");
    }

    #[test]
    fn test_server_error_display() {
        let err = HotRodError::Server {
            message_id: 7,
            status: 0x85,
            message: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "server error (status 0x85, message id 7): boom"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        let err: HotRodError = io_err.into();
        assert!(matches!(err, HotRodError::Io(_)));
        assert!(err.is_transport());
    }

    #[test]
    fn test_server_errors_are_not_retried() {
        let err = HotRodError::Server {
            message_id: 1,
            status: 0x85,
            message: "internal".to_string(),
        };
        assert!(err.is_server_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_leaving_node_statuses_are_retried() {
        for status in [NODE_SUSPECTED_STATUS, ILLEGAL_LIFECYCLE_STATE_STATUS] {
            let err = HotRodError::Server {
                message_id: 1,
                status,
                message: "stopping".to_string(),
            };
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn test_transport_errors_are_retried() {
        assert!(HotRodError::Timeout("30s".into()).is_retryable());
        assert!(HotRodError::ChannelInactive("closed".into()).is_retryable());
        assert!(!HotRodError::Configuration("bad".into()).is_retryable());
        assert!(!HotRodError::Cancelled.is_retryable());
    }

    #[test]
    fn test_internal_errors_are_final() {
        let err = HotRodError::Internal("task panicked".into());
        assert!(!err.is_transport());
        assert!(!err.is_retryable());
        assert!(matches!(err.duplicate(), HotRodError::Internal(ref m) if m == "task panicked"));
    }

    #[test]
    fn test_unwrap_framing_extracts_inner_error() {
        let wrapped = io::Error::new(
            io::ErrorKind::InvalidData,
            HotRodError::Decode("bad magic".to_string()),
        );
        let err = HotRodError::Io(wrapped).unwrap_framing();
        assert!(matches!(err, HotRodError::Decode(ref m) if m == "bad magic"));
    }

    #[test]
    fn test_unwrap_framing_keeps_plain_io() {
        let err = HotRodError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe")).unwrap_framing();
        assert!(matches!(err, HotRodError::Io(_)));
    }

    #[test]
    fn test_duplicate_preserves_variant() {
        let err = HotRodError::Timeout("late".into());
        assert!(matches!(err.duplicate(), HotRodError::Timeout(ref m) if m == "late"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HotRodError>();
    }
}
