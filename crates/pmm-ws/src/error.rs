//! Error types for pmm-ws.

use thiserror::Error;

/// WebSocket error types.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    Closed,

    #[error("Frame parse error: {0}")]
    Parse(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Keepalive timeout")]
    KeepaliveTimeout,
}

/// Result type alias for stream operations.
pub type WsResult<T> = std::result::Result<T, WsError>;
