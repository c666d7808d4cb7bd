use std::time::Duration;

use crate::duplex::DuplexState;

/// Errors that can occur in duplex RPC operations.
#[derive(Debug, thiserror::Error)]
pub enum DuplexError {
    /// Transport-level error while connecting or accepting.
    #[error("transport error: {0}")]
    Transport(#[from] duplexrpc_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] duplexrpc_frame::FrameError),

    /// I/O error on a logical or raw connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The duplex was already closing or closed when the call started.
    #[error("duplex is closed")]
    Closed,

    /// The connection closed while a call was waiting for its response.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// The remote service returned an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// No service registered under this name.
    #[error("unknown service '{0}'")]
    UnknownService(String),

    /// The service exists but has no such method.
    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    /// Method names take the form `Service.Method`.
    #[error("invalid method name '{0}' (expected 'Service.Method')")]
    InvalidMethodName(String),

    /// A service with this name is already registered.
    #[error("service '{0}' already registered")]
    DuplicateService(String),

    /// An RPC message exceeds the size limit.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The operation is not allowed in the current state.
    #[error("operation not allowed while {0:?}")]
    InvalidState(DuplexState),

    /// `serve()` is already running on this duplex.
    #[error("already serving")]
    AlreadyServing,

    /// Role handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Operation timed out.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, DuplexError>;
