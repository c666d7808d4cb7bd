use std::fmt;
use std::io;

use duplexrpc_frame::FrameError;
use duplexrpc_peer::DuplexError;
use duplexrpc_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const REMOTE_ERROR: i32 = 2;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::NotConnected => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::UnknownTag(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::Closed | FrameError::ConnectionClosed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

pub fn duplex_error(context: &str, err: DuplexError) -> CliError {
    match err {
        DuplexError::Transport(err) => transport_error(context, err),
        DuplexError::Frame(err) => frame_error(context, err),
        DuplexError::Io(err) => io_error(context, err),
        DuplexError::Remote(_) => CliError::new(REMOTE_ERROR, format!("{context}: {err}")),
        DuplexError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        DuplexError::Json(_) | DuplexError::MessageTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        DuplexError::InvalidMethodName(_)
        | DuplexError::UnknownService(_)
        | DuplexError::UnknownMethod(_) => CliError::new(USAGE, format!("{context}: {err}")),
        DuplexError::Closed
        | DuplexError::ConnectionClosed
        | DuplexError::HandshakeFailed(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn remote_errors_map_to_remote_code() {
        let err = duplex_error("call failed", DuplexError::Remote("boom".to_string()));
        assert_eq!(err.code, REMOTE_ERROR);
        assert_eq!(err.message, "call failed: remote error: boom");
    }

    #[test]
    fn timeouts_map_to_124() {
        let err = duplex_error("call failed", DuplexError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn missing_socket_is_transport_error() {
        let err = duplex_error(
            "connect failed",
            DuplexError::Transport(TransportError::Connect {
                path: "/tmp/missing.sock".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn closed_connection_is_failure() {
        let err = duplex_error("call failed", DuplexError::ConnectionClosed);
        assert_eq!(err.code, FAILURE);
    }
}
