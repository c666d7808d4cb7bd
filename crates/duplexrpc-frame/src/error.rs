use std::io;

/// Errors that can occur while framing or routing.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame carried a tag other than 0 or 1.
    #[error("unknown frame tag {0}")]
    UnknownTag(u8),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred on the underlying connection.
    #[error("frame I/O error: {0}")]
    Io(#[from] io::Error),

    /// The logical connection or its shared writer has been closed.
    #[error("connection closed locally")]
    Closed,

    /// The underlying connection ended before a complete frame arrived.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl From<FrameError> for io::Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(err) => err,
            FrameError::Closed => io::Error::new(io::ErrorKind::NotConnected, err),
            FrameError::ConnectionClosed => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
