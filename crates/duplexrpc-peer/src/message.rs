//! RPC messages and their framing on a logical connection.
//!
//! A logical connection is a plain byte stream, so each message carries its
//! own length:
//!
//! ```text
//! ┌────────────────┬──────────────────────────┐
//! │ Length (4B LE) │ JSON body (Length bytes) │
//! └────────────────┴──────────────────────────┘
//! ```

use std::io::ErrorKind;

use bytes::{BufMut, BytesMut};
use duplexrpc_transport::Connection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DuplexError, Result};

/// Largest accepted message body: 16 MiB.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const LENGTH_SIZE: usize = 4;

/// A call from the client lane to the peer's server lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlates the response with this request.
    pub id: u64,
    /// `Service.Method`.
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// The answer to one [`Request`]. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Turn the response into the caller's result.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(message) => Err(DuplexError::Remote(message)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Serialize `message` and write it as one length-prefixed unit.
///
/// Concurrent writers on the same connection must serialize calls to this
/// function themselves: a large message may leave as several frames.
pub fn write_message<C, T>(conn: &C, message: &T) -> Result<()>
where
    C: Connection + ?Sized,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(DuplexError::MessageTooLarge {
            size: body.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(LENGTH_SIZE + body.len());
    buf.put_u32_le(body.len() as u32);
    buf.put_slice(&body);
    conn.write_all(&buf)?;
    Ok(())
}

/// Read one length-prefixed message.
///
/// Returns `Ok(None)` on a clean end-of-stream between messages and
/// `ConnectionClosed` if the stream ends inside one. A body that is not
/// valid JSON for `T` is reported as `Json` after being consumed in full,
/// so the stream stays in sync.
pub fn read_message<C, T>(conn: &C) -> Result<Option<T>>
where
    C: Connection + ?Sized,
    T: DeserializeOwned,
{
    read_message_limited(conn, MAX_MESSAGE_SIZE)
}

/// [`read_message`] with a caller-chosen body limit.
pub(crate) fn read_message_limited<C, T>(conn: &C, max: usize) -> Result<Option<T>>
where
    C: Connection + ?Sized,
    T: DeserializeOwned,
{
    let mut header = [0u8; LENGTH_SIZE];
    if !read_full(conn, &mut header)? {
        return Ok(None);
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > max {
        return Err(DuplexError::MessageTooLarge { size: len, max });
    }

    let mut body = vec![0u8; len];
    if !read_full(conn, &mut body)? {
        return Err(DuplexError::ConnectionClosed);
    }
    Ok(Some(serde_json::from_slice(&body)?))
}

/// Fill `buf` completely. `Ok(false)` if the stream ended before the first
/// byte; `ConnectionClosed` if it ended part way.
fn read_full<C: Connection + ?Sized>(conn: &C, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match conn.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(DuplexError::ConnectionClosed),
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(DuplexError::Io(err)),
        }
    }
    Ok(true)
}
