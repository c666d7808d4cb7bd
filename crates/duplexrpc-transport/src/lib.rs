//! Blocking connection abstraction for duplexrpc.
//!
//! Everything above this crate talks to a [`Connection`]: a shared,
//! thread-safe byte stream with blocking `read`/`write` and a `close` that
//! wakes any reader blocked on the other side of it.
//!
//! Two implementations ship here:
//! - [`IpcStream`] over Unix domain sockets (Linux/macOS)
//! - [`pipe()`], an in-process pair that preserves write boundaries

pub mod connection;
pub mod error;
pub mod pipe;

#[cfg(unix)]
pub mod stream;
#[cfg(unix)]
pub mod uds;

pub use connection::Connection;
pub use error::{Result, TransportError};
pub use pipe::{pipe, PipeEnd};

#[cfg(unix)]
pub use stream::IpcStream;
#[cfg(unix)]
pub use uds::UnixDomainSocket;
