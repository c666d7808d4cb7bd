use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use tracing::trace;

use crate::connection::Connection;
use crate::error::Result;

/// A connected Unix domain stream socket.
///
/// This is the connection type returned by [`UnixDomainSocket`](crate::UnixDomainSocket).
/// The socket does not preserve write boundaries, so frames carried over it
/// need an explicit length.
pub struct IpcStream {
    inner: UnixStream,
}

impl IpcStream {
    pub(crate) fn from_unix(stream: UnixStream) -> Self {
        Self { inner: stream }
    }

    /// Create a connected pair of streams (`socketpair(2)`).
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let cloned = self.inner.try_clone()?;
        Ok(Self::from_unix(cloned))
    }
}

impl Connection for IpcStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.inner).read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (&self.inner).write(buf)
    }

    fn close(&self) -> io::Result<()> {
        match self.inner.shutdown(Shutdown::Both) {
            Ok(()) => {
                trace!("unix stream shut down");
                Ok(())
            }
            // Already shut down, or the peer went away first.
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_read_timeout(timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_write_timeout(timeout)
    }

    fn local_addr(&self) -> Option<String> {
        self.inner.local_addr().ok().map(|addr| describe(&addr))
    }

    fn peer_addr(&self) -> Option<String> {
        self.inner.peer_addr().ok().map(|addr| describe(&addr))
    }
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn describe(addr: &std::os::unix::net::SocketAddr) -> String {
    match addr.as_pathname() {
        Some(path) => format!("unix:{}", path.display()),
        None => "unix:(unnamed)".to_string(),
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream").field("type", &"unix").finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn pair_carries_bytes_both_ways() {
        let (left, right) = IpcStream::pair().unwrap();

        Connection::write_all(&left, b"ping").unwrap();
        let mut buf = [0u8; 4];
        let n = Connection::read(&right, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        Connection::write_all(&right, b"pong").unwrap();
        let n = Connection::read(&left, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn close_unblocks_reader_on_same_socket() {
        let (left, _right) = IpcStream::pair().unwrap();
        let left = std::sync::Arc::new(left);

        let reader = {
            let left = std::sync::Arc::clone(&left);
            thread::spawn(move || {
                let mut buf = [0u8; 8];
                Connection::read(&*left, &mut buf)
            })
        };

        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        Connection::close(&*left).unwrap();

        let result = reader.join().unwrap();
        assert!(matches!(result, Ok(0)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn close_twice_is_ok() {
        let (left, _right) = IpcStream::pair().unwrap();
        Connection::close(&left).unwrap();
        Connection::close(&left).unwrap();
    }

    #[test]
    fn peer_sees_eof_after_close() {
        let (left, right) = IpcStream::pair().unwrap();
        Connection::close(&left).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(Connection::read(&right, &mut buf).unwrap(), 0);
    }

    #[test]
    fn pair_addresses_are_unnamed() {
        let (left, _right) = IpcStream::pair().unwrap();
        assert_eq!(left.local_addr().as_deref(), Some("unix:(unnamed)"));
    }
}
