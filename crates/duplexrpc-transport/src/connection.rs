use std::io;
use std::sync::Arc;
use std::time::Duration;

/// A blocking, bidirectional byte stream shared between threads.
///
/// Every method takes `&self`: one thread may sit in [`read`](Self::read)
/// while others call [`write`](Self::write) or [`close`](Self::close).
/// `close` must wake a concurrently blocked reader, which then observes
/// end-of-stream (`Ok(0)`) or an error.
pub trait Connection: Send + Sync {
    /// Read available bytes into `buf`, blocking until at least one byte
    /// arrives. `Ok(0)` means end-of-stream.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write bytes from `buf`, returning how many were accepted.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Close the connection. Calling it more than once is not an error.
    fn close(&self) -> io::Result<()>;

    /// Bound how long a single `read` may block. `None` blocks forever.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Bound how long a single `write` may block. `None` blocks forever.
    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Local address, for diagnostics.
    fn local_addr(&self) -> Option<String> {
        None
    }

    /// Remote address, for diagnostics.
    fn peer_addr(&self) -> Option<String> {
        None
    }

    /// Write the whole buffer, retrying on short writes and `Interrupted`.
    fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => buf = &buf[n..],
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl<C: Connection + ?Sized> Connection for Arc<C> {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_write_timeout(timeout)
    }

    fn local_addr(&self) -> Option<String> {
        (**self).local_addr()
    }

    fn peer_addr(&self) -> Option<String> {
        (**self).peer_addr()
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_write_timeout(timeout)
    }

    fn local_addr(&self) -> Option<String> {
        (**self).local_addr()
    }

    fn peer_addr(&self) -> Option<String> {
        (**self).peer_addr()
    }
}
