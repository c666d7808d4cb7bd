use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use duplexrpc_transport::Connection;
use tracing::debug;

use crate::buffer::InboundBuffer;
use crate::error::FrameError;
use crate::framer::Framer;
use crate::tag::Tag;

/// One tag's view of the shared connection.
///
/// Writes go out through the tag's [`Framer`]; reads come from the tag's
/// [`InboundBuffer`]. It implements [`Connection`] as well as
/// [`std::io::Read`]/[`std::io::Write`], so code written against a plain
/// connection works on top of it unchanged.
pub struct LogicalConnection {
    framer: Framer,
    inbound: Arc<InboundBuffer>,
    closed: AtomicBool,
    read_timeout: Mutex<Option<Duration>>,
}

impl LogicalConnection {
    pub fn new(framer: Framer, inbound: Arc<InboundBuffer>) -> Self {
        debug_assert_eq!(framer.tag(), inbound.tag());
        Self {
            framer,
            inbound,
            closed: AtomicBool::new(false),
            read_timeout: Mutex::new(None),
        }
    }

    /// The tag this connection writes and reads.
    pub fn tag(&self) -> Tag {
        self.framer.tag()
    }

    /// Whether this logical connection, or the shared writer under it, has
    /// been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.framer.writer().is_closed()
    }

    fn raw(&self) -> &Arc<dyn Connection> {
        self.framer.writer().connection()
    }

    fn current_read_timeout(&self) -> Option<Duration> {
        *self
            .read_timeout
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Connection for LogicalConnection {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inbound.read(buf, self.current_read_timeout())
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FrameError::Closed.into());
        }
        self.framer.write(buf).map_err(Into::into)
    }

    /// Stop this lane: later writes fail with `NotConnected` and a blocked
    /// local reader sees end-of-stream. The raw connection stays open.
    fn close(&self) -> io::Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.inbound.close();
            debug!(tag = %self.tag(), "logical connection closed");
        }
        Ok(())
    }

    /// Bounds the wait on this lane's inbound buffer. The raw read side
    /// belongs to the demultiplexer and is left alone.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        *self
            .read_timeout
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = timeout;
        Ok(())
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.raw().set_write_timeout(timeout)
    }

    fn local_addr(&self) -> Option<String> {
        self.raw().local_addr()
    }

    fn peer_addr(&self) -> Option<String> {
        self.raw().peer_addr()
    }
}

impl Read for &LogicalConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Connection::read(*self, buf)
    }
}

impl Write for &LogicalConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Connection::write(*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for LogicalConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Connection::read(self, buf)
    }
}

impl Write for LogicalConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Connection::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for LogicalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalConnection")
            .field("tag", &self.tag())
            .field("closed", &self.is_closed())
            .field("buffered", &self.inbound.len())
            .finish()
    }
}
