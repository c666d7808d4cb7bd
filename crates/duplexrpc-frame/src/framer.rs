use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use duplexrpc_transport::Connection;
use tracing::{debug, trace, warn};

use crate::codec::{encode_frame, FrameConfig, FrameMode};
use crate::error::{FrameError, Result};
use crate::tag::Tag;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// The write half of the raw connection, shared by both framers.
///
/// One mutex covers encoding and the raw write, so a frame is always written
/// as one contiguous unit and frames from the two tags never interleave.
pub struct SharedWriter {
    conn: Arc<dyn Connection>,
    /// Scratch buffer; holding its lock is holding the write lock.
    buf: Mutex<BytesMut>,
    closed: AtomicBool,
    config: FrameConfig,
}

impl SharedWriter {
    pub fn new(conn: Arc<dyn Connection>, config: FrameConfig) -> Self {
        Self {
            conn,
            buf: Mutex::new(BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY)),
            closed: AtomicBool::new(false),
            config,
        }
    }

    /// The raw connection underneath.
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Write one frame carrying as much of `payload` as fits in a frame.
    ///
    /// Returns the number of payload bytes written; the tag and length
    /// header are never counted. An I/O failure closes the writer and the
    /// raw connection, since the stream can no longer be trusted. In
    /// [`FrameMode::Preserved`] a frame must leave in a single raw write, so
    /// a short write is such a failure too.
    pub fn send(&self, tag: Tag, payload: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(FrameError::Closed);
        }
        if payload.is_empty() {
            return Ok(0);
        }

        let chunk = &payload[..payload.len().min(self.config.max_payload_size)];
        let mut buf = self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Re-check under the lock: close() may have won the race.
        if self.is_closed() {
            return Err(FrameError::Closed);
        }

        buf.clear();
        encode_frame(tag, chunk, self.config.mode, &mut *buf)?;

        let mut offset = 0usize;
        while offset < buf.len() {
            match self.conn.write(&buf[offset..]) {
                Ok(0) => {
                    self.fail("raw write returned zero");
                    return Err(FrameError::ConnectionClosed);
                }
                Ok(n) if self.config.mode == FrameMode::Preserved && n < buf.len() => {
                    self.fail("short raw write split a frame");
                    return Err(FrameError::Io(std::io::Error::new(
                        ErrorKind::WriteZero,
                        format!("frame split by short write: {n} of {} bytes", buf.len()),
                    )));
                }
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.fail(&err.to_string());
                    return Err(FrameError::Io(err));
                }
            }
        }

        trace!(%tag, len = chunk.len(), "frame written");
        Ok(chunk.len())
    }

    /// Reject all further writes. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("shared writer closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn fail(&self, reason: &str) {
        warn!(reason, "raw write failed; tearing down connection");
        self.close();
        let _ = self.conn.close();
    }
}

impl std::fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedWriter")
            .field("closed", &self.is_closed())
            .field("config", &self.config)
            .finish()
    }
}

/// Prefixes every write with one fixed tag.
#[derive(Debug, Clone)]
pub struct Framer {
    tag: Tag,
    writer: Arc<SharedWriter>,
}

impl Framer {
    pub fn new(tag: Tag, writer: Arc<SharedWriter>) -> Self {
        Self { tag, writer }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn writer(&self) -> &Arc<SharedWriter> {
        &self.writer
    }

    /// Write `payload` as one tagged frame. See [`SharedWriter::send`].
    pub fn write(&self, payload: &[u8]) -> Result<usize> {
        self.writer.send(self.tag, payload)
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::thread;
    use std::time::Duration;

    use duplexrpc_transport::pipe;

    use super::*;
    use crate::codec::{split_datagram, FrameMode};

    fn read_datagram(end: &dyn Connection) -> Vec<u8> {
        let mut buf = vec![0u8; 1024];
        let n = end.read(&mut buf).unwrap();
        buf.truncate(n);
        buf
    }

    #[test]
    fn write_prefixes_tag_and_reports_payload_len() {
        let (local, remote) = pipe();
        let writer = Arc::new(SharedWriter::new(Arc::new(local), FrameConfig::preserved()));
        let framer = Framer::new(Tag::One, writer);

        assert_eq!(framer.write(b"hello").unwrap(), 5);
        assert_eq!(read_datagram(&remote), b"\x01hello");
    }

    #[test]
    fn oversized_write_is_truncated_to_one_frame() {
        let (local, remote) = pipe();
        let config = FrameConfig::preserved().with_max_payload_size(4);
        let writer = Arc::new(SharedWriter::new(Arc::new(local), config));
        let framer = Framer::new(Tag::Zero, writer);

        assert_eq!(framer.write(b"abcdefgh").unwrap(), 4);
        assert_eq!(read_datagram(&remote), b"\x00abcd");
    }

    #[test]
    fn empty_write_sends_nothing() {
        let (local, remote) = pipe();
        let writer = Arc::new(SharedWriter::new(Arc::new(local), FrameConfig::preserved()));
        let framer = Framer::new(Tag::Zero, writer);

        assert_eq!(framer.write(b"").unwrap(), 0);
        remote
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();
        let mut buf = [0u8; 8];
        let err = remote.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn closed_writer_rejects_writes() {
        let (local, _remote) = pipe();
        let writer = Arc::new(SharedWriter::new(Arc::new(local), FrameConfig::default()));
        let framer = Framer::new(Tag::Zero, Arc::clone(&writer));

        writer.close();
        writer.close();
        assert!(matches!(framer.write(b"x"), Err(FrameError::Closed)));
    }

    #[test]
    fn raw_failure_closes_writer() {
        let (local, remote) = pipe();
        remote.close().unwrap();
        let writer = Arc::new(SharedWriter::new(Arc::new(local), FrameConfig::default()));
        let framer = Framer::new(Tag::One, Arc::clone(&writer));

        assert!(matches!(framer.write(b"x"), Err(FrameError::Io(_))));
        assert!(writer.is_closed());
        assert!(matches!(framer.write(b"x"), Err(FrameError::Closed)));
    }

    #[test]
    fn concurrent_framers_never_split_frames() {
        let (local, remote) = pipe();
        let writer = Arc::new(SharedWriter::new(Arc::new(local), FrameConfig::preserved()));

        let handles: Vec<_> = Tag::ALL
            .into_iter()
            .map(|tag| {
                let framer = Framer::new(tag, Arc::clone(&writer));
                thread::spawn(move || {
                    for i in 0..200u32 {
                        let payload = format!("{tag}:{i}");
                        framer.write(payload.as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut next = [0u32; 2];
        for _ in 0..400 {
            let frame = split_datagram(&read_datagram(&remote)).unwrap();
            let tag = frame.tag().unwrap();
            let expected = format!("{tag}:{}", next[tag.index()]);
            assert_eq!(frame.payload.as_ref(), expected.as_bytes());
            next[tag.index()] += 1;
        }
        assert_eq!(next, [200, 200]);
    }

    /// Accepts at most `limit` bytes per write and records each write.
    struct ShortWrites {
        limit: usize,
        writes: Mutex<Vec<Vec<u8>>>,
        closed: AtomicBool,
    }

    impl ShortWrites {
        fn new(limit: usize) -> Self {
            Self {
                limit,
                writes: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }
        }

        fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl Connection for ShortWrites {
        fn read(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn write(&self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.writes.lock().unwrap().push(buf[..n].to_vec());
            Ok(n)
        }

        fn close(&self) -> io::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }

        fn set_write_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn short_write_in_preserved_mode_is_fatal() {
        let conn = Arc::new(ShortWrites::new(3));
        let raw: Arc<dyn Connection> = conn.clone();
        let writer = Arc::new(SharedWriter::new(raw, FrameConfig::preserved()));
        let framer = Framer::new(Tag::Zero, Arc::clone(&writer));

        assert!(matches!(framer.write(b"hello"), Err(FrameError::Io(_))));
        assert_eq!(conn.writes(), vec![b"\x00he".to_vec()]);
        assert!(writer.is_closed());
        assert!(conn.closed.load(Ordering::SeqCst));
        assert!(matches!(framer.write(b"x"), Err(FrameError::Closed)));
    }

    #[test]
    fn short_write_in_length_prefixed_mode_is_resumed() {
        let conn = Arc::new(ShortWrites::new(3));
        let raw: Arc<dyn Connection> = conn.clone();
        let writer = Arc::new(SharedWriter::new(raw, FrameConfig::length_prefixed()));
        let framer = Framer::new(Tag::One, Arc::clone(&writer));

        assert_eq!(framer.write(b"hello").unwrap(), 5);
        assert_eq!(conn.writes().concat(), b"\x01\x05\x00\x00\x00hello");
        assert!(!writer.is_closed());
    }

    #[test]
    fn length_prefixed_mode_writes_header() {
        let (local, remote) = pipe();
        let config = FrameConfig {
            mode: FrameMode::LengthPrefixed,
            ..FrameConfig::default()
        };
        let writer = Arc::new(SharedWriter::new(Arc::new(local), config));
        Framer::new(Tag::One, writer).write(b"ok").unwrap();

        assert_eq!(read_datagram(&remote), [1, 2, 0, 0, 0, b'o', b'k']);
    }
}
