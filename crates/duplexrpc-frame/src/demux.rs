use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::BytesMut;
use duplexrpc_transport::Connection;
use tracing::{debug, trace, warn};

use crate::buffer::InboundBuffer;
use crate::codec::{decode_frame, split_datagram, Frame, FrameConfig, FrameMode, TAG_SIZE};
use crate::error::{FrameError, Result};
use crate::tag::Tag;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Counters kept by the demultiplexer loop.
#[derive(Debug, Default)]
pub struct DemuxStats {
    routed_frames: [AtomicU64; 2],
    routed_bytes: [AtomicU64; 2],
    dropped_frames: AtomicU64,
}

impl DemuxStats {
    /// Frames delivered to the buffer for `tag`.
    pub fn routed_frames(&self, tag: Tag) -> u64 {
        self.routed_frames[tag.index()].load(Ordering::Relaxed)
    }

    /// Payload bytes delivered to the buffer for `tag`.
    pub fn routed_bytes(&self, tag: Tag) -> u64 {
        self.routed_bytes[tag.index()].load(Ordering::Relaxed)
    }

    /// Frames discarded: unknown tag, or the target lane was already closed.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

/// The single reader of the raw connection.
///
/// [`run`](Self::run) loops until the connection ends, routing each frame's
/// payload to the [`InboundBuffer`] for its tag. Frames with an unknown tag
/// are logged and dropped. When the loop ends, for any reason, both buffers
/// are closed so blocked readers see end-of-stream.
pub struct Demultiplexer {
    conn: Arc<dyn Connection>,
    buffers: [Arc<InboundBuffer>; 2],
    config: FrameConfig,
    stats: Arc<DemuxStats>,
}

impl Demultiplexer {
    pub fn new(conn: Arc<dyn Connection>, config: FrameConfig) -> Self {
        Self {
            conn,
            buffers: Tag::ALL.map(|tag| Arc::new(InboundBuffer::new(tag))),
            config,
            stats: Arc::new(DemuxStats::default()),
        }
    }

    /// The buffer fed with payloads for `tag`.
    pub fn buffer(&self, tag: Tag) -> Arc<InboundBuffer> {
        Arc::clone(&self.buffers[tag.index()])
    }

    pub fn stats(&self) -> Arc<DemuxStats> {
        Arc::clone(&self.stats)
    }

    /// Run the routing loop on the current thread.
    ///
    /// Returns `Ok(())` when the connection reaches a clean end-of-stream and
    /// the error otherwise. Either way both buffers are closed on return.
    pub fn run(self) -> Result<()> {
        debug!(mode = ?self.config.mode, "demultiplexer started");
        let result = match self.config.mode {
            FrameMode::Preserved => self.run_preserved(),
            FrameMode::LengthPrefixed => self.run_length_prefixed(),
        };

        for buffer in &self.buffers {
            buffer.close();
        }

        match &result {
            Ok(()) => debug!("demultiplexer reached end of stream"),
            Err(err) => debug!(error = %err, "demultiplexer stopped"),
        }
        result
    }

    /// Run the routing loop on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<Result<()>>> {
        thread::Builder::new()
            .name("duplexrpc-demux".to_string())
            .spawn(move || self.run())
    }

    fn run_preserved(&self) -> Result<()> {
        // One spare byte: a read that fills the buffer carried an oversized
        // frame, and its tail must never be parsed as a frame of its own.
        let mut buf = vec![0u8; TAG_SIZE + self.config.max_payload_size + 1];
        loop {
            let n = self.read_raw(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            if n == buf.len() {
                return Err(FrameError::PayloadTooLarge {
                    size: n - TAG_SIZE,
                    max: self.config.max_payload_size,
                });
            }
            if let Some(frame) = split_datagram(&buf[..n]) {
                self.route(frame);
            }
        }
    }

    fn run_length_prefixed(&self) -> Result<()> {
        let mut pending = BytesMut::with_capacity(READ_CHUNK_SIZE);
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            while let Some(frame) = decode_frame(&mut pending, self.config.max_payload_size)? {
                self.route(frame);
            }

            let n = self.read_raw(&mut chunk)?;
            if n == 0 {
                if pending.is_empty() {
                    return Ok(());
                }
                return Err(FrameError::ConnectionClosed);
            }
            pending.extend_from_slice(&chunk[..n]);
        }
    }

    fn read_raw(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.conn.read(buf) {
                Ok(n) => return Ok(n),
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    fn route(&self, frame: Frame) {
        let len = frame.payload.len();
        let tag = match frame.tag() {
            Ok(tag) => tag,
            Err(err) => {
                self.stats.dropped_frames.fetch_add(1, Ordering::Relaxed);
                warn!(tag = frame.tag, len, error = %err, "dropping malformed frame");
                return;
            }
        };

        if self.buffers[tag.index()].push(&frame.payload) {
            self.stats.routed_frames[tag.index()].fetch_add(1, Ordering::Relaxed);
            self.stats.routed_bytes[tag.index()].fetch_add(len as u64, Ordering::Relaxed);
            trace!(%tag, len, "frame routed");
        } else {
            self.stats.dropped_frames.fetch_add(1, Ordering::Relaxed);
            debug!(%tag, len, "lane closed; dropping frame");
        }
    }
}
