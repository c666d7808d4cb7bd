use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use duplexrpc_transport::Connection;
use tracing::{debug, warn};

use crate::codec::FrameConfig;
use crate::demux::{DemuxStats, Demultiplexer};
use crate::framer::{Framer, SharedWriter};
use crate::logical::LogicalConnection;
use crate::tag::Tag;

/// Lifecycle of a multiplexed connection. There is no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    Open,
    Closing,
    Closed,
}

impl MuxState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => MuxState::Open,
            1 => MuxState::Closing,
            _ => MuxState::Closed,
        }
    }
}

/// A raw connection split into two [`LogicalConnection`]s.
///
/// Owns the raw connection, the shared writer and the demultiplexer thread.
/// The connection tears itself down when the raw stream ends or fails, or
/// when [`close`](Self::close) is called; either way both lanes stop
/// accepting writes and their readers see end-of-stream.
pub struct Mux {
    inner: Arc<Inner>,
    lanes: [Arc<LogicalConnection>; 2],
    stats: Arc<DemuxStats>,
    demux_thread: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    raw: Arc<dyn Connection>,
    writer: Arc<SharedWriter>,
    state: AtomicU8,
}

impl Inner {
    fn state(&self) -> MuxState {
        MuxState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move `Open` to `Closing`. Returns whether this call did it.
    fn begin_close(&self) -> bool {
        self.state
            .compare_exchange(
                MuxState::Open as u8,
                MuxState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn teardown(&self) -> io::Result<()> {
        self.begin_close();
        self.writer.close();
        let result = self.raw.close();
        self.state.store(MuxState::Closed as u8, Ordering::SeqCst);
        result
    }
}

impl Mux {
    /// Split `raw` into two lanes and start the demultiplexer thread.
    pub fn start(raw: Arc<dyn Connection>, config: FrameConfig) -> io::Result<Self> {
        let writer = Arc::new(SharedWriter::new(Arc::clone(&raw), config.clone()));
        let demux = Demultiplexer::new(Arc::clone(&raw), config);
        let stats = demux.stats();
        let lanes = Tag::ALL.map(|tag| {
            Arc::new(LogicalConnection::new(
                Framer::new(tag, Arc::clone(&writer)),
                demux.buffer(tag),
            ))
        });

        let inner = Arc::new(Inner {
            raw,
            writer,
            state: AtomicU8::new(MuxState::Open as u8),
        });

        let thread_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("duplexrpc-demux".to_string())
            .spawn(move || {
                if let Err(err) = demux.run() {
                    warn!(error = %err, "connection failed");
                }
                if let Err(err) = thread_inner.teardown() {
                    debug!(error = %err, "raw close after demux exit failed");
                }
            })?;

        debug!(addr = ?inner.raw.peer_addr(), "mux started");
        Ok(Self {
            inner,
            lanes,
            stats,
            demux_thread: Mutex::new(Some(handle)),
        })
    }

    /// The logical connection for `tag`.
    pub fn lane(&self, tag: Tag) -> Arc<LogicalConnection> {
        Arc::clone(&self.lanes[tag.index()])
    }

    pub fn stats(&self) -> Arc<DemuxStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> MuxState {
        self.inner.state()
    }

    /// The raw connection underneath both lanes.
    pub fn raw(&self) -> &Arc<dyn Connection> {
        &self.inner.raw
    }

    /// Close the raw connection and wait for the demultiplexer to finish.
    /// Idempotent.
    pub fn close(&self) -> io::Result<()> {
        if self.inner.begin_close() {
            debug!("closing mux");
        }
        let result = self.inner.teardown();

        let handle = self
            .demux_thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("demultiplexer thread panicked");
            }
        }
        result
    }
}

impl Drop for Mux {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Mux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mux").field("state", &self.state()).finish()
    }
}
