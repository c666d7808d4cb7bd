//! In-process connection pair.
//!
//! Each `write` is queued as one chunk and handed to the peer's `read` as a
//! unit, so write boundaries survive as long as the reader's buffer is large
//! enough for the chunk. Writes never block.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::connection::Connection;

/// Create a connected pair of in-process pipe ends.
pub fn pipe() -> (PipeEnd, PipeEnd) {
    let shared = Arc::new(Shared {
        lanes: [Lane::default(), Lane::default()],
    });
    let left = PipeEnd {
        shared: Arc::clone(&shared),
        inbound: 0,
        timeouts: Mutex::new(Timeouts::default()),
    };
    let right = PipeEnd {
        shared,
        inbound: 1,
        timeouts: Mutex::new(Timeouts::default()),
    };
    (left, right)
}

/// One end of a [`pipe()`].
pub struct PipeEnd {
    shared: Arc<Shared>,
    /// Index of the lane this end reads from; it writes to the other one.
    inbound: usize,
    timeouts: Mutex<Timeouts>,
}

struct Shared {
    lanes: [Lane; 2],
}

#[derive(Default)]
struct Lane {
    state: Mutex<LaneState>,
    readable: Condvar,
}

#[derive(Default)]
struct LaneState {
    chunks: VecDeque<Vec<u8>>,
    closed: bool,
}

#[derive(Default, Clone, Copy)]
struct Timeouts {
    read: Option<Duration>,
}

impl Lane {
    fn lock(&self) -> MutexGuard<'_, LaneState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn close(&self) {
        self.lock().closed = true;
        self.readable.notify_all();
    }
}

impl PipeEnd {
    fn inbound(&self) -> &Lane {
        &self.shared.lanes[self.inbound]
    }

    fn outbound(&self) -> &Lane {
        &self.shared.lanes[1 - self.inbound]
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.timeouts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .read
    }
}

impl Connection for PipeEnd {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let deadline = self.read_timeout().map(|timeout| Instant::now() + timeout);
        let lane = self.inbound();
        let mut state = lane.lock();

        loop {
            if let Some(front) = state.chunks.front_mut() {
                let n = front.len().min(buf.len());
                buf[..n].copy_from_slice(&front[..n]);
                if n == front.len() {
                    state.chunks.pop_front();
                } else {
                    front.drain(..n);
                }
                return Ok(n);
            }

            if state.closed {
                return Ok(0);
            }

            state = match deadline {
                None => lane
                    .readable
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(io::Error::from(io::ErrorKind::TimedOut));
                    }
                    lane.readable
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let lane = self.outbound();
        let mut state = lane.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        state.chunks.push_back(buf.to_vec());
        drop(state);
        lane.readable.notify_all();
        trace!(len = buf.len(), "pipe write");
        Ok(buf.len())
    }

    fn close(&self) -> io::Result<()> {
        for lane in &self.shared.lanes {
            lane.close();
        }
        Ok(())
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.timeouts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .read = timeout;
        Ok(())
    }

    fn set_write_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        // Writes are queued and never block.
        Ok(())
    }

    fn local_addr(&self) -> Option<String> {
        Some("pipe".to_string())
    }

    fn peer_addr(&self) -> Option<String> {
        Some("pipe".to_string())
    }
}

impl std::fmt::Debug for PipeEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeEnd")
            .field("inbound", &self.inbound)
            .finish()
    }
}
