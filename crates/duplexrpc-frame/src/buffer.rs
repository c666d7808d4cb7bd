use std::io;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};

use crate::tag::Tag;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Ordered byte queue for one tag.
///
/// Fed by the demultiplexer, drained by one logical connection. Readers
/// block while the queue is empty and wake when bytes arrive or the buffer
/// is closed. The lock is never held across a blocking call.
#[derive(Debug)]
pub struct InboundBuffer {
    tag: Tag,
    state: Mutex<State>,
    readable: Condvar,
}

#[derive(Debug)]
struct State {
    data: BytesMut,
    closed: bool,
}

impl InboundBuffer {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            state: Mutex::new(State {
                data: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
                closed: false,
            }),
            readable: Condvar::new(),
        }
    }

    /// The tag whose payloads land here.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append bytes and wake readers. Returns `false` (and drops the bytes)
    /// once the buffer is closed.
    pub fn push(&self, bytes: &[u8]) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        if bytes.is_empty() {
            return true;
        }
        state.data.extend_from_slice(bytes);
        drop(state);
        self.readable.notify_all();
        true
    }

    /// Copy up to `buf.len()` queued bytes into `buf`, blocking while the
    /// queue is empty and open.
    ///
    /// Returns `Ok(0)` once the buffer is closed and drained. With a
    /// `timeout`, a wait that outlasts it fails with `TimedOut`.
    pub fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock();

        loop {
            if !state.data.is_empty() {
                let n = state.data.len().min(buf.len());
                buf[..n].copy_from_slice(&state.data[..n]);
                state.data.advance(n);
                return Ok(n);
            }

            if state.closed {
                return Ok(0);
            }

            state = match deadline {
                None => self
                    .readable
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("read on tag {} timed out", self.tag),
                        ));
                    }
                    self.readable
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }

    /// Close the buffer and wake every blocked reader. Idempotent.
    ///
    /// Bytes already queued stay readable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.readable.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Bytes queued and not yet read.
    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
