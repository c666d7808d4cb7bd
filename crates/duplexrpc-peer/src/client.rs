use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use duplexrpc_transport::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{DuplexError, Result};
use crate::message::{read_message, write_message, Request, Response};

/// Issues requests on a connection and waits for the matching responses.
///
/// A background thread reads responses and hands each one to the caller
/// waiting on its id, so any number of threads may call concurrently. When
/// the connection ends every waiting call fails with
/// [`DuplexError::ConnectionClosed`].
pub struct RpcClient {
    inner: Arc<ClientInner>,
    call_timeout: Option<Duration>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

struct ClientInner {
    conn: Arc<dyn Connection>,
    write_lock: Mutex<()>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Pending {
    calls: HashMap<u64, mpsc::Sender<Response>>,
    closed: bool,
}

impl ClientInner {
    fn pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn complete(&self, response: Response) {
        let sender = self.pending().calls.remove(&response.id);
        match sender {
            Some(sender) => {
                trace!(id = response.id, "response routed");
                // The caller may have given up already.
                let _ = sender.send(response);
            }
            None => debug!(id = response.id, "response for unknown call dropped"),
        }
    }

    fn forget(&self, id: u64) {
        self.pending().calls.remove(&id);
    }

    /// Stop accepting calls and release every waiter.
    fn fail_all(&self) {
        let mut pending = self.pending();
        pending.closed = true;
        let dropped = pending.calls.len();
        pending.calls.clear();
        if dropped > 0 {
            debug!(calls = dropped, "failing pending calls");
        }
    }

    fn read_responses(&self) {
        loop {
            match read_message::<_, Response>(&*self.conn) {
                Ok(Some(response)) => self.complete(response),
                Ok(None) => {
                    debug!("response stream ended");
                    break;
                }
                Err(DuplexError::Json(err)) => {
                    warn!(error = %err, "discarding malformed response");
                }
                Err(err) => {
                    debug!(error = %err, "response reader stopped");
                    break;
                }
            }
        }
        self.fail_all();
    }
}

impl RpcClient {
    /// Start a client on `conn` and its response reader thread.
    pub fn new(conn: Arc<dyn Connection>) -> io::Result<Self> {
        let inner = Arc::new(ClientInner {
            conn,
            write_lock: Mutex::new(()),
            pending: Mutex::new(Pending::default()),
            next_id: AtomicU64::new(1),
        });

        let reader_inner = Arc::clone(&inner);
        let reader = thread::Builder::new()
            .name("duplexrpc-client".to_string())
            .spawn(move || reader_inner.read_responses())?;

        Ok(Self {
            inner,
            call_timeout: None,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Bound how long [`call`](Self::call) waits for a response.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Call `method` with typed parameters and decode the typed result.
    pub fn call<Req, Resp>(&self, method: &str, params: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.call_value(method, params)?;
        Ok(serde_json::from_value(result)?)
    }

    /// Call `method` with raw JSON parameters.
    pub fn call_value(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, self.call_timeout)
    }

    /// Call `method`, waiting at most `timeout` for the response.
    pub fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let (tx, rx) = mpsc::channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.inner.pending();
            if pending.closed {
                return Err(DuplexError::Closed);
            }
            pending.calls.insert(id, tx);
        }

        let request = Request {
            id,
            method: method.to_string(),
            params,
        };
        trace!(id, method, "sending request");

        let sent = {
            let _guard = self
                .inner
                .write_lock
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            write_message(&*self.inner.conn, &request)
        };
        if let Err(err) = sent {
            self.inner.forget(id);
            return Err(match err {
                DuplexError::Io(io_err) if io_err.kind() == io::ErrorKind::NotConnected => {
                    DuplexError::Closed
                }
                other => other,
            });
        }

        let response = match timeout {
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(response) => response,
                Err(RecvTimeoutError::Timeout) => {
                    self.inner.forget(id);
                    return Err(DuplexError::Timeout(timeout));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(DuplexError::ConnectionClosed),
            },
            None => rx.recv().map_err(|_| DuplexError::ConnectionClosed)?,
        };
        response.into_result()
    }

    /// Calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending().calls.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pending().closed
    }

    /// Close the connection, fail pending calls and stop the reader thread.
    /// Idempotent.
    pub fn shutdown(&self) -> io::Result<()> {
        let result = self.inner.conn.close();
        self.inner.fail_all();

        let handle = self
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("response reader thread panicked");
            }
        }
        result
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("pending_calls", &self.pending_calls())
            .field("closed", &self.is_closed())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}
