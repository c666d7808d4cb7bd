use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use duplexrpc_frame::{DemuxStats, FrameConfig, LogicalConnection, Mux, Tag};
use duplexrpc_transport::Connection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

pub use duplexrpc_frame::MuxState as DuplexState;

use crate::client::RpcClient;
use crate::error::{DuplexError, Result};
use crate::handshake::{exchange_roles, HandshakeConfig, HandshakeResult};
use crate::server::{RpcServer, Service};

/// Which end of the connection this side is. The side that dialed is the
/// initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn from_initiator(initiator: bool) -> Self {
        if initiator {
            Role::Initiator
        } else {
            Role::Responder
        }
    }

    pub fn is_initiator(self) -> bool {
        self == Role::Initiator
    }

    /// The role the other end must have.
    pub fn peer(self) -> Self {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }

    /// Tag carrying requests into this side's server.
    pub fn server_tag(self) -> Tag {
        match self {
            Role::Initiator => Tag::Zero,
            Role::Responder => Tag::One,
        }
    }

    /// Tag carrying this side's outgoing calls.
    pub fn client_tag(self) -> Tag {
        self.server_tag().other()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Responder => f.write_str("responder"),
        }
    }
}

/// Settings for a [`Duplex`].
#[derive(Debug, Clone, Default)]
pub struct DuplexConfig {
    /// Framing on the raw connection. Defaults to `[tag][payload]` frames,
    /// which need a boundary-preserving connection; see
    /// [`for_stream`](Self::for_stream).
    pub frame: FrameConfig,
    /// Run the role handshake before multiplexing. Off by default.
    pub handshake: Option<HandshakeConfig>,
    /// Upper bound on how long a call waits for its response.
    pub call_timeout: Option<Duration>,
}

impl DuplexConfig {
    /// Defaults with length-prefixed frames, for byte streams such as Unix
    /// sockets. [`connect`](crate::connect) and
    /// [`DuplexListener`](crate::DuplexListener) start from this.
    pub fn for_stream() -> Self {
        Self::default().with_frame(FrameConfig::length_prefixed())
    }

    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = Some(handshake);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

/// An RPC server and an RPC client sharing one connection.
///
/// Requests from the peer arrive on the server lane and are answered by the
/// registered services; calls made here leave on the client lane. The two
/// lanes never wait on each other, so a service may itself call back into
/// the peer while handling a request.
pub struct Duplex {
    role: Role,
    mux: Mux,
    server: RpcServer,
    client: RpcClient,
    server_slot: Arc<LogicalConnection>,
    client_slot: Arc<LogicalConnection>,
    serving: AtomicBool,
    peer: Option<HandshakeResult>,
}

impl Duplex {
    /// Start a duplex on `raw` with default settings.
    pub fn new<C: Connection + 'static>(raw: C, initiator: bool) -> Result<Self> {
        Self::with_config(raw, initiator, DuplexConfig::default())
    }

    pub fn with_config<C: Connection + 'static>(
        raw: C,
        initiator: bool,
        config: DuplexConfig,
    ) -> Result<Self> {
        Self::from_shared(Arc::new(raw), initiator, config)
    }

    /// Start a duplex on a connection the caller keeps a handle to.
    ///
    /// Runs the handshake if configured, then starts the demultiplexer and
    /// the client's response reader. On failure `raw` is closed.
    pub fn from_shared(
        raw: Arc<dyn Connection>,
        initiator: bool,
        config: DuplexConfig,
    ) -> Result<Self> {
        let role = Role::from_initiator(initiator);

        let peer = match &config.handshake {
            Some(handshake) => match exchange_roles(&*raw, role, handshake) {
                Ok(result) => Some(result),
                Err(err) => {
                    let _ = raw.close();
                    return Err(err);
                }
            },
            None => None,
        };

        let mux = Mux::start(raw, config.frame.clone())?;
        let server_slot = mux.lane(role.server_tag());
        let client_slot = mux.lane(role.client_tag());
        let client_conn: Arc<dyn Connection> = Arc::clone(&client_slot) as Arc<dyn Connection>;
        let client = RpcClient::new(client_conn)?.with_call_timeout(config.call_timeout);

        info!(
            %role,
            server_tag = %role.server_tag(),
            client_tag = %role.client_tag(),
            peer = ?mux.raw().peer_addr(),
            "duplex started"
        );

        Ok(Self {
            role,
            mux,
            server: RpcServer::new(),
            client,
            server_slot,
            client_slot,
            serving: AtomicBool::new(false),
            peer,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> DuplexState {
        self.mux.state()
    }

    /// Lane the peer's requests arrive on.
    pub fn server_slot(&self) -> &Arc<LogicalConnection> {
        &self.server_slot
    }

    /// Lane this side's calls leave on.
    pub fn client_slot(&self) -> &Arc<LogicalConnection> {
        &self.client_slot
    }

    pub fn stats(&self) -> Arc<DemuxStats> {
        self.mux.stats()
    }

    /// What the peer announced in the handshake, if one was run.
    pub fn peer(&self) -> Option<&HandshakeResult> {
        self.peer.as_ref()
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<String> {
        self.server.services()
    }

    /// Expose `service` to the peer.
    pub fn register<S: Service + 'static>(&self, service: S) -> Result<()> {
        self.ensure_open()?;
        self.server.register(service)
    }

    /// Answer the peer's requests until the connection closes.
    ///
    /// Blocks the calling thread; calls made on this duplex from other
    /// threads proceed meanwhile. Only one `serve` may run at a time.
    pub fn serve(&self) -> Result<()> {
        self.ensure_open()?;
        if self.serving.swap(true, Ordering::SeqCst) {
            return Err(DuplexError::AlreadyServing);
        }

        debug!(role = %self.role, "serving");
        let result = self.server.serve_conn(&*self.server_slot);
        self.serving.store(false, Ordering::SeqCst);
        debug!(role = %self.role, "serve finished");
        result
    }

    /// Run [`serve`](Self::serve) on its own thread.
    pub fn spawn_serve(self: &Arc<Self>) -> io::Result<JoinHandle<Result<()>>> {
        let duplex = Arc::clone(self);
        thread::Builder::new()
            .name("duplexrpc-serve".to_string())
            .spawn(move || duplex.serve())
    }

    /// Call `method` on the peer and wait for the typed result.
    pub fn call<Req, Resp>(&self, method: &str, params: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.ensure_callable()?;
        self.client.call(method, params)
    }

    pub fn call_value(&self, method: &str, params: Value) -> Result<Value> {
        self.ensure_callable()?;
        self.client.call_value(method, params)
    }

    /// Close the raw connection. Both lanes end, pending calls fail with
    /// [`DuplexError::ConnectionClosed`], and `serve` returns. Idempotent.
    pub fn close(&self) -> Result<()> {
        let state = self.state();
        let raw = self.mux.close();
        let client = self.client.shutdown();
        if state == DuplexState::Open {
            debug!(role = %self.role, "duplex closed");
        }
        raw?;
        client?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            DuplexState::Open => Ok(()),
            state => Err(DuplexError::InvalidState(state)),
        }
    }

    fn ensure_callable(&self) -> Result<()> {
        match self.state() {
            DuplexState::Open => Ok(()),
            _ => Err(DuplexError::Closed),
        }
    }
}

impl Drop for Duplex {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for Duplex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Duplex")
            .field("role", &self.role)
            .field("state", &self.state())
            .field("services", &self.services())
            .finish()
    }
}
