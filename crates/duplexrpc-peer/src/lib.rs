//! Full-duplex RPC over a single connection.
//!
//! A [`Duplex`] splits one connection into two tagged lanes and puts an
//! [`RpcServer`] on one and an [`RpcClient`] on the other, so both peers can
//! call each other at the same time. Which tag serves which role is decided
//! by the local [`Role`]: the side that dialed is the initiator.
//!
//! ```text
//! initiator: server lane = tag 0, client lane = tag 1
//! responder: server lane = tag 1, client lane = tag 0
//! ```

pub mod client;
pub mod connector;
pub mod duplex;
pub mod error;
pub mod handshake;
#[cfg(unix)]
pub mod listener;
pub mod message;
pub mod server;

pub use client::RpcClient;
pub use connector::{connect, connect_with_config};
pub use duplex::{Duplex, DuplexConfig, DuplexState, Role};
pub use error::{DuplexError, Result};
pub use handshake::{exchange_roles, HandshakeConfig, HandshakeResult, Hello};
#[cfg(unix)]
pub use listener::DuplexListener;
pub use message::{Request, Response, MAX_MESSAGE_SIZE};
pub use server::{FnService, RpcServer, Service, ServiceBuilder, DEFAULT_MAX_IN_FLIGHT};
