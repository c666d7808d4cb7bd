//! Full-duplex RPC over a single connection.
//!
//! Both ends of one connection act as RPC server and RPC client at once. A
//! one-byte tag on every frame keeps the two directions apart.
//!
//! # Crate Structure
//!
//! - [`transport`]: the blocking `Connection` abstraction (Unix sockets, in-process pipes)
//! - [`frame`]: tagged framing, the demultiplexer and logical connections
//! - [`peer`]: RPC server, client and the `Duplex` that joins them (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use duplexrpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use duplexrpc_frame::*;
}

/// Re-export duplex RPC types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use duplexrpc_peer::*;
}
