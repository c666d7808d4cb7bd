//! Tagged framing and two-lane multiplexing over one connection.
//!
//! Every write on the shared connection is prefixed with a one-byte [`Tag`]
//! (0 or 1). A single [`Demultiplexer`] thread reads the connection and routes
//! each payload into the [`InboundBuffer`] for its tag; a
//! [`LogicalConnection`] pairs one tag's [`Framer`] with that tag's buffer and
//! looks like an ordinary [`Connection`](duplexrpc_transport::Connection) to
//! whatever sits on top of it.
//!
//! Two wire formats are supported, see [`FrameMode`]. `Preserved` is the
//! default; byte streams such as Unix sockets need `LengthPrefixed`:
//!
//! ```text
//! Preserved:       [tag (1B)][payload ...]
//! LengthPrefixed:  [tag (1B)][length (4B LE)][payload (length bytes)]
//! ```

pub mod buffer;
pub mod codec;
pub mod demux;
pub mod error;
pub mod framer;
pub mod logical;
pub mod mux;
pub mod tag;

pub use buffer::InboundBuffer;
pub use codec::{
    decode_frame, encode_frame, split_datagram, Frame, FrameConfig, FrameMode,
    DEFAULT_MAX_PAYLOAD,
};
pub use demux::{DemuxStats, Demultiplexer};
pub use error::{FrameError, Result};
pub use framer::{Framer, SharedWriter};
pub use logical::LogicalConnection;
pub use mux::{Mux, MuxState};
pub use tag::Tag;
