use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::tag::Tag;

/// Size of the tag prefix.
pub const TAG_SIZE: usize = 1;

/// Size of the length field in [`FrameMode::LengthPrefixed`].
pub const LENGTH_SIZE: usize = 4;

/// Default maximum payload per frame: 64 KiB.
///
/// The [`Framer`](crate::Framer) truncates a larger write to one frame and
/// reports the short count; `write_all` sends the rest in further frames.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// How frame boundaries are recovered from the raw connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameMode {
    /// `[tag][payload]`. One raw write is one frame and one raw read is one
    /// frame. Only correct on connections that preserve write boundaries,
    /// such as [`duplexrpc_transport::pipe`].
    #[default]
    Preserved,
    /// `[tag][u32 LE length][payload]`. Correct on any byte stream,
    /// including Unix stream sockets.
    LengthPrefixed,
}

impl FrameMode {
    /// Header bytes in front of every payload.
    pub fn header_size(self) -> usize {
        match self {
            FrameMode::Preserved => TAG_SIZE,
            FrameMode::LengthPrefixed => TAG_SIZE + LENGTH_SIZE,
        }
    }
}

/// Framing configuration shared by the writer and the demultiplexer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Wire format. Both peers must agree on it.
    pub mode: FrameMode,
    /// Maximum payload size per frame in bytes. Default: 64 KiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            mode: FrameMode::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl FrameConfig {
    /// Config for boundary-preserving connections. Same as the default.
    pub fn preserved() -> Self {
        Self {
            mode: FrameMode::Preserved,
            ..Self::default()
        }
    }

    /// Config for byte streams that may coalesce or split writes.
    pub fn length_prefixed() -> Self {
        Self {
            mode: FrameMode::LengthPrefixed,
            ..Self::default()
        }
    }

    /// Override the per-frame payload limit.
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }
}

/// A frame as read off the wire.
///
/// The tag is kept as the raw byte so that routing can report unknown tags.
#[derive(Debug, Clone)]
pub struct Frame {
    pub tag: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame for a known tag.
    pub fn new(tag: Tag, payload: impl Into<Bytes>) -> Self {
        Self {
            tag: tag.as_byte(),
            payload: payload.into(),
        }
    }

    /// The parsed tag, or `UnknownTag`.
    pub fn tag(&self) -> Result<Tag> {
        Tag::try_from(self.tag)
    }
}

/// Encode one frame into `dst`.
pub fn encode_frame(tag: Tag, payload: &[u8], mode: FrameMode, dst: &mut BytesMut) -> Result<()> {
    dst.reserve(mode.header_size() + payload.len());
    dst.put_u8(tag.as_byte());
    if mode == FrameMode::LengthPrefixed {
        let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        })?;
        dst.put_u32_le(len);
    }
    dst.put_slice(payload);
    Ok(())
}

/// Decode one [`FrameMode::LengthPrefixed`] frame from `src`.
///
/// Returns `Ok(None)` until `src` holds a complete frame, then consumes it.
/// Unknown tags are not rejected here; the frame is returned so that the
/// caller can drop it and stay in sync with the stream.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let header = TAG_SIZE + LENGTH_SIZE;
    if src.len() < header {
        return Ok(None);
    }

    let tag = src[0];
    let mut len_bytes = [0u8; LENGTH_SIZE];
    len_bytes.copy_from_slice(&src[TAG_SIZE..header]);
    let payload_len = u32::from_le_bytes(len_bytes) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < header + payload_len {
        return Ok(None);
    }

    src.advance(header);
    let payload = src.split_to(payload_len).freeze();
    Ok(Some(Frame { tag, payload }))
}

/// Interpret one raw read as a [`FrameMode::Preserved`] frame.
///
/// Byte 0 is the tag, the rest is payload. `None` for an empty read.
pub fn split_datagram(datagram: &[u8]) -> Option<Frame> {
    let (&tag, payload) = datagram.split_first()?;
    Some(Frame {
        tag,
        payload: Bytes::copy_from_slice(payload),
    })
}
