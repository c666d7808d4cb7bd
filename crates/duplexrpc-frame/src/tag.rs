use std::fmt;

use crate::error::FrameError;

/// Which of the two logical lanes a frame belongs to.
///
/// Only two values exist. Anything else on the wire is a malformed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    Zero = 0,
    One = 1,
}

impl Tag {
    /// Both tags, in wire order.
    pub const ALL: [Tag; 2] = [Tag::Zero, Tag::One];

    /// The byte written on the wire.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte; `None` for anything other than 0 or 1.
    pub fn from_byte(byte: u8) -> Option<Tag> {
        match byte {
            0 => Some(Tag::Zero),
            1 => Some(Tag::One),
            _ => None,
        }
    }

    /// Index into per-tag arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The other tag.
    pub fn other(self) -> Tag {
        match self {
            Tag::Zero => Tag::One,
            Tag::One => Tag::Zero,
        }
    }
}

impl TryFrom<u8> for Tag {
    type Error = FrameError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Tag::from_byte(byte).ok_or(FrameError::UnknownTag(byte))
    }
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> u8 {
        tag.as_byte()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte())
    }
}
