//! Block metadata
//!
//! Every block, free or used, starts with a fixed-width header describing
//! its payload. Headers live inside the managed region itself, immediately
//! before the payload they describe, and are serialized as native-endian
//! words so they can sit at any byte offset. The flip side of that layout is
//! that a client writing past the end of its payload lands on the next
//! block's header; the integrity tag exists to catch some of those cases
//! when the damaged block is next touched.

use crate::error::{HeapError, Result};

const WORD: usize = size_of::<usize>();

/// Serialized width of a block header in bytes.
pub const HEADER_SIZE: usize = 2 * WORD + 2 * size_of::<u32>();

/// Offset link value meaning "no next block".
const NO_NEXT: usize = usize::MAX;

/// Integrity tag recording how a block reached its current state.
///
/// The tag is a debugging aid: a fixed sentinel checked on deallocation to
/// catch double frees and header corruption. The constants are trivially
/// forgeable, so this is not any kind of security boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    /// Built by region growth or carved out by a split.
    Fresh,
    /// Free block handed out again after a deallocation.
    Recycled,
    /// Deallocated; must not be freed again.
    Freed,
}

impl BlockTag {
    const FRESH: u32 = 0x1234_5678;
    const RECYCLED: u32 = 0x7777_7777;
    const FREED: u32 = 0x5555_5555;

    #[must_use]
    #[inline]
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::Fresh => Self::FRESH,
            Self::Recycled => Self::RECYCLED,
            Self::Freed => Self::FREED,
        }
    }

    #[must_use]
    #[inline]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            Self::FRESH => Some(Self::Fresh),
            Self::RECYCLED => Some(Self::Recycled),
            Self::FREED => Some(Self::Freed),
            _ => None,
        }
    }
}

/// Decoded per-block metadata.
///
/// The serialized form is four native-endian fields at fixed offsets:
/// `payload_size: usize`, `next: usize` (`usize::MAX` when there is no next
/// block), `free: u32` (0 or 1), `tag: u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Bytes available to the client immediately after the header.
    pub payload_size: usize,
    /// Offset of the next block in region order, if any.
    pub next: Option<usize>,
    /// Free/used state.
    pub free: bool,
    /// Integrity tag.
    pub tag: BlockTag,
}

impl BlockHeader {
    /// Serialize the header into its in-region representation.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..WORD].copy_from_slice(&self.payload_size.to_ne_bytes());
        bytes[WORD..2 * WORD].copy_from_slice(&self.next.unwrap_or(NO_NEXT).to_ne_bytes());
        bytes[2 * WORD..2 * WORD + 4].copy_from_slice(&u32::from(self.free).to_ne_bytes());
        bytes[2 * WORD + 4..].copy_from_slice(&self.tag.to_raw().to_ne_bytes());
        bytes
    }

    /// Deserialize a header from its in-region representation.
    ///
    /// # Errors
    ///
    /// - `HeapError::CorruptedHeader` if the free word or the tag decodes to
    ///   no recognized state
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let payload_size = read_word(bytes, 0);
        let next_raw = read_word(bytes, WORD);
        let free = match read_u32(bytes, 2 * WORD) {
            0 => false,
            1 => true,
            _ => return Err(HeapError::CorruptedHeader),
        };
        let tag =
            BlockTag::from_raw(read_u32(bytes, 2 * WORD + 4)).ok_or(HeapError::CorruptedHeader)?;

        Ok(Self {
            payload_size,
            next: (next_raw != NO_NEXT).then_some(next_raw),
            free,
            tag,
        })
    }
}

#[inline]
fn read_word(bytes: &[u8], at: usize) -> usize {
    let mut word = [0u8; WORD];
    word.copy_from_slice(&bytes[at..at + WORD]);
    usize::from_ne_bytes(word)
}

#[inline]
fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_ne_bytes(word)
}
