use thiserror::Error;

/// Errors that can occur during heap operations
///
/// The first three variants are recoverable: the allocator is left in a
/// consistent state and the caller may retry or back off. The last three
/// report contract violations or metadata corruption; once one of them is
/// returned, the extent of the damage is unknown and the allocator must be
/// considered unusable.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum HeapError {
    /// The grower could not extend the managed region
    #[error("Out of memory")]
    OutOfMemory,
    /// Invalid size (must be non-zero)
    #[error("Invalid size (must be non-zero)")]
    InvalidSize,
    /// A size computation overflowed `usize`
    #[error("Size computation overflowed")]
    SizeOverflow,
    /// The pointer was not returned by this allocator
    #[error("Invalid pointer")]
    InvalidPointer,
    /// Double free detected
    #[error("Double free detected")]
    DoubleFree,
    /// A block header no longer decodes to a valid state
    #[error("Corrupted block header")]
    CorruptedHeader,
}

pub type Result<T> = core::result::Result<T, HeapError>;
