//! # Chainheap: First-Fit Free-Chain Heap Allocator
//!
//! Chainheap is a small `no_std` heap allocator managing one contiguous,
//! growable memory region. Every block, free or used, carries a header and
//! sits in a single chain ordered by address, which keeps the design simple
//! enough to audit end to end.
//!
//! ## Architecture
//!
//! - **First-fit search**: allocation takes the first free block large
//!   enough, trading some fragmentation for a trivial, fast scan.
//! - **Block splitting**: an oversized free block is carved into an
//!   exact-size used block plus a free residual, so freed capacity is
//!   reusable at finer granularity. Adjacent free blocks are never merged
//!   back together.
//! - **Offset-linked chain**: blocks reference each other by byte offset
//!   into the region, and every header access is bounds-checked, so the
//!   chain can be inspected and validated without raw address arithmetic.
//! - **Pluggable growth**: all memory comes from a [`HeapGrower`], the only
//!   OS-facing boundary. [`FixedGrower`] serves a caller-provided buffer;
//!   `SbrkGrower` (cargo feature `sbrk`) serves the POSIX program break.
//!
//! The allocator is single-threaded by construction: all mutation goes
//! through `&mut self` and no internal locking is performed.
//!
//! Block headers sit directly in front of the payloads they describe, so a
//! client writing past the end of its allocation lands on the next block's
//! header. There is no guard against that at write time; the damage is
//! reported as [`HeapError::CorruptedHeader`] when the block is next
//! touched, if the integrity tag catches it at all.
//!
//! ## Usage
//!
//! ```rust
//! use chainheap::{ChainAllocator, FixedGrower};
//!
//! let mut backing = [0u8; 4096];
//! let grower = unsafe { FixedGrower::new(backing.as_mut_ptr(), backing.len()) };
//! let mut heap = ChainAllocator::new(grower);
//!
//! let ptr = heap.allocate(64).unwrap();
//!
//! // Use the 64 bytes...
//!
//! unsafe {
//!     heap.deallocate(ptr).unwrap();
//! }
//! ```
#![warn(clippy::pedantic, clippy::nursery)]
#![forbid(unsafe_op_in_unsafe_fn)]
#![no_std]

mod chain;
mod error;
mod grow;
mod header;

// Public exports
pub use chain::{BlockInfo, Blocks, ChainAllocator};
pub use error::{HeapError, Result};
#[cfg(feature = "sbrk")]
pub use grow::SbrkGrower;
pub use grow::{FixedGrower, HeapGrower};
pub use header::HEADER_SIZE;
