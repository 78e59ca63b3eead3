//! First-fit chain allocator
//!
//! Every block ever created, free or used, sits in a single chain ordered by
//! byte offset into the managed region. Allocation walks the chain for the
//! first free block that fits, carving off the spare capacity when there is
//! enough of it, and grows the region by exactly one block when nothing
//! fits. Deallocation flips a block back to free after checking its header;
//! blocks are never removed from the chain and the region is never handed
//! back, so the chain only ever gets longer.

use core::ptr::NonNull;

use crate::error::{HeapError, Result};
use crate::grow::HeapGrower;
use crate::header::{BlockHeader, BlockTag, HEADER_SIZE};

/// Smallest residual payload worth carving into its own free block.
///
/// A free block whose spare capacity would leave less than this (after the
/// residual's header) is handed out whole instead of split.
const MIN_RESIDUAL_PAYLOAD: usize = size_of::<usize>();

/// Managed region bookkeeping: base address plus bytes grown so far.
///
/// The base never moves (grower contract), so every block is addressed by
/// its byte offset from it.
#[derive(Clone, Copy)]
struct Region {
    base: NonNull<u8>,
    len: usize,
}

/// Outcome of a first-fit walk over the chain.
enum SearchOutcome {
    /// Offset of the first free block with enough payload.
    Found(usize),
    /// No candidate; the chain's last block, so growth can append in O(1).
    Miss { last: Option<usize> },
}

/// A first-fit heap allocator over a single growable region.
///
/// The allocator starts empty and obtains all memory from its [`HeapGrower`].
/// All mutation goes through `&mut self`; there is no internal
/// synchronization, callers wanting to share one across threads must wrap it
/// in a lock.
///
/// Errors of the [`HeapError::InvalidPointer`] / [`HeapError::DoubleFree`] /
/// [`HeapError::CorruptedHeader`] class report client contract violations.
/// They are returned rather than aborting so harnesses can observe them, but
/// the allocator must be considered corrupt once one surfaces.
pub struct ChainAllocator<G: HeapGrower> {
    grower: G,
    region: Option<Region>,
    head: Option<usize>,
}

impl<G: HeapGrower> ChainAllocator<G> {
    /// Create an empty allocator.
    ///
    /// No memory is requested from the grower until the first allocation.
    #[must_use]
    pub const fn new(grower: G) -> Self {
        Self {
            grower,
            region: None,
            head: None,
        }
    }

    /// Allocate `size` bytes and return a pointer to the payload.
    ///
    /// The first free block with at least `size` bytes of payload is reused,
    /// carving off the spare capacity into a new free block when there is
    /// enough of it. When no block fits, the region grows by exactly one
    /// header plus `size` bytes.
    ///
    /// # Errors
    ///
    /// - `HeapError::InvalidSize` if `size` is zero
    /// - `HeapError::OutOfMemory` if the grower cannot extend the region;
    ///   the chain is left unchanged
    /// - `HeapError::SizeOverflow` if `size` plus the header width overflows
    /// - `HeapError::CorruptedHeader` if the walk hits an invalid header
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        if size == 0 {
            return Err(HeapError::InvalidSize);
        }

        if self.head.is_none() {
            let offset = self.grow_block(size, None)?;
            return Ok(Self::payload_ptr(self.current_region()?, offset));
        }

        match self.find_free(size)? {
            SearchOutcome::Miss { last } => {
                let offset = self.grow_block(size, last)?;
                Ok(Self::payload_ptr(self.current_region()?, offset))
            }
            SearchOutcome::Found(offset) => {
                let region = self.current_region()?;
                let mut header = self.load_header(offset)?;
                if header.payload_size >= size.saturating_add(HEADER_SIZE + MIN_RESIDUAL_PAYLOAD) {
                    Self::split(region, offset, &mut header, size);
                }
                header.free = false;
                header.tag = BlockTag::Recycled;
                Self::store_header(region, offset, &header);
                Ok(Self::payload_ptr(region, offset))
            }
        }
    }

    /// Release the allocation at `ptr`.
    ///
    /// The payload bytes are left as they are; only the header changes.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Self::allocate`],
    /// [`Self::reallocate`] or [`Self::callocate`] on this allocator, and
    /// must not be used again after this call returns `Ok`.
    ///
    /// # Errors
    ///
    /// - `HeapError::InvalidPointer` if `ptr` does not reference a live
    ///   allocation of this allocator
    /// - `HeapError::DoubleFree` if the block was already freed
    /// - `HeapError::CorruptedHeader` if the header no longer decodes
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<()> {
        let offset = self.block_offset(ptr)?;
        let mut header = self.load_header(offset)?;

        if header.tag == BlockTag::Freed {
            return Err(HeapError::DoubleFree);
        }
        if header.free {
            // A free block with a live tag is a split residual that was
            // never handed out; the pointer cannot have come from us.
            return Err(HeapError::InvalidPointer);
        }

        header.free = true;
        header.tag = BlockTag::Freed;
        Self::store_header(self.current_region()?, offset, &header);
        Ok(())
    }

    /// Resize the allocation at `ptr` to `size` bytes.
    ///
    /// With `ptr` of `None` this is exactly [`Self::allocate`]. A block
    /// already large enough is returned unchanged; it is never shrunk in
    /// place. Otherwise a new block is allocated, the old payload copied
    /// over in full, and the old block freed. On error the old allocation
    /// is left fully intact and still owned by the caller.
    ///
    /// # Safety
    ///
    /// If `ptr` is `Some`, it must reference a live allocation of this
    /// allocator. On success the old pointer must no longer be used (the
    /// block may have moved).
    ///
    /// # Errors
    ///
    /// Those of [`Self::allocate`], plus `HeapError::InvalidPointer` /
    /// `HeapError::CorruptedHeader` when `ptr` fails validation.
    pub unsafe fn reallocate(
        &mut self,
        ptr: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.allocate(size);
        };

        let offset = self.block_offset(ptr)?;
        let header = self.load_header(offset)?;
        if header.free || header.tag == BlockTag::Freed {
            return Err(HeapError::InvalidPointer);
        }

        if header.payload_size >= size {
            return Ok(ptr);
        }

        let new_ptr = self.allocate(size)?;
        // SAFETY: source and destination are distinct blocks of this region;
        // the source has `payload_size` readable bytes and the destination
        // at least `size > payload_size` writable ones.
        unsafe {
            core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), header.payload_size);
        }
        // SAFETY: `ptr` was validated live above and is released exactly once.
        unsafe { self.deallocate(ptr)? };
        Ok(new_ptr)
    }

    /// Allocate a zero-filled region for `count` elements of `element_size`
    /// bytes each.
    ///
    /// # Errors
    ///
    /// - `HeapError::SizeOverflow` if `count * element_size` overflows
    /// - Those of [`Self::allocate`] for the computed total
    pub fn callocate(&mut self, count: usize, element_size: usize) -> Result<NonNull<u8>> {
        let total = count
            .checked_mul(element_size)
            .ok_or(HeapError::SizeOverflow)?;
        let ptr = self.allocate(total)?;
        // SAFETY: `ptr` is a fresh allocation with at least `total` writable
        // payload bytes.
        unsafe {
            ptr.as_ptr().write_bytes(0, total);
        }
        Ok(ptr)
    }

    /// Iterate over the chain in offset order.
    ///
    /// Yields one [`BlockInfo`] per block; a corrupted header yields a
    /// single `Err` after which the iterator is exhausted.
    #[must_use]
    pub const fn blocks(&self) -> Blocks<'_, G> {
        Blocks {
            allocator: self,
            current: self.head,
            failed: false,
        }
    }

    /// Total bytes obtained from the grower so far.
    #[must_use]
    pub const fn region_len(&self) -> usize {
        match self.region {
            Some(region) => region.len,
            None => 0,
        }
    }

    /// Walk the chain for the first free block with `min_size` payload bytes.
    fn find_free(&self, min_size: usize) -> Result<SearchOutcome> {
        let mut last = None;
        let mut current = self.head;
        while let Some(offset) = current {
            let header = self.load_header(offset)?;
            if header.free && header.payload_size >= min_size {
                return Ok(SearchOutcome::Found(offset));
            }
            last = Some(offset);
            current = header.next;
        }
        Ok(SearchOutcome::Miss { last })
    }

    /// Grow the region by one block of `size` payload bytes and append it
    /// after `last` (or make it the chain head).
    fn grow_block(&mut self, size: usize, last: Option<usize>) -> Result<usize> {
        let total = HEADER_SIZE
            .checked_add(size)
            .ok_or(HeapError::SizeOverflow)?;
        let chunk = self.grower.grow(total).ok_or(HeapError::OutOfMemory)?;

        let (region, offset) = match self.region {
            None => (
                Region {
                    base: chunk,
                    len: total,
                },
                0,
            ),
            Some(region) => {
                // Grower contract: the extension continues the region.
                debug_assert_eq!(chunk.as_ptr().addr(), region.base.as_ptr().addr() + region.len);
                let len = region
                    .len
                    .checked_add(total)
                    .ok_or(HeapError::SizeOverflow)?;
                (
                    Region {
                        base: region.base,
                        len,
                    },
                    region.len,
                )
            }
        };
        self.region = Some(region);

        let header = BlockHeader {
            payload_size: size,
            next: None,
            free: false,
            tag: BlockTag::Fresh,
        };
        Self::store_header(region, offset, &header);

        if let Some(last_offset) = last {
            let mut last_header = self.load_header(last_offset)?;
            last_header.next = Some(offset);
            Self::store_header(region, last_offset, &last_header);
        } else {
            self.head = Some(offset);
        }

        Ok(offset)
    }

    /// Carve the block at `offset` into a `used_size` block plus a free
    /// residual spliced in right after it. Metadata surgery only; no payload
    /// bytes move.
    ///
    /// The caller has checked that the block has room for the residual's
    /// header plus at least [`MIN_RESIDUAL_PAYLOAD`] bytes, and stores the
    /// updated `header` itself.
    fn split(region: Region, offset: usize, header: &mut BlockHeader, used_size: usize) {
        let residual_offset = offset + HEADER_SIZE + used_size;
        let residual = BlockHeader {
            payload_size: header.payload_size - used_size - HEADER_SIZE,
            next: header.next,
            free: true,
            tag: BlockTag::Fresh,
        };
        Self::store_header(region, residual_offset, &residual);

        header.payload_size = used_size;
        header.next = Some(residual_offset);
    }

    /// Map a payload pointer back to its block's offset.
    fn block_offset(&self, ptr: NonNull<u8>) -> Result<usize> {
        let region = self.current_region()?;
        let rel = ptr
            .as_ptr()
            .addr()
            .checked_sub(region.base.as_ptr().addr())
            .ok_or(HeapError::InvalidPointer)?;
        if rel < HEADER_SIZE || rel >= region.len {
            return Err(HeapError::InvalidPointer);
        }
        Ok(rel - HEADER_SIZE)
    }

    /// Read and validate the header at `offset`.
    ///
    /// Beyond decoding, this checks that the header and its payload lie
    /// within the region and that the forward link actually points forward,
    /// so traversals cannot run off the region or loop.
    fn load_header(&self, offset: usize) -> Result<BlockHeader> {
        let region = self.current_region()?;
        let payload_start = offset
            .checked_add(HEADER_SIZE)
            .ok_or(HeapError::CorruptedHeader)?;
        if payload_start > region.len {
            return Err(HeapError::CorruptedHeader);
        }

        let mut bytes = [0u8; HEADER_SIZE];
        // SAFETY: `offset + HEADER_SIZE` is within the grown region, which
        // the grower contract keeps valid for reads.
        unsafe {
            core::ptr::copy_nonoverlapping(
                region.base.as_ptr().add(offset),
                bytes.as_mut_ptr(),
                HEADER_SIZE,
            );
        }
        let header = BlockHeader::decode(&bytes)?;

        let payload_end = payload_start
            .checked_add(header.payload_size)
            .ok_or(HeapError::CorruptedHeader)?;
        if header.payload_size == 0 || payload_end > region.len {
            return Err(HeapError::CorruptedHeader);
        }
        if let Some(next) = header.next
            && next <= offset
        {
            return Err(HeapError::CorruptedHeader);
        }

        Ok(header)
    }

    /// Write `header` at `offset`.
    ///
    /// Callers pass offsets that came from a validated load or from a growth
    /// that covers them.
    fn store_header(region: Region, offset: usize, header: &BlockHeader) {
        debug_assert!(offset + HEADER_SIZE <= region.len);
        let bytes = header.encode();
        // SAFETY: `offset + HEADER_SIZE` is within the grown region, which
        // the grower contract keeps valid for writes.
        unsafe {
            core::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                region.base.as_ptr().add(offset),
                HEADER_SIZE,
            );
        }
    }

    fn payload_ptr(region: Region, offset: usize) -> NonNull<u8> {
        // SAFETY: callers only pass offsets of blocks within the region, so
        // the payload start is in bounds and non-null.
        unsafe { NonNull::new_unchecked(region.base.as_ptr().add(offset + HEADER_SIZE)) }
    }

    fn current_region(&self) -> Result<Region> {
        self.region.ok_or(HeapError::InvalidPointer)
    }
}

// SAFETY: the allocator exclusively owns its region (grower contract) and
// all mutation goes through `&mut self`, so moving it or sharing references
// across threads cannot alias the managed memory.
unsafe impl<G: HeapGrower + Send> Send for ChainAllocator<G> {}
unsafe impl<G: HeapGrower + Sync> Sync for ChainAllocator<G> {}

/// Snapshot of one block's metadata, as reported by
/// [`ChainAllocator::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Byte offset of the block's header inside the managed region.
    pub offset: usize,
    /// Payload bytes owned by the block.
    pub payload_size: usize,
    /// Free/used state.
    pub is_free: bool,
}

/// Iterator over the chain in offset order.
pub struct Blocks<'a, G: HeapGrower> {
    allocator: &'a ChainAllocator<G>,
    current: Option<usize>,
    failed: bool,
}

impl<G: HeapGrower> Iterator for Blocks<'_, G> {
    type Item = Result<BlockInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let offset = self.current?;
        match self.allocator.load_header(offset) {
            Ok(header) => {
                self.current = header.next;
                Some(Ok(BlockInfo {
                    offset,
                    payload_size: header.payload_size,
                    is_free: header.free,
                }))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grow::FixedGrower;

    extern crate alloc;
    use alloc::vec::Vec;

    fn allocator(buffer: &mut [u8]) -> ChainAllocator<FixedGrower> {
        ChainAllocator::new(unsafe { FixedGrower::new(buffer.as_mut_ptr(), buffer.len()) })
    }

    fn chain(heap: &ChainAllocator<FixedGrower>) -> Vec<BlockInfo> {
        heap.blocks().map(Result::unwrap).collect()
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let mut buffer = [0u8; 1024];
        let mut heap = allocator(&mut buffer);

        assert_eq!(heap.allocate(0), Err(HeapError::InvalidSize));
        assert_eq!(heap.blocks().count(), 0);
        assert_eq!(heap.region_len(), 0);
    }

    #[test]
    fn test_first_allocation_grows_one_block() {
        let mut buffer = [0u8; 1024];
        let mut heap = allocator(&mut buffer);

        let ptr = heap.allocate(40).unwrap();
        assert_eq!(ptr.as_ptr().addr(), buffer.as_ptr().addr() + HEADER_SIZE);

        let blocks = chain(&heap);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].offset, 0);
        assert_eq!(blocks[0].payload_size, 40);
        assert!(!blocks[0].is_free);
        assert_eq!(heap.region_len(), HEADER_SIZE + 40);
    }

    #[test]
    fn test_miss_appends_after_last_block() {
        let mut buffer = [0u8; 1024];
        let mut heap = allocator(&mut buffer);

        let first = heap.allocate(32).unwrap();
        let second = heap.allocate(16).unwrap();
        assert_eq!(
            second.as_ptr().addr(),
            first.as_ptr().addr() + 32 + HEADER_SIZE
        );

        let blocks = chain(&heap);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].offset, HEADER_SIZE + 32);
    }

    #[test]
    fn test_exact_fit_is_reused_without_split() {
        let mut buffer = [0u8; 1024];
        let mut heap = allocator(&mut buffer);

        let ptr = heap.allocate(40).unwrap();
        let _other = heap.allocate(24).unwrap();
        unsafe { heap.deallocate(ptr).unwrap() };

        let again = heap.allocate(40).unwrap();
        assert_eq!(again, ptr);
        assert_eq!(heap.blocks().count(), 2);
    }

    #[test]
    fn test_small_spare_is_consumed_whole() {
        let mut buffer = [0u8; 1024];
        let mut heap = allocator(&mut buffer);

        // Spare of HEADER_SIZE + MIN_RESIDUAL_PAYLOAD - 1: one byte short of
        // the split threshold.
        let ptr = heap.allocate(32 + HEADER_SIZE + MIN_RESIDUAL_PAYLOAD - 1).unwrap();
        unsafe { heap.deallocate(ptr).unwrap() };

        let again = heap.allocate(32).unwrap();
        assert_eq!(again, ptr);

        let blocks = chain(&heap);
        assert_eq!(blocks.len(), 1);
        // The block keeps its original payload size
        assert_eq!(
            blocks[0].payload_size,
            32 + HEADER_SIZE + MIN_RESIDUAL_PAYLOAD - 1
        );
    }

    #[test]
    fn test_split_conserves_bytes() {
        let mut buffer = [0u8; 1024];
        let mut heap = allocator(&mut buffer);

        let big = heap.allocate(200).unwrap();
        unsafe { heap.deallocate(big).unwrap() };

        let small = heap.allocate(64).unwrap();
        assert_eq!(small, big);

        let blocks = chain(&heap);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].payload_size, 64);
        assert!(!blocks[0].is_free);
        assert!(blocks[1].is_free);
        // used + header + residual adds back up to the original payload
        assert_eq!(
            blocks[0].payload_size + HEADER_SIZE + blocks[1].payload_size,
            200
        );
        assert_eq!(blocks[1].offset, HEADER_SIZE + 64);
    }

    #[test]
    fn test_double_free_is_detected() {
        let mut buffer = [0u8; 1024];
        let mut heap = allocator(&mut buffer);

        let ptr = heap.allocate(16).unwrap();
        unsafe {
            heap.deallocate(ptr).unwrap();
            assert_eq!(heap.deallocate(ptr), Err(HeapError::DoubleFree));
        }
    }

    #[test]
    fn test_foreign_pointer_is_rejected() {
        let mut buffer = [0u8; 1024];
        let mut heap = allocator(&mut buffer);
        let _ = heap.allocate(16).unwrap();

        let mut outside = 0u8;
        let foreign = NonNull::from(&mut outside);
        assert_eq!(
            unsafe { heap.deallocate(foreign) },
            Err(HeapError::InvalidPointer)
        );
    }

    #[test]
    fn test_out_of_memory_leaves_chain_intact() {
        let mut buffer = [0u8; 96];
        let mut heap = allocator(&mut buffer);

        let _ = heap.allocate(16).unwrap();
        let before = chain(&heap);

        assert_eq!(heap.allocate(4096), Err(HeapError::OutOfMemory));
        assert_eq!(chain(&heap), before);
    }

    #[test]
    fn test_empty_heap_stays_empty_on_grow_failure() {
        let mut buffer = [0u8; 8];
        let mut heap = allocator(&mut buffer);

        assert_eq!(heap.allocate(64), Err(HeapError::OutOfMemory));
        assert_eq!(heap.blocks().count(), 0);
        assert_eq!(heap.region_len(), 0);
    }

    #[test]
    fn test_chain_is_offset_ordered() {
        let mut buffer = [0u8; 4096];
        let mut heap = allocator(&mut buffer);

        let a = heap.allocate(48).unwrap();
        let _b = heap.allocate(200).unwrap();
        let c = heap.allocate(32).unwrap();
        unsafe {
            heap.deallocate(a).unwrap();
            heap.deallocate(c).unwrap();
        }
        let _d = heap.allocate(24).unwrap();
        let _e = heap.allocate(300).unwrap();

        let blocks = chain(&heap);
        for pair in blocks.windows(2) {
            assert!(pair[0].offset < pair[1].offset);
        }
    }

    #[test]
    fn test_header_size_overflow_is_rejected() {
        let mut buffer = [0u8; 64];
        let mut heap = allocator(&mut buffer);

        assert_eq!(heap.allocate(usize::MAX), Err(HeapError::SizeOverflow));
    }
}
