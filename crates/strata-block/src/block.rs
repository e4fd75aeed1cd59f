//! Fixed-capacity bump blocks.
//!
//! A [`Block`] is one contiguous buffer with a cursor that only moves
//! forward on allocation and only moves back when the most recent live
//! allocation is released or resized. Blocks never allocate on their own
//! behalf; every operation reports failure as `None`/`false` and leaves the
//! block unchanged, so all recovery happens in the
//! [`BlockAllocator`](crate::BlockAllocator).

use std::ptr::NonNull;

use crate::handle::{BlockId, BlockOrigin, ByteRange};
use crate::raw::RawBuffer;

/// A single contiguous buffer with bump allocation.
///
/// Invariant: `0 <= cursor <= capacity`. Only the range ending at the
/// cursor (the tail) can be released or resized.
pub struct Block {
    id: BlockId,
    buffer: RawBuffer,
    /// Offset of the next free byte.
    cursor: usize,
    /// Allocator-defined word, zeroed whenever the block empties.
    metadata: usize,
    origin: BlockOrigin,
}

impl Block {
    pub(crate) fn new(buffer: RawBuffer, origin: BlockOrigin) -> Self {
        Self {
            id: BlockId::next(),
            buffer,
            cursor: 0,
            metadata: 0,
            origin,
        }
    }

    /// Stable identity of this block.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Whether this is the allocator's head block or a heap block.
    pub fn origin(&self) -> BlockOrigin {
        self.origin
    }

    /// Bytes available for user data, fixed at construction.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Offset of the next free byte.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Bytes consumed so far, including padding and alignment slack.
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Bytes past the cursor, ignoring alignment.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.cursor
    }

    /// Whether no bytes are in use.
    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Offset the payload of an allocation made now would start at.
    ///
    /// Alignment is computed on the absolute address, so it holds for any
    /// power-of-two `align` regardless of how the block's base is aligned.
    /// Returns `None` if `align` is not a power of two or the address
    /// overflows; the result may lie past the end of the block.
    pub fn first_aligned_offset(&self, align: usize, padding: usize) -> Option<usize> {
        if !align.is_power_of_two() {
            return None;
        }
        let base = self.buffer.addr();
        let unaligned = base.checked_add(self.cursor)?.checked_add(padding)?;
        let aligned = unaligned.checked_add(align - 1)? & !(align - 1);
        Some(aligned - base)
    }

    /// Bytes an allocation with alignment `align` could still use.
    pub fn avail(&self, align: usize) -> usize {
        self.first_aligned_offset(align, 0)
            .map_or(0, |offset| self.capacity().saturating_sub(offset))
    }

    /// Whether `allocate(align, padding, size)` would succeed right now.
    pub fn can_fit(&self, align: usize, padding: usize, size: usize) -> bool {
        self.first_aligned_offset(align, padding)
            .and_then(|offset| offset.checked_add(size))
            .is_some_and(|end| end <= self.capacity())
    }

    /// Bump-allocate `size` bytes aligned to `align`, with `padding` bytes
    /// reserved immediately before the payload.
    ///
    /// Returns `None` if the aligned payload would run past the block's
    /// capacity. On success the cursor advances to the range's `end`.
    pub fn allocate(&mut self, align: usize, padding: usize, size: usize) -> Option<ByteRange> {
        let aligned_offset = self.first_aligned_offset(align, padding)?;
        let end = aligned_offset.checked_add(size)?;
        if end > self.capacity() {
            return None;
        }
        let range = ByteRange {
            block: self.id,
            start: self.cursor,
            aligned_offset,
            end,
            ptr: self.buffer.ptr_at(aligned_offset),
        };
        self.cursor = end;
        Some(range)
    }

    /// Grow or shrink the tail allocation `[start, end)` by `delta` bytes.
    ///
    /// Succeeds only if `end` is the cursor and `end + delta` stays within
    /// `[start, capacity]`. Shrinking to an empty payload is allowed.
    pub fn resize(&mut self, start: usize, end: usize, delta: isize) -> bool {
        if end != self.cursor {
            return false;
        }
        match end.checked_add_signed(delta) {
            Some(next) if next >= start && next <= self.capacity() => {
                self.set_cursor(next);
                true
            }
            _ => false,
        }
    }

    /// Release the tail allocation `[start, end)`.
    ///
    /// Fails unless `end` is the cursor. A range that is not the tail
    /// becomes releasable once every later range in this block has itself
    /// been released.
    pub fn release(&mut self, start: usize, end: usize) -> bool {
        if end != self.cursor || start > end {
            return false;
        }
        self.set_cursor(start);
        true
    }

    /// Pointer to the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` exceeds the block's capacity.
    pub fn ptr(&self, offset: usize) -> NonNull<u8> {
        self.buffer.ptr_at(offset)
    }

    /// Whether `ptr` points into this block's storage.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let base = self.buffer.addr();
        addr >= base && addr - base < self.capacity()
    }

    /// Whether `ptr` is one past this block's last byte.
    ///
    /// Zero-size allocations made when the block is full land here, and a
    /// zero-capacity block has no other address.
    pub fn ends_at(&self, ptr: *const u8) -> bool {
        ptr as usize == self.buffer.addr() + self.capacity()
    }

    /// Address of the block's first byte.
    pub(crate) fn base_addr(&self) -> usize {
        self.buffer.addr()
    }

    /// The allocator-defined metadata word.
    pub fn metadata(&self) -> usize {
        self.metadata
    }

    /// Set the allocator-defined metadata word.
    pub fn set_metadata(&mut self, value: usize) {
        self.metadata = value;
    }

    /// Rewind to empty, clear metadata and take a fresh id, so ranges
    /// carved before the rewind no longer name this block.
    pub(crate) fn reset(&mut self) {
        self.id = BlockId::next();
        self.cursor = 0;
        self.metadata = 0;
    }

    fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
        if cursor == 0 {
            self.metadata = 0;
        }
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("owned", &self.buffer.is_owned())
            .field("capacity", &self.capacity())
            .field("cursor", &self.cursor)
            .field("metadata", &self.metadata)
            .finish()
    }
}
