//! Growable sequence of bump blocks.
//!
//! [`BlockAllocator`] owns a head [`Block`] plus any number of heap blocks,
//! kept in an index-ordered map from [`BlockId`] to block (head first, heap
//! blocks in arrival order). New allocations land in the last block; when
//! it is full the allocator promotes its retained scratch block or asks the
//! growth policy for a new one.
//!
//! ```text
//! blocks:  [ head ][ heap 1 ][ heap 2 ] ... [ current ]
//! scratch:                                             [ empty, retained ]
//! ```
//!
//! Lifecycle: `Empty` (head only) → `Growing` (one or more heap blocks) →
//! `Empty` via [`reset`](BlockAllocator::reset), or via
//! [`release_block`](BlockAllocator::release_block) of the last heap block.

use std::fmt;
use std::iter::Rev;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ops::BitOr;

use indexmap::map::{Values, ValuesMut};
use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::block::Block;
use crate::config::BlockAllocatorConfig;
use crate::error::BlockError;
use crate::growth::{BlockSizing, GrowthPolicy};
use crate::handle::{BlockId, BlockOrigin, ByteRange};
use crate::raw::{RawBuffer, MAX_ALIGN};

/// Options for [`BlockAllocator::reserve`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ReserveFlags {
    bits: u8,
}

impl ReserveFlags {
    /// No flags: reuse current-block space and size by the growth policy.
    pub const NONE: Self = Self { bits: 0 };
    /// Stage a scratch block even if the current block has room.
    pub const IGNORE_EXISTING_BYTES: Self = Self { bits: 1 << 0 };
    /// Size the scratch block to exactly the request.
    pub const IGNORE_GROWTH_POLICY: Self = Self { bits: 1 << 1 };

    /// Whether every flag in `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }
}

impl BitOr for ReserveFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            bits: self.bits | rhs.bits,
        }
    }
}

/// A growable, single-threaded bump allocator over a sequence of blocks.
///
/// Pointers handed out stay valid until their block is released, the
/// allocator is reset, or it is dropped. Blocks never move in memory, so
/// [`steal_heap_blocks`](Self::steal_heap_blocks) preserves every pointer
/// into the stolen blocks.
///
/// The `'buf` lifetime is the borrow of caller-provided head storage
/// ([`with_buffer`](Self::with_buffer)); heap-headed allocators are
/// `BlockAllocator<'static>`.
pub struct BlockAllocator<'buf> {
    /// Head first, then heap blocks in arrival order. Never empty.
    blocks: IndexMap<BlockId, Block>,
    /// At most one retained, empty heap block.
    scratch: Option<Block>,
    sizing: BlockSizing,
    /// Heap blocks appended by growth since the last reset.
    growth_counter: usize,
    /// Allocator-owned word, independent of any block's metadata.
    metadata: usize,
    /// Bytes of head storage, including alignment slack.
    prealloc_size: usize,
    _storage: PhantomData<&'buf mut [MaybeUninit<u8>]>,
}

impl BlockAllocator<'static> {
    /// Create an allocator whose head block holds `head_capacity` bytes.
    ///
    /// Heap blocks grow from a unit of `head_capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics on an invalid configuration; aborts if the head block cannot
    /// be allocated.
    pub fn new(policy: GrowthPolicy, head_capacity: usize) -> Self {
        Self::from_config(BlockAllocatorConfig::new(policy, head_capacity))
    }

    /// Create an allocator that grows by `block_increment` bytes but whose
    /// head block holds exactly `head_usable_bytes`.
    pub fn with_head_usable_bytes(
        policy: GrowthPolicy,
        block_increment: usize,
        head_usable_bytes: usize,
    ) -> Self {
        Self::from_config(
            BlockAllocatorConfig::new(policy, head_usable_bytes).with_block_increment(block_increment),
        )
    }

    /// Create an allocator from a full configuration.
    ///
    /// # Panics
    ///
    /// Panics on an invalid configuration; aborts if the head block cannot
    /// be allocated.
    pub fn from_config(config: BlockAllocatorConfig) -> Self {
        Self::try_from_config(config).unwrap_or_else(|err| err.escalate())
    }

    /// Fallible form of [`from_config`](Self::from_config).
    pub fn try_from_config(config: BlockAllocatorConfig) -> Result<Self, BlockError> {
        config.validate()?;
        let head = RawBuffer::try_alloc(config.head_capacity)?;
        let prealloc_size = head.len();
        Ok(Self::with_head(config.sizing(), head, prealloc_size))
    }
}

impl<'buf> BlockAllocator<'buf> {
    /// Create an allocator whose head block is the caller's `buf`.
    ///
    /// Nothing touches the heap until `buf` is exhausted. Heap blocks grow
    /// from a unit of `buf.len()` bytes.
    pub fn with_buffer(policy: GrowthPolicy, buf: &'buf mut [MaybeUninit<u8>]) -> Self {
        Self::with_buffer_config(BlockAllocatorConfig::new(policy, buf.len()), buf)
    }

    /// Like [`with_buffer`](Self::with_buffer) with a full configuration.
    /// `config.head_capacity` is replaced by `buf.len()`.
    ///
    /// # Panics
    ///
    /// Panics on an invalid configuration.
    pub fn with_buffer_config(
        mut config: BlockAllocatorConfig,
        buf: &'buf mut [MaybeUninit<u8>],
    ) -> Self {
        config.head_capacity = buf.len();
        if let Err(err) = config.validate() {
            err.escalate();
        }
        let prealloc_size = buf.len();
        Self::with_head(config.sizing(), RawBuffer::borrowed(buf), prealloc_size)
    }

    fn with_head(sizing: BlockSizing, storage: RawBuffer, prealloc_size: usize) -> Self {
        let head = Block::new(storage, BlockOrigin::Head);
        let mut blocks = IndexMap::new();
        blocks.insert(head.id(), head);
        Self {
            blocks,
            scratch: None,
            sizing,
            growth_counter: 0,
            metadata: 0,
            prealloc_size,
            _storage: PhantomData,
        }
    }

    /// Allocate `size` bytes aligned to `align`, with `padding` bytes
    /// reserved immediately before the payload for caller metadata.
    ///
    /// Tries the current block, then the scratch block, then a new heap
    /// block sized by the growth policy.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two or the request overflows;
    /// aborts if the raw heap is exhausted.
    pub fn allocate(&mut self, align: usize, padding: usize, size: usize) -> ByteRange {
        self.try_allocate(align, padding, size)
            .unwrap_or_else(|err| err.escalate())
    }

    /// Fallible form of [`allocate`](Self::allocate).
    ///
    /// Invalid requests are rejected before any block is touched.
    pub fn try_allocate(
        &mut self,
        align: usize,
        padding: usize,
        size: usize,
    ) -> Result<ByteRange, BlockError> {
        let required = required_bytes(align, padding, size)?;
        if let Some(range) = self.current_block_mut().allocate(align, padding, size) {
            return Ok(range);
        }

        let scratch_fits = self
            .scratch
            .as_ref()
            .is_some_and(|scratch| scratch.can_fit(align, padding, size));
        if scratch_fits {
            self.promote_scratch();
        } else {
            self.add_block(required)?;
        }

        let range = self
            .current_block_mut()
            .allocate(align, padding, size)
            .expect("a block sized for the request always fits it");
        Ok(range)
    }

    /// Release the tail allocation `range` in its block.
    ///
    /// Returns `false` (changing nothing) if `range` is not the most recent
    /// live allocation of its block, or its block is no longer owned here.
    /// A range from before a [`reset`](Self::reset) or
    /// [`release_block`](Self::release_block) of its block is never owned.
    pub fn release(&mut self, range: &ByteRange) -> bool {
        self.blocks
            .get_mut(&range.block)
            .is_some_and(|block| block.release(range.start, range.end))
    }

    /// Grow or shrink the payload of the tail allocation `range` by `delta`
    /// bytes, updating `range.end()` on success.
    pub fn resize(&mut self, range: &mut ByteRange, delta: isize) -> bool {
        let Some(block) = self.blocks.get_mut(&range.block) else {
            return false;
        };
        if !block.resize(range.aligned_offset, range.end, delta) {
            return false;
        }
        range.end = block.cursor();
        true
    }

    /// Ensure `size` bytes are available without a growth-time heap call.
    ///
    /// A no-op when the current block already has room (unless
    /// [`ReserveFlags::IGNORE_EXISTING_BYTES`]) or the scratch block is big
    /// enough. Otherwise stages a new scratch block, sized by the growth
    /// policy or, with [`ReserveFlags::IGNORE_GROWTH_POLICY`], to `size`.
    ///
    /// # Panics
    ///
    /// Panics if `size` overflows; aborts if the raw heap is exhausted.
    pub fn reserve(&mut self, size: usize, flags: ReserveFlags) {
        if let Err(err) = self.try_reserve(size, flags) {
            err.escalate();
        }
    }

    /// Fallible form of [`reserve`](Self::reserve).
    pub fn try_reserve(&mut self, size: usize, flags: ReserveFlags) -> Result<(), BlockError> {
        if !flags.contains(ReserveFlags::IGNORE_EXISTING_BYTES)
            && self.current_block().avail(MAX_ALIGN) >= size
        {
            return Ok(());
        }
        if self.scratch_block_size() >= size {
            return Ok(());
        }

        let target = if flags.contains(ReserveFlags::IGNORE_GROWTH_POLICY) {
            size
        } else {
            self.sizing.next_size(self.growth_counter + 1).max(size)
        };
        let block = new_heap_block(target)?;
        debug!(
            capacity = block.capacity(),
            requested = size,
            replaced = self.scratch_block_size(),
            "reserved scratch block"
        );
        self.scratch = Some(block);
        Ok(())
    }

    /// Release a whole block.
    ///
    /// The head block is rewound in place (cursor and metadata cleared) and
    /// any scratch block is left alone. Either way the block takes a fresh
    /// [`BlockId`]. A heap block is removed from the
    /// sequence and becomes the new scratch block if it is larger than the
    /// current one (which is then freed); otherwise it is freed.
    ///
    /// The allocator's own [`metadata`](Self::metadata) is unaffected.
    pub fn release_block(&mut self, id: BlockId) {
        if id == self.head_block().id() {
            self.reset_head();
            trace!("rewound head block");
            return;
        }
        let Some(mut block) = self.blocks.shift_remove(&id) else {
            debug_assert!(false, "{id} is not owned by this allocator");
            return;
        };
        block.reset();
        if block.capacity() > self.scratch_block_size() {
            debug!(
                capacity = block.capacity(),
                replaced = self.scratch_block_size(),
                "retained released block as scratch"
            );
            self.scratch = Some(block);
        } else {
            trace!(capacity = block.capacity(), "freed released block");
        }
    }

    /// Return to the just-constructed state.
    ///
    /// Frees every heap block and the scratch block, rewinds the head, and
    /// clears the growth counter and allocator metadata. The head storage
    /// itself is kept.
    pub fn reset(&mut self) {
        let freed = self.blocks.len() - 1;
        self.blocks.truncate(1);
        self.reset_head();
        self.scratch = None;
        self.growth_counter = 0;
        self.metadata = 0;
        debug!(freed, "reset block allocator");
    }

    /// Free the scratch block, if any.
    pub fn reset_scratch_space(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            trace!(capacity = scratch.capacity(), "freed scratch block");
        }
    }

    /// Move all of `other`'s heap blocks, in order, to the end of this
    /// allocator's sequence. `other` keeps its head and scratch blocks.
    ///
    /// The last stolen block becomes this allocator's current block. No
    /// pointer into a stolen block is invalidated.
    pub fn steal_heap_blocks(&mut self, other: &mut BlockAllocator<'_>) {
        if other.blocks.len() <= 1 {
            return;
        }
        let count = other.blocks.len() - 1;
        self.blocks.extend(other.blocks.drain(1..));
        debug!(count, total = self.total_size(), "stole heap blocks");
    }

    /// Recover the block owning `ptr`, given `ptr`'s offset within it.
    ///
    /// Pass [`ByteRange::aligned_offset`] for a payload pointer, or
    /// `aligned_offset - padding` for a pointer to padding metadata.
    /// Returns `None` if no block owned by this allocator starts at
    /// `ptr - offset`.
    pub fn owning_block(&self, ptr: *const u8, offset: usize) -> Option<&Block> {
        let base = (ptr as usize).checked_sub(offset)?;
        let block = self.rblocks().find(|block| block.base_addr() == base)?;
        debug_assert!(
            offset <= block.capacity(),
            "offset {offset} lies outside {}",
            block.id()
        );
        Some(block)
    }

    /// Recover the block owning `ptr` by scanning, newest block first.
    ///
    /// A pointer inside a block's storage resolves to that block. Failing
    /// that, a pointer one past a block's end resolves to it, which is
    /// where zero-size allocations in a full (or zero-capacity) block land.
    pub fn find_owning_block(&self, ptr: *const u8) -> Option<&Block> {
        self.rblocks()
            .find(|block| block.contains(ptr))
            .or_else(|| self.rblocks().find(|block| block.ends_at(ptr)))
    }

    /// Look up a block by id.
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    /// Look up a block by id, mutably.
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(&id)
    }

    /// The block new allocations land in.
    pub fn current_block(&self) -> &Block {
        let last = self.blocks.len() - 1;
        &self.blocks[last]
    }

    /// The block new allocations land in, mutably.
    pub fn current_block_mut(&mut self) -> &mut Block {
        let last = self.blocks.len() - 1;
        &mut self.blocks[last]
    }

    /// The head block.
    pub fn head_block(&self) -> &Block {
        &self.blocks[0]
    }

    /// The head block, mutably.
    pub fn head_block_mut(&mut self) -> &mut Block {
        &mut self.blocks[0]
    }

    /// Blocks from head to current.
    pub fn blocks(&self) -> Values<'_, BlockId, Block> {
        self.blocks.values()
    }

    /// Blocks from current back to head.
    pub fn rblocks(&self) -> Rev<Values<'_, BlockId, Block>> {
        self.blocks.values().rev()
    }

    /// Blocks from head to current, mutably.
    pub fn blocks_mut(&mut self) -> ValuesMut<'_, BlockId, Block> {
        self.blocks.values_mut()
    }

    /// Number of blocks in the sequence, head included, scratch excluded.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Capacity of every block owned, scratch included.
    pub fn total_size(&self) -> usize {
        self.blocks().map(Block::capacity).sum::<usize>() + self.scratch_block_size()
    }

    /// Bytes of head storage.
    pub fn prealloc_size(&self) -> usize {
        self.prealloc_size
    }

    /// Usable bytes of the head block.
    pub fn prealloc_usable_space(&self) -> usize {
        self.head_block().capacity()
    }

    /// Capacity of the retained scratch block, or 0.
    pub fn scratch_block_size(&self) -> usize {
        self.scratch.as_ref().map_or(0, Block::capacity)
    }

    /// Heap blocks appended by growth since the last reset.
    pub fn growth_counter(&self) -> usize {
        self.growth_counter
    }

    /// The sizing function heap blocks are drawn from.
    pub fn sizing(&self) -> BlockSizing {
        self.sizing
    }

    /// The allocator-owned metadata word.
    pub fn metadata(&self) -> usize {
        self.metadata
    }

    /// Set the allocator-owned metadata word.
    pub fn set_metadata(&mut self, value: usize) {
        self.metadata = value;
    }

    /// Rewind the head block and re-key it, in place, under its new id.
    fn reset_head(&mut self) {
        if let Some((_, mut head)) = self.blocks.shift_remove_index(0) {
            head.reset();
            self.blocks.shift_insert(0, head.id(), head);
        }
    }

    fn promote_scratch(&mut self) {
        if let Some(block) = self.scratch.take() {
            self.growth_counter += 1;
            debug!(
                capacity = block.capacity(),
                growth = self.growth_counter,
                "promoted scratch block"
            );
            self.blocks.insert(block.id(), block);
        }
    }

    fn add_block(&mut self, required: usize) -> Result<(), BlockError> {
        let k = self.growth_counter + 1;
        let block = new_heap_block(self.sizing.next_size(k).max(required))?;
        debug!(
            capacity = block.capacity(),
            growth = k,
            policy = %self.sizing.policy(),
            "added heap block"
        );
        self.growth_counter = k;
        self.blocks.insert(block.id(), block);
        Ok(())
    }
}

impl fmt::Debug for BlockAllocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("policy", &self.sizing.policy())
            .field("blocks", &self.blocks.len())
            .field("total_size", &self.total_size())
            .field("scratch", &self.scratch_block_size())
            .field("growth_counter", &self.growth_counter)
            .finish()
    }
}

/// Allocate an empty heap block of at least `bytes` (and at least
/// [`MAX_ALIGN`]) bytes, rounded up to [`MAX_ALIGN`].
fn new_heap_block(bytes: usize) -> Result<Block, BlockError> {
    let capacity = bytes
        .max(MAX_ALIGN)
        .checked_next_multiple_of(MAX_ALIGN)
        .ok_or(BlockError::Overflow {
            size: bytes,
            padding: 0,
            align: MAX_ALIGN,
        })?;
    Ok(Block::new(RawBuffer::try_alloc(capacity)?, BlockOrigin::Heap))
}

/// Worst-case bytes an empty heap block needs to satisfy a request.
///
/// Heap blocks start on a [`MAX_ALIGN`] boundary, so small alignments only
/// round the padding up; larger ones may need up to `align - MAX_ALIGN`
/// extra bytes of slack past the rounded padding.
fn required_bytes(align: usize, padding: usize, size: usize) -> Result<usize, BlockError> {
    if !align.is_power_of_two() {
        return Err(BlockError::InvalidAlignment { align });
    }
    let overflow = BlockError::Overflow {
        size,
        padding,
        align,
    };
    let lead = if align <= MAX_ALIGN {
        padding.checked_next_multiple_of(align)
    } else {
        padding
            .checked_next_multiple_of(MAX_ALIGN)
            .and_then(|lead| lead.checked_add(align - MAX_ALIGN))
    };
    lead.and_then(|lead| lead.checked_add(size))
        .filter(|&total| total <= isize::MAX as usize)
        .ok_or(overflow)
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;

    const UNIT: usize = 128;

    fn allocator(policy: GrowthPolicy) -> BlockAllocator<'static> {
        BlockAllocator::new(policy, UNIT)
    }

    fn capacities(alloc: &BlockAllocator<'_>) -> Vec<usize> {
        alloc.blocks().map(Block::capacity).collect()
    }

    #[test]
    fn first_allocation_lands_in_head() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        let r = alloc.allocate(8, 0, 16);
        assert_eq!(r.block(), alloc.head_block().id());
        assert_eq!(alloc.block_count(), 1);
        assert_eq!(alloc.total_size(), UNIT);
        assert_eq!(alloc.prealloc_size(), alloc.total_size());
    }

    #[test]
    fn block_sizes_follow_policy() {
        let expected = [
            (GrowthPolicy::Fixed, [1, 1, 1, 1, 1]),
            (GrowthPolicy::Linear, [1, 2, 3, 4, 5]),
            (GrowthPolicy::Fibonacci, [1, 1, 2, 3, 5]),
            (GrowthPolicy::Exponential, [1, 2, 4, 8, 16]),
        ];
        for (policy, units) in expected {
            let mut alloc = allocator(policy);
            for _ in 0..5 {
                // Each allocation fills a whole unit, forcing a new block.
                let _ = alloc.allocate(MAX_ALIGN, 0, UNIT);
                while alloc.current_block().avail(MAX_ALIGN) >= UNIT {
                    let _ = alloc.allocate(MAX_ALIGN, 0, UNIT);
                }
            }
            let want: Vec<usize> = units.iter().map(|u| u * UNIT).collect();
            assert_eq!(capacities(&alloc), want, "{policy}");
            assert_eq!(alloc.growth_counter(), 4, "{policy}");
        }
    }

    #[test]
    fn oversized_request_gets_its_own_block() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        let r = alloc.allocate(8, 0, 1000);
        assert_eq!(r.len(), 1000);
        assert_eq!(alloc.current_block().capacity(), 1008);
        assert_eq!(alloc.block_count(), 2);
    }

    #[test]
    fn large_alignment_in_fresh_block() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        let _ = alloc.allocate(1, 0, UNIT);
        let r = alloc.allocate(256, 8, 64);
        assert_eq!(r.ptr().as_ptr() as usize % 256, 0);
        assert!(r.aligned_offset() - r.start() >= 8);
    }

    #[test]
    fn invalid_requests_leave_state_untouched() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        let _ = alloc.allocate(8, 0, 8);
        let before = alloc.current_block().cursor();

        assert_eq!(
            alloc.try_allocate(3, 0, 8),
            Err(BlockError::InvalidAlignment { align: 3 })
        );
        assert!(matches!(
            alloc.try_allocate(8, usize::MAX, 8),
            Err(BlockError::Overflow { .. })
        ));
        assert!(matches!(
            alloc.try_allocate(8, 0, usize::MAX - 4),
            Err(BlockError::Overflow { .. })
        ));
        assert_eq!(alloc.current_block().cursor(), before);
        assert_eq!(alloc.block_count(), 1);
    }

    #[test]
    #[should_panic(expected = "not a power of two")]
    fn allocate_panics_on_bad_alignment() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        let _ = alloc.allocate(12, 0, 8);
    }

    #[test]
    fn lifo_release_through_allocator() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        let a = alloc.allocate(MAX_ALIGN, 0, 16);
        let b = alloc.allocate(MAX_ALIGN, 0, 16);
        let c = alloc.allocate(MAX_ALIGN, 0, 16);

        assert!(!alloc.release(&b));
        assert!(alloc.release(&c));
        assert!(alloc.release(&b));
        let again = alloc.allocate(MAX_ALIGN, 0, 16);
        assert_eq!(again.ptr(), b.ptr());
        assert!(alloc.release(&again));
        assert!(alloc.release(&a));
        assert!(alloc.head_block().is_empty());
    }

    #[test]
    fn resize_updates_range_end() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        let mut r = alloc.allocate(8, 0, 16);
        assert!(alloc.resize(&mut r, 32));
        assert_eq!(r.len(), 48);
        assert!(!alloc.resize(&mut r, UNIT as isize));
        assert_eq!(r.len(), 48);
        assert!(alloc.resize(&mut r, -48));
        assert!(r.is_empty());
    }

    #[test]
    fn released_heap_block_becomes_scratch_and_is_reused() {
        let mut alloc = allocator(GrowthPolicy::Exponential);
        let _ = alloc.allocate(MAX_ALIGN, 0, UNIT);
        let r = alloc.allocate(MAX_ALIGN, 0, 64);
        let heap_id = r.block();
        assert_ne!(heap_id, alloc.head_block().id());
        let total = alloc.total_size();

        alloc.release_block(heap_id);
        assert_eq!(alloc.block_count(), 1);
        assert_eq!(alloc.scratch_block_size(), 2 * UNIT);
        assert_eq!(alloc.total_size(), total);

        // The head is still full, so the next allocation promotes scratch:
        // same memory, new identity.
        let again = alloc.allocate(MAX_ALIGN, 0, 64);
        assert_ne!(again.block(), heap_id);
        assert_eq!(again.ptr(), r.ptr());
        assert!(!alloc.release(&r));
        assert_eq!(alloc.current_block().cursor(), again.end());
        assert_eq!(alloc.scratch_block_size(), 0);
        assert_eq!(alloc.total_size(), total);
    }

    #[test]
    fn scratch_too_small_is_kept_and_new_block_added() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        let _ = alloc.allocate(MAX_ALIGN, 0, UNIT);
        let r = alloc.allocate(MAX_ALIGN, 0, 16);
        alloc.release_block(r.block());
        assert_eq!(alloc.scratch_block_size(), UNIT);

        let big = alloc.allocate(MAX_ALIGN, 0, 4 * UNIT);
        assert_ne!(big.block(), r.block());
        assert_eq!(alloc.scratch_block_size(), UNIT);
    }

    #[test]
    fn smaller_released_block_is_freed() {
        let mut alloc = allocator(GrowthPolicy::Linear);
        let _ = alloc.allocate(MAX_ALIGN, 0, UNIT);
        let small = alloc.allocate(MAX_ALIGN, 0, 2 * UNIT);
        let large = alloc.allocate(MAX_ALIGN, 0, 3 * UNIT);
        assert_ne!(small.block(), large.block());

        alloc.release_block(large.block());
        assert_eq!(alloc.scratch_block_size(), 3 * UNIT);
        alloc.release_block(small.block());
        assert_eq!(alloc.scratch_block_size(), 3 * UNIT);
        assert_eq!(alloc.block_count(), 1);
    }

    #[test]
    fn releasing_middle_block_preserves_order() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        let ids: Vec<BlockId> = (0..4).map(|_| alloc.allocate(MAX_ALIGN, 0, UNIT).block()).collect();
        alloc.release_block(ids[2]);
        let remaining: Vec<BlockId> = alloc.blocks().map(Block::id).collect();
        assert_eq!(remaining, vec![ids[0], ids[1], ids[3]]);
        let reversed: Vec<BlockId> = alloc.rblocks().map(Block::id).collect();
        assert_eq!(reversed, vec![ids[3], ids[1], ids[0]]);
    }

    #[test]
    fn releasing_head_keeps_scratch_and_metadata() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        alloc.set_metadata(99);
        let _ = alloc.allocate(MAX_ALIGN, 0, UNIT);
        let r = alloc.allocate(MAX_ALIGN, 0, 16);
        alloc.release_block(r.block());
        alloc.head_block_mut().set_metadata(5);

        let head = alloc.head_block().id();
        alloc.release_block(head);
        assert!(alloc.head_block().is_empty());
        assert_eq!(alloc.head_block().metadata(), 0);
        assert_eq!(alloc.scratch_block_size(), UNIT);
        assert_eq!(alloc.metadata(), 99);
    }

    #[test]
    fn reset_is_idempotent_and_restores_first_address() {
        let mut alloc = allocator(GrowthPolicy::Fibonacci);
        let first = alloc.allocate(8, 0, 8).ptr();
        for _ in 0..10 {
            let _ = alloc.allocate(8, 0, 100);
        }
        alloc.set_metadata(3);
        alloc.reserve(4096, ReserveFlags::IGNORE_EXISTING_BYTES);

        alloc.reset();
        alloc.reset();
        assert_eq!(alloc.block_count(), 1);
        assert_eq!(alloc.prealloc_size(), alloc.total_size());
        assert_eq!(alloc.metadata(), 0);
        assert_eq!(alloc.growth_counter(), 0);
        assert_eq!(alloc.scratch_block_size(), 0);
        assert_eq!(alloc.allocate(8, 0, 8).ptr(), first);
    }

    #[test]
    fn reserve_is_noop_when_current_block_has_room() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        alloc.reserve(64, ReserveFlags::NONE);
        assert_eq!(alloc.scratch_block_size(), 0);
    }

    #[test]
    fn reserve_stages_policy_sized_scratch() {
        let mut alloc = allocator(GrowthPolicy::Linear);
        alloc.reserve(200, ReserveFlags::NONE);
        // next_size(1) = 2 units, which already covers 200 bytes.
        assert_eq!(alloc.scratch_block_size(), 2 * UNIT);
        assert_eq!(alloc.block_count(), 1);
        assert_eq!(alloc.growth_counter(), 0);

        let _ = alloc.allocate(MAX_ALIGN, 0, UNIT);
        let r = alloc.allocate(MAX_ALIGN, 0, 200);
        assert_eq!(alloc.block(r.block()).unwrap().capacity(), 2 * UNIT);
        assert_eq!(alloc.scratch_block_size(), 0);
        assert_eq!(alloc.growth_counter(), 1);
    }

    #[test]
    fn reserve_flags_force_exact_scratch() {
        let mut alloc = allocator(GrowthPolicy::Exponential);
        let flags = ReserveFlags::IGNORE_EXISTING_BYTES | ReserveFlags::IGNORE_GROWTH_POLICY;
        assert!(flags.contains(ReserveFlags::IGNORE_GROWTH_POLICY));
        alloc.reserve(1000, flags);
        assert_eq!(alloc.scratch_block_size(), 1008);

        // An existing scratch block that is big enough is reused.
        alloc.reserve(500, flags);
        assert_eq!(alloc.scratch_block_size(), 1008);

        // A larger request replaces it.
        alloc.reserve(2000, flags);
        assert_eq!(alloc.scratch_block_size(), 2000);
        alloc.reset_scratch_space();
        assert_eq!(alloc.scratch_block_size(), 0);
    }

    #[test]
    fn steal_moves_heap_blocks_and_keeps_pointers() {
        let mut a = allocator(GrowthPolicy::Fixed);
        let mut b = allocator(GrowthPolicy::Fixed);
        let _ = a.allocate(MAX_ALIGN, 0, UNIT);
        let _ = a.allocate(MAX_ALIGN, 0, 16);

        let _ = b.allocate(MAX_ALIGN, 0, UNIT);
        let stolen = b.allocate(8, 0, 8);
        unsafe { stolen.ptr().cast::<u64>().as_ptr().write(0xfeed) };
        let _ = b.allocate(MAX_ALIGN, 0, UNIT);
        let b_heap: usize = b.blocks().skip(1).map(Block::capacity).sum();
        let a_total = a.total_size();

        a.steal_heap_blocks(&mut b);
        assert_eq!(b.block_count(), 1);
        assert_eq!(b.prealloc_size(), b.total_size());
        assert_eq!(a.total_size(), a_total + b_heap);
        assert_eq!(a.block_count(), 4);

        let owner = a
            .owning_block(stolen.ptr().as_ptr(), stolen.aligned_offset())
            .unwrap();
        assert_eq!(owner.id(), stolen.block());
        assert_eq!(
            a.find_owning_block(stolen.ptr().as_ptr()).map(Block::id),
            Some(stolen.block())
        );
        assert!(b.owning_block(stolen.ptr().as_ptr(), stolen.aligned_offset()).is_none());
        assert_eq!(unsafe { stolen.ptr().cast::<u64>().as_ptr().read() }, 0xfeed);
    }

    #[test]
    fn steal_from_head_only_allocator_is_noop() {
        let mut a = allocator(GrowthPolicy::Fixed);
        let mut b = allocator(GrowthPolicy::Fixed);
        let _ = b.allocate(8, 0, 8);
        a.steal_heap_blocks(&mut b);
        assert_eq!(a.block_count(), 1);
        assert_eq!(b.block_count(), 1);
        assert_eq!(b.head_block().used(), 8);
    }

    #[test]
    fn owning_block_lookups_agree() {
        let mut alloc = allocator(GrowthPolicy::Linear);
        let padding = 8;
        for size in [8, 100, 300, 17, 1024] {
            let r = alloc.allocate(16, padding, size);
            let by_offset = alloc.owning_block(r.ptr().as_ptr(), r.aligned_offset()).map(Block::id);
            let meta = r.ptr().as_ptr().wrapping_sub(padding);
            let by_meta = alloc
                .owning_block(meta, r.aligned_offset() - padding)
                .map(Block::id);
            let by_scan = alloc.find_owning_block(r.ptr().as_ptr()).map(Block::id);
            assert_eq!(by_offset, Some(r.block()));
            assert_eq!(by_meta, Some(r.block()));
            assert_eq!(by_scan, Some(r.block()));
        }
    }

    #[test]
    fn zero_size_allocation_at_block_end_resolves_both_ways() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        let _ = alloc.allocate(MAX_ALIGN, 0, UNIT);
        let z = alloc.allocate(1, 0, 0);
        assert_eq!(z.block(), alloc.head_block().id());
        assert_eq!(z.aligned_offset(), UNIT);

        let by_offset = alloc.owning_block(z.ptr().as_ptr(), z.aligned_offset()).map(Block::id);
        let by_scan = alloc.find_owning_block(z.ptr().as_ptr()).map(Block::id);
        assert_eq!(by_offset, Some(z.block()));
        assert_eq!(by_scan, by_offset);

        // A later block does not capture the end pointer of the head.
        let next = alloc.allocate(MAX_ALIGN, 0, 8);
        assert_ne!(next.block(), z.block());
        assert_eq!(alloc.find_owning_block(z.ptr().as_ptr()).map(Block::id), Some(z.block()));
        assert_eq!(
            alloc.find_owning_block(next.ptr().as_ptr()).map(Block::id),
            Some(next.block())
        );
    }

    #[test]
    fn zero_size_allocation_in_zero_capacity_head_resolves_both_ways() {
        let mut alloc = BlockAllocator::new(GrowthPolicy::Fixed, 0);
        let z = alloc.allocate(1, 0, 0);
        assert_eq!(z.block(), alloc.head_block().id());
        assert_eq!(alloc.block_count(), 1);

        let by_offset = alloc.owning_block(z.ptr().as_ptr(), z.aligned_offset()).map(Block::id);
        let by_scan = alloc.find_owning_block(z.ptr().as_ptr()).map(Block::id);
        assert_eq!(by_offset, Some(z.block()));
        assert_eq!(by_scan, by_offset);
    }

    #[test]
    fn ranges_from_before_reset_are_rejected() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        let head = alloc.allocate(8, 0, 8);
        let _ = alloc.allocate(MAX_ALIGN, 0, UNIT);
        let stale = alloc.allocate(MAX_ALIGN, 0, UNIT);
        assert_ne!(stale.block(), alloc.head_block().id());

        alloc.reset();
        // Refill so the cursors line up with the stale ranges again.
        let fresh_head = alloc.allocate(8, 0, 8);
        let _ = alloc.allocate(MAX_ALIGN, 0, UNIT);
        let fresh = alloc.allocate(MAX_ALIGN, 0, UNIT);
        assert_eq!(fresh.end(), stale.end());
        assert_ne!(fresh.block(), stale.block());
        assert_ne!(fresh_head.block(), head.block());

        let mut stale_tail = stale;
        assert!(!alloc.release(&stale));
        assert!(!alloc.resize(&mut stale_tail, -8));
        assert!(alloc.block(stale.block()).is_none());
        assert_eq!(alloc.current_block().cursor(), fresh.end());
        assert_eq!(alloc.head_block().cursor(), fresh_head.end());
        assert!(alloc.release(&fresh));
    }

    #[test]
    fn released_head_rejects_its_old_ranges() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        let old = alloc.allocate(8, 0, 8);
        let head = alloc.head_block().id();
        alloc.release_block(head);
        assert_ne!(alloc.head_block().id(), head);
        assert_eq!(alloc.head_block().origin(), BlockOrigin::Head);

        let new = alloc.allocate(8, 0, 8);
        assert_eq!(new.ptr(), old.ptr());
        assert!(!alloc.release(&old));
        assert!(alloc.release(&new));
    }

    #[test]
    fn unowned_pointer_is_not_found() {
        let alloc = allocator(GrowthPolicy::Fixed);
        let local = 0u64;
        let ptr = (&local as *const u64).cast::<u8>();
        assert!(alloc.find_owning_block(ptr).is_none());
        assert!(alloc.owning_block(ptr, 0).is_none());
    }

    #[test]
    fn borrowed_head_avoids_heap_until_full() {
        let mut storage = [MaybeUninit::<u8>::uninit(); 256];
        let mut alloc = BlockAllocator::with_buffer(GrowthPolicy::Fixed, &mut storage);
        assert_eq!(alloc.prealloc_size(), 256);
        let usable = alloc.prealloc_usable_space();
        assert!(usable > 256 - MAX_ALIGN);

        let r = alloc.allocate(1, 0, usable);
        assert_eq!(r.block(), alloc.head_block().id());
        assert_eq!(alloc.block_count(), 1);

        let _ = alloc.allocate(1, 0, 1);
        assert_eq!(alloc.block_count(), 2);
        assert_eq!(alloc.current_block().capacity(), 256);
    }

    #[test]
    fn explicit_head_usable_bytes() {
        let mut alloc = BlockAllocator::with_head_usable_bytes(GrowthPolicy::Linear, 64, 32);
        assert_eq!(alloc.prealloc_usable_space(), 32);
        let _ = alloc.allocate(1, 0, 32);
        let _ = alloc.allocate(1, 0, 1);
        assert_eq!(alloc.current_block().capacity(), 128);
    }

    #[test]
    fn zero_capacity_head_grows_on_first_allocation() {
        let mut alloc = BlockAllocator::new(GrowthPolicy::Fixed, 0);
        let r = alloc.allocate(8, 0, 8);
        assert_ne!(r.block(), alloc.head_block().id());
        assert_eq!(
            alloc.current_block().capacity(),
            BlockAllocatorConfig::DEFAULT_BLOCK_INCREMENT
        );
    }

    #[test]
    fn block_metadata_is_per_block() {
        let mut alloc = allocator(GrowthPolicy::Fixed);
        let _ = alloc.allocate(MAX_ALIGN, 0, UNIT);
        let r = alloc.allocate(MAX_ALIGN, 0, 8);
        alloc.block_mut(r.block()).unwrap().set_metadata(11);
        alloc.head_block_mut().set_metadata(22);
        for block in alloc.blocks_mut() {
            block.set_metadata(block.metadata() + 1);
        }
        assert_eq!(alloc.block(r.block()).unwrap().metadata(), 12);
        assert_eq!(alloc.head_block().metadata(), 23);
        assert_eq!(alloc.metadata(), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = BlockAllocatorConfig::new(GrowthPolicy::Fixed, 64).with_block_increment(0);
        assert!(matches!(
            BlockAllocator::try_from_config(config),
            Err(BlockError::InvalidConfig { .. })
        ));
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Clone, Debug)]
        enum Op {
            Allocate { align_log2: u32, padding: usize, size: usize },
            ReleaseTail,
            ResizeTail(isize),
            ReleaseBlock(usize),
            Reserve(usize),
            Reset,
        }

        fn any_op() -> impl Strategy<Value = Op> {
            prop_oneof![
                6 => (0u32..8, 0usize..32, 0usize..600).prop_map(|(align_log2, padding, size)| Op::Allocate {
                    align_log2,
                    padding,
                    size,
                }),
                2 => Just(Op::ReleaseTail),
                2 => (-64isize..64).prop_map(Op::ResizeTail),
                1 => (0usize..8).prop_map(Op::ReleaseBlock),
                1 => (1usize..2048).prop_map(Op::Reserve),
                1 => Just(Op::Reset),
            ]
        }

        fn any_policy() -> impl Strategy<Value = GrowthPolicy> {
            prop::sample::select(GrowthPolicy::ALL.to_vec())
        }

        proptest! {
            #[test]
            fn every_byte_is_live_or_free(
                policy in any_policy(),
                ops in prop::collection::vec(any_op(), 1..64),
            ) {
                let config = BlockAllocatorConfig::new(policy, UNIT).with_max_block_size(1 << 20);
                let mut alloc = BlockAllocator::from_config(config);
                let mut live: Vec<ByteRange> = Vec::new();
                for op in ops {
                    match op {
                        Op::Allocate { align_log2, padding, size } => {
                            let align = 1 << align_log2;
                            let r = alloc.allocate(align, padding, size);
                            prop_assert_eq!(r.ptr().as_ptr() as usize % align, 0);
                            prop_assert!(r.aligned_offset() - r.start() >= padding);
                            prop_assert_eq!(r.len(), size);
                            live.push(r);
                        }
                        Op::ReleaseTail => {
                            if let Some(r) = live.pop() {
                                prop_assert!(alloc.release(&r));
                            }
                        }
                        Op::ResizeTail(delta) => {
                            if let Some(r) = live.last_mut() {
                                let before = *r;
                                let room = alloc.block(r.block()).map_or(0, Block::remaining);
                                let fits = delta <= room as isize && delta >= -(r.len() as isize);
                                prop_assert_eq!(alloc.resize(r, delta), fits);
                                if fits {
                                    prop_assert_eq!(r.len() as isize, before.len() as isize + delta);
                                } else {
                                    prop_assert_eq!(*r, before);
                                }
                            }
                        }
                        Op::ReleaseBlock(nth) => {
                            let Some(id) = alloc.blocks().nth(nth).map(Block::id) else {
                                continue;
                            };
                            alloc.release_block(id);
                            live.retain(|r| r.block() != id);
                        }
                        Op::Reserve(size) => alloc.reserve(size, ReserveFlags::NONE),
                        Op::Reset => {
                            alloc.reset();
                            live.clear();
                        }
                    }

                    // Every byte of every block is either covered by a live
                    // range (padding and slack included) or free past the cursor.
                    let mut live_total = 0;
                    let mut free_total = 0;
                    for block in alloc.blocks() {
                        let live_bytes: usize = live
                            .iter()
                            .filter(|r| r.block() == block.id())
                            .map(|r| r.end() - r.start())
                            .sum();
                        prop_assert_eq!(live_bytes, block.used(), "{:?}", block);
                        prop_assert_eq!(block.capacity() - block.cursor(), block.remaining());
                        live_total += live_bytes;
                        free_total += block.remaining();
                    }
                    let capacity: usize = alloc.blocks().map(Block::capacity).sum();
                    prop_assert_eq!(capacity, live_total + free_total);
                    prop_assert_eq!(alloc.total_size(), capacity + alloc.scratch_block_size());
                    prop_assert_eq!(alloc.head_block().origin(), BlockOrigin::Head);
                    for r in &live {
                        let owner = alloc.owning_block(r.ptr().as_ptr(), r.aligned_offset());
                        prop_assert_eq!(owner.map(Block::id), Some(r.block()));
                    }
                }
            }
        }
    }
}
