//! Block identities and allocation handles.
//!
//! A [`ByteRange`] names the block it was carved from by [`BlockId`] rather
//! than by pointer, so the owning block of any live allocation can be
//! recovered with a map lookup instead of pointer arithmetic.
//!
//! Ids are never reused. A block is issued a fresh id whenever it is
//! rewound wholesale ([`reset`](crate::BlockAllocator::reset),
//! [`release_block`](crate::BlockAllocator::release_block)), so a range
//! handed out before the rewind no longer resolves and
//! [`release`](crate::BlockAllocator::release) /
//! [`resize`](crate::BlockAllocator::resize) reject it instead of moving
//! the cursor of whatever now occupies that memory.

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

/// Next id to hand out. Process-wide so ids stay unique across allocators
/// that exchange blocks.
static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one incarnation of a block.
///
/// Survives moving the block between allocators
/// ([`steal_heap_blocks`](crate::BlockAllocator::steal_heap_blocks)) but
/// not rewinding it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u64);

impl BlockId {
    /// Issue an id that no block has carried before.
    pub(crate) fn next() -> Self {
        Self(NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

/// Where a block's storage came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOrigin {
    /// The allocator's first block. It is reset in place, never freed
    /// while the allocator lives.
    Head,
    /// Independently allocated from the raw heap and freed on release.
    Heap,
}

/// A span of bytes granted by [`Block::allocate`](crate::Block::allocate).
///
/// Offsets are relative to the owning block's base:
///
/// ```text
/// start         aligned_offset              end
///   │ padding + align slack │     payload      │
///   ▼                       ▼                  ▼
/// ──┬───────────────────────┬──────────────────┬── ...
/// ```
///
/// `start` is the block's cursor before the allocation and `end` the cursor
/// after it; both are what [`Block::release`](crate::Block::release) needs.
/// Caller metadata reserved through `padding` lives in
/// `[aligned_offset - padding, aligned_offset)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub struct ByteRange {
    pub(crate) block: BlockId,
    pub(crate) start: usize,
    pub(crate) aligned_offset: usize,
    pub(crate) end: usize,
    pub(crate) ptr: NonNull<u8>,
}

impl ByteRange {
    /// The block this range was carved from.
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Cursor position before the allocation.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Offset of the first payload byte.
    pub fn aligned_offset(&self) -> usize {
        self.aligned_offset
    }

    /// Cursor position after the allocation (exclusive payload end).
    pub fn end(&self) -> usize {
        self.end
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.end - self.aligned_offset
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.end == self.aligned_offset
    }

    /// Pointer to the first payload byte.
    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ByteRange({}, start={}, aligned={}, end={})",
            self.block, self.start, self.aligned_offset, self.end
        )
    }
}
