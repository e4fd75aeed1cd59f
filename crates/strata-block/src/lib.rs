//! Block-structured bump allocation.
//!
//! A [`BlockAllocator`] hands out byte ranges from a growable sequence of
//! fixed-capacity [`Block`]s. The first (head) block is created with the
//! allocator, optionally over caller-provided storage; later blocks come
//! from the global allocator and are sized by a [`GrowthPolicy`].
//!
//! # Architecture
//!
//! ```text
//! BlockAllocator
//! ├── head Block (reset in place, never freed while the allocator lives)
//! ├── heap Block[] (arrival order; the last one is "current")
//! ├── scratch Block (at most one, empty, reused before growing)
//! └── BlockSizing (policy × unit, clamped to max_block_size)
//! ```
//!
//! Allocation is bump-only. The most recent allocation of a block can be
//! released or resized in place; everything else is reclaimed a whole block
//! at a time, or all at once with [`BlockAllocator::reset`].
//!
//! This crate is single-threaded: no type here is `Sync`.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod allocator;
pub mod block;
pub mod config;
pub mod error;
pub mod growth;
pub mod handle;
mod raw;

// Public re-exports for the primary API surface.
pub use allocator::{BlockAllocator, ReserveFlags};
pub use block::Block;
pub use config::BlockAllocatorConfig;
pub use error::BlockError;
pub use growth::{BlockSizing, FibBlockSizes, GrowthPolicy};
pub use handle::{BlockId, BlockOrigin, ByteRange};
pub use raw::MAX_ALIGN;
