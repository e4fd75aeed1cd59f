//! Strata: block-structured arena allocation.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the Strata sub-crates. For most users, adding `strata` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use strata::prelude::*;
//!
//! // Typed placement with reverse-order teardown.
//! let mut arena = Arena::new(GrowthPolicy::Exponential, 1024);
//! let name = arena.make(String::from("node"));
//! name.push_str("-0");
//! let weights = arena.make_array::<f32>(16);
//! weights[3] = 0.5;
//! arena.reset();
//!
//! // Raw byte ranges with stack-discipline release.
//! let mut blocks = BlockAllocator::new(GrowthPolicy::Linear, 256);
//! let a = blocks.allocate(8, 0, 32);
//! let b = blocks.allocate(8, 0, 32);
//! assert!(!blocks.release(&a));
//! assert!(blocks.release(&b));
//! assert!(blocks.release(&a));
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`block`] | `strata-block` | Blocks, growth policies, `BlockAllocator`, configuration |
//! | [`arena`] | `strata-arena` | Typed `Arena` and its teardown stack |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Blocks, growth policies and the block allocator (`strata-block`).
///
/// Use [`block::BlockAllocator`] directly for untyped byte ranges, custom
/// padding metadata, or owning-block lookups.
pub use strata_block as block;

/// Typed arena (`strata-arena`).
///
/// [`arena::Arena`] is also available in the [`prelude`].
pub use strata_arena as arena;

/// Common imports for typical Strata usage.
///
/// ```rust
/// use strata::prelude::*;
/// ```
pub mod prelude {
    // Typed arena
    pub use strata_arena::{Arena, ArenaError};

    // Block layer
    pub use strata_block::{
        Block, BlockAllocator, BlockAllocatorConfig, BlockError, BlockId, ByteRange, GrowthPolicy,
        ReserveFlags,
    };
}
