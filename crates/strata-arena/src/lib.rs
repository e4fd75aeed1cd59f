//! Typed arena allocation on top of `strata-block`.
//!
//! An [`Arena`] places values of arbitrary types in a growable sequence of
//! bump blocks and tears them down in exact reverse construction order.
//! Individual values are never freed; the whole arena is reclaimed at once
//! by [`Arena::reset`] or by dropping it.
//!
//! # Architecture
//!
//! ```text
//! Arena
//! ├── BlockAllocator (head block + heap blocks + scratch)
//! └── Teardown stack → DropEntry { Value | Array }
//! ```
//!
//! Values without drop glue (`Copy` data, zeroed arrays, raw bytes) add no
//! teardown record.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod arena;
pub mod error;
mod teardown;

// Public re-exports for the primary API surface.
pub use arena::Arena;
pub use error::ArenaError;
