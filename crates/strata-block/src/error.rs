//! Block allocator error types.

use std::alloc::{self, Layout};
use std::error::Error;
use std::fmt;

use crate::raw::MAX_ALIGN;

/// Errors that can occur while sizing or growing a block allocator.
///
/// Tail misuse (releasing or resizing a range that is not the most recent
/// live allocation of its block) is not an error: those operations report
/// `false` and leave the block untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockError {
    /// The request would overflow address arithmetic.
    Overflow {
        /// Requested payload size in bytes.
        size: usize,
        /// Requested padding before the payload in bytes.
        padding: usize,
        /// Requested payload alignment.
        align: usize,
    },
    /// The requested alignment is zero or not a power of two.
    InvalidAlignment {
        /// The rejected alignment.
        align: usize,
    },
    /// The raw heap could not supply a new block.
    AllocationFailed {
        /// Size of the block that could not be allocated.
        bytes: usize,
    },
    /// A configuration value was rejected by [`validate`](crate::BlockAllocatorConfig::validate).
    InvalidConfig {
        /// Human-readable description of the problem.
        reason: String,
    },
}

impl BlockError {
    /// Escalate a failure on an infallible path.
    ///
    /// Heap exhaustion goes through [`alloc::handle_alloc_error`] (which
    /// aborts by default); every other error is a caller bug and panics.
    pub fn escalate(self) -> ! {
        if let Self::AllocationFailed { bytes } = self {
            if let Ok(layout) = Layout::from_size_align(bytes, MAX_ALIGN) {
                alloc::handle_alloc_error(layout);
            }
        }
        panic!("{self}")
    }
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow {
                size,
                padding,
                align,
            } => {
                write!(
                    f,
                    "allocation overflows address space: size {size}, padding {padding}, align {align}"
                )
            }
            Self::InvalidAlignment { align } => {
                write!(f, "alignment {align} is not a power of two")
            }
            Self::AllocationFailed { bytes } => {
                write!(f, "raw heap failed to allocate a {bytes}-byte block")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid block allocator config: {reason}")
            }
        }
    }
}

impl Error for BlockError {}
