//! Arena-specific error types.

use std::error::Error;
use std::fmt;

use strata_block::BlockError;

/// Errors that can occur while placing values in an [`Arena`](crate::Arena).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// The underlying block allocator rejected the request.
    Block(BlockError),
    /// `len` elements of `elem_size` bytes do not fit in the address space.
    ArrayTooLarge {
        /// Requested element count.
        len: usize,
        /// Size of one element in bytes.
        elem_size: usize,
    },
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block(err) => write!(f, "block allocation failed: {err}"),
            Self::ArrayTooLarge { len, elem_size } => {
                write!(
                    f,
                    "array of {len} elements of {elem_size} bytes overflows the address space"
                )
            }
        }
    }
}

impl Error for ArenaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Block(err) => Some(err),
            Self::ArrayTooLarge { .. } => None,
        }
    }
}

impl From<BlockError> for ArenaError {
    fn from(err: BlockError) -> Self {
        Self::Block(err)
    }
}
