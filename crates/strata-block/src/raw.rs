//! Low-level primitives for block memory.
//!
//! Every [`Block`](crate::Block) owns exactly one [`RawBuffer`]: either
//! memory obtained from the global allocator (freed on drop) or a window
//! into caller-owned storage (never freed here). This is the only module in
//! `strata-block` that contains `unsafe`; each block carries a `// SAFETY:`
//! comment.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::error::BlockError;

/// Alignment guaranteed for the base address of every block.
///
/// Matches the largest scalar alignment on the supported platforms, so any
/// allocation with `align <= MAX_ALIGN` needs no slack beyond its padding.
pub const MAX_ALIGN: usize = 16;

#[repr(align(16))]
struct MaxAligned;

/// A fixed-size byte buffer backing one block.
pub(crate) struct RawBuffer {
    base: NonNull<u8>,
    len: usize,
    /// `Some` when the buffer came from the global allocator.
    layout: Option<Layout>,
}

// SAFETY: RawBuffer is a uniquely owned byte buffer (or a window into a
// uniquely borrowed one); it holds no thread-affine state.
unsafe impl Send for RawBuffer {}

impl RawBuffer {
    /// Allocate `bytes` from the global allocator, aligned to [`MAX_ALIGN`].
    pub(crate) fn try_alloc(bytes: usize) -> Result<Self, BlockError> {
        if bytes == 0 {
            return Ok(Self::empty());
        }
        let layout = Layout::from_size_align(bytes, MAX_ALIGN).map_err(|_| BlockError::Overflow {
            size: bytes,
            padding: 0,
            align: MAX_ALIGN,
        })?;
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(ptr).ok_or(BlockError::AllocationFailed { bytes })?;
        Ok(Self {
            base,
            len: bytes,
            layout: Some(layout),
        })
    }

    /// Like [`try_alloc`](Self::try_alloc), but failures escalate via
    /// [`BlockError::escalate`].
    #[cfg(test)]
    pub(crate) fn alloc(bytes: usize) -> Self {
        Self::try_alloc(bytes).unwrap_or_else(|err| err.escalate())
    }

    /// A zero-length buffer with a well-aligned dangling base.
    pub(crate) fn empty() -> Self {
        Self {
            base: NonNull::<MaxAligned>::dangling().cast(),
            len: 0,
            layout: None,
        }
    }

    /// Wrap caller-owned storage, skipping leading bytes up to [`MAX_ALIGN`].
    ///
    /// The returned buffer does not borrow `buf` in the type system; the
    /// allocator that stores it carries the borrow's lifetime instead.
    pub(crate) fn borrowed(buf: &mut [MaybeUninit<u8>]) -> Self {
        let skip = buf
            .as_mut_ptr()
            .cast::<u8>()
            .align_offset(MAX_ALIGN)
            .min(buf.len());
        let window = &mut buf[skip..];
        if window.is_empty() {
            return Self::empty();
        }
        let len = window.len();
        Self {
            base: NonNull::from(window).cast(),
            len,
            layout: None,
        }
    }

    /// Address of the first byte.
    pub(crate) fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Number of usable bytes.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Whether the bytes are returned to the global allocator on drop.
    pub(crate) fn is_owned(&self) -> bool {
        self.layout.is_some()
    }

    /// Pointer to the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` lies past the end of the buffer.
    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(
            offset <= self.len,
            "offset {offset} out of bounds for a {}-byte block",
            self.len
        );
        // SAFETY: `offset <= len`, so the result stays within the buffer or
        // one past its end.
        unsafe { self.base.add(offset) }
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            // SAFETY: `base` was returned by `alloc::alloc(layout)` and is
            // freed exactly once, here.
            unsafe { alloc::dealloc(self.base.as_ptr(), layout) };
        }
    }
}
