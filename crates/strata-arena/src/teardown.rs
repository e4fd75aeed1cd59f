//! Deferred destructor records.
//!
//! Each value with drop glue that the arena places gets one [`DropEntry`]
//! on a [`Teardown`] stack; arrays share a single entry for the whole run.
//! Popping the stack newest-first runs destructors in exact reverse
//! construction order, regardless of which block the values live in.

#![allow(unsafe_code)]

use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};

use smallvec::SmallVec;

/// Entries kept inline before the stack spills to the heap.
const INLINE_ENTRIES: usize = 16;

/// One deferred destructor call.
pub(crate) enum DropEntry {
    /// A single value.
    Value {
        addr: NonNull<u8>,
        drop_fn: unsafe fn(NonNull<u8>),
    },
    /// A contiguous run of `len` values, dropped highest index first.
    Array {
        addr: NonNull<u8>,
        len: usize,
        drop_fn: unsafe fn(NonNull<u8>, usize),
    },
}

impl DropEntry {
    /// Record for the value at `ptr`, or `None` if `T` has no drop glue.
    pub(crate) fn value<T>(ptr: NonNull<T>) -> Option<Self> {
        mem::needs_drop::<T>().then(|| Self::Value {
            addr: ptr.cast(),
            drop_fn: drop_value::<T>,
        })
    }

    /// Record for `len` values starting at `ptr`, or `None` if `T` has no
    /// drop glue.
    pub(crate) fn array<T>(ptr: NonNull<T>, len: usize) -> Option<Self> {
        mem::needs_drop::<T>().then(|| Self::Array {
            addr: ptr.cast(),
            len,
            drop_fn: drop_array::<T>,
        })
    }

    /// Run the destructor.
    ///
    /// # Safety
    ///
    /// The recorded values must be initialized, not yet dropped, and not
    /// accessed again afterwards.
    unsafe fn run(self) {
        match self {
            // SAFETY: forwarded from the caller.
            Self::Value { addr, drop_fn } => unsafe { drop_fn(addr) },
            // SAFETY: forwarded from the caller.
            Self::Array { addr, len, drop_fn } => unsafe { drop_fn(addr, len) },
        }
    }
}

impl fmt::Debug for DropEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value { addr, .. } => f.debug_struct("Value").field("addr", addr).finish(),
            Self::Array { addr, len, .. } => f
                .debug_struct("Array")
                .field("addr", addr)
                .field("len", len)
                .finish(),
        }
    }
}

unsafe fn drop_value<T>(addr: NonNull<u8>) {
    // SAFETY: `addr` was recorded from a live, initialized `T`.
    unsafe { ptr::drop_in_place(addr.cast::<T>().as_ptr()) }
}

unsafe fn drop_array<T>(addr: NonNull<u8>, len: usize) {
    let base = addr.cast::<T>();
    for i in (0..len).rev() {
        // SAFETY: `addr` was recorded from `len` live, initialized `T`s.
        unsafe { ptr::drop_in_place(base.add(i).as_ptr()) }
    }
}

/// LIFO stack of destructor records.
#[derive(Debug, Default)]
pub(crate) struct Teardown {
    entries: SmallVec<[DropEntry; INLINE_ENTRIES]>,
}

impl Teardown {
    pub(crate) fn push(&mut self, entry: DropEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Run every recorded destructor, newest first, leaving the stack empty.
    ///
    /// If a destructor panics, the entries below it stay on the stack.
    ///
    /// # Safety
    ///
    /// Every recorded value must still be live, and none may be accessed
    /// afterwards.
    pub(crate) unsafe fn run_all(&mut self) -> usize {
        let mut ran = 0;
        while let Some(entry) = self.entries.pop() {
            // SAFETY: forwarded from the caller; popping first guarantees
            // each entry runs at most once.
            unsafe { entry.run() };
            ran += 1;
        }
        ran
    }
}
