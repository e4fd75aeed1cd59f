//! Typed arena over a [`BlockAllocator`].
//!
//! [`Arena`] places values of any type in bump-allocated blocks and hands
//! back `&mut` references tied to the arena borrow. Values with drop glue
//! are recorded on a teardown stack and dropped newest-first when the arena
//! is [`reset`](Arena::reset) or dropped; everything else costs no
//! bookkeeping at all.
//!
//! Placement takes `&self`, so many references can be live at once:
//!
//! ```
//! use strata_arena::Arena;
//! use strata_block::GrowthPolicy;
//!
//! let arena = Arena::new(GrowthPolicy::Fixed, 256);
//! let a = arena.make(String::from("left"));
//! let b = arena.make(String::from("right"));
//! a.push_str(b);
//! assert_eq!(a.as_str(), "leftright");
//! ```

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::cell::RefCell;
use std::fmt;
use std::mem::{self, MaybeUninit};
use std::ptr::NonNull;
use std::slice;

use bytemuck::Zeroable;
use strata_block::{BlockAllocator, BlockAllocatorConfig, GrowthPolicy, ReserveFlags};
use tracing::debug;

use crate::error::ArenaError;
use crate::teardown::{DropEntry, Teardown};

/// Escalate a placement failure on an infallible path.
fn fatal(err: ArenaError) -> ! {
    match err {
        ArenaError::Block(err) => err.escalate(),
        other => panic!("{other}"),
    }
}

/// A typed, single-threaded arena.
///
/// References returned by the `make*` methods live as long as the shared
/// borrow of the arena. [`reset`](Self::reset) and drop need `&mut self`,
/// so no reference can outlive the values it points to.
///
/// Constructors that record a destructor require `T: 'static`: a value's
/// `Drop` runs during teardown, after other arena values may already be
/// gone, so it must not be able to observe them.
pub struct Arena<'buf> {
    allocator: RefCell<BlockAllocator<'buf>>,
    teardown: RefCell<Teardown>,
}

impl Arena<'static> {
    /// Create an arena whose first block holds `inline_capacity` bytes.
    pub fn new(policy: GrowthPolicy, inline_capacity: usize) -> Self {
        Self::from_allocator(BlockAllocator::new(policy, inline_capacity))
    }

    /// Create an arena from a full block allocator configuration.
    pub fn from_config(config: BlockAllocatorConfig) -> Self {
        Self::from_allocator(BlockAllocator::from_config(config))
    }
}

impl<'buf> Arena<'buf> {
    /// Create an arena whose first block is the caller's `buf`.
    ///
    /// No heap memory is used until `buf` is exhausted.
    pub fn with_buffer(policy: GrowthPolicy, buf: &'buf mut [MaybeUninit<u8>]) -> Self {
        Self::from_allocator(BlockAllocator::with_buffer(policy, buf))
    }

    /// Wrap an existing block allocator.
    pub fn from_allocator(allocator: BlockAllocator<'buf>) -> Self {
        Self {
            allocator: RefCell::new(allocator),
            teardown: RefCell::new(Teardown::default()),
        }
    }

    /// Move `value` into the arena.
    ///
    /// # Panics
    ///
    /// Aborts if the raw heap is exhausted.
    #[allow(clippy::mut_from_ref)]
    pub fn make<T: 'static>(&self, value: T) -> &mut T {
        self.try_make(value).unwrap_or_else(|err| fatal(err))
    }

    /// Fallible form of [`make`](Self::make). On error `value` is dropped.
    #[allow(clippy::mut_from_ref)]
    pub fn try_make<T: 'static>(&self, value: T) -> Result<&mut T, ArenaError> {
        let ptr = self.alloc_layout(Layout::new::<T>())?.cast::<T>();
        // SAFETY: `ptr` is freshly allocated, aligned and sized for `T`.
        unsafe { ptr.as_ptr().write(value) };
        self.record(DropEntry::value(ptr));
        // SAFETY: initialized above; the range is never handed out again
        // until the arena is reset through `&mut self`.
        Ok(unsafe { &mut *ptr.as_ptr() })
    }

    /// Construct a value in the arena from `f`.
    ///
    /// Storage is reserved before `f` runs, so `f` may itself place values
    /// in this arena. Those are torn down after this one.
    #[allow(clippy::mut_from_ref)]
    pub fn make_with<T: 'static, F: FnOnce() -> T>(&self, f: F) -> &mut T {
        let ptr = self
            .alloc_layout(Layout::new::<T>())
            .unwrap_or_else(|err| fatal(err))
            .cast::<T>();
        let value = f();
        // SAFETY: `ptr` is freshly allocated, aligned and sized for `T`.
        unsafe { ptr.as_ptr().write(value) };
        self.record(DropEntry::value(ptr));
        // SAFETY: initialized above and uniquely borrowed.
        unsafe { &mut *ptr.as_ptr() }
    }

    /// Copy `value` into the arena without recording a destructor.
    ///
    /// `Copy` types have no drop glue, so `T` may borrow from the arena or
    /// anything else that outlives it.
    #[allow(clippy::mut_from_ref)]
    pub fn make_copy<T: Copy>(&self, value: T) -> &mut T {
        let ptr = self
            .alloc_layout(Layout::new::<T>())
            .unwrap_or_else(|err| fatal(err))
            .cast::<T>();
        // SAFETY: `ptr` is freshly allocated, aligned and sized for `T`.
        unsafe {
            ptr.as_ptr().write(value);
            &mut *ptr.as_ptr()
        }
    }

    /// Place `len` default-constructed values.
    ///
    /// Elements are built in index order and dropped in reverse index
    /// order at teardown. If `T::default` panics, the elements already
    /// built are leaked.
    #[allow(clippy::mut_from_ref)]
    pub fn make_array_default<T: Default + 'static>(&self, len: usize) -> &mut [T] {
        self.make_initialized_array(len, |_| T::default())
    }

    /// Fallible form of [`make_array_default`](Self::make_array_default).
    #[allow(clippy::mut_from_ref)]
    pub fn try_make_array_default<T: Default + 'static>(
        &self,
        len: usize,
    ) -> Result<&mut [T], ArenaError> {
        self.try_make_initialized_array(len, |_| T::default())
    }

    /// Place `len` zeroed values with no destructor bookkeeping.
    #[allow(clippy::mut_from_ref)]
    pub fn make_array<T: Zeroable + Copy>(&self, len: usize) -> &mut [T] {
        self.try_make_array(len).unwrap_or_else(|err| fatal(err))
    }

    /// Fallible form of [`make_array`](Self::make_array).
    #[allow(clippy::mut_from_ref)]
    pub fn try_make_array<T: Zeroable + Copy>(&self, len: usize) -> Result<&mut [T], ArenaError> {
        let ptr = self.alloc_layout(array_layout::<T>(len)?)?.cast::<T>();
        // SAFETY: `ptr` covers `len` elements, and `T: Zeroable` makes the
        // all-zero bit pattern a valid `T`.
        unsafe {
            ptr.as_ptr().write_bytes(0, len);
            Ok(slice::from_raw_parts_mut(ptr.as_ptr(), len))
        }
    }

    /// Place `len` values produced by `generator(i)` for `i` in `0..len`.
    ///
    /// Elements are dropped in reverse index order at teardown. If the
    /// generator panics, the elements already produced are leaked.
    #[allow(clippy::mut_from_ref)]
    pub fn make_initialized_array<T: 'static, F: FnMut(usize) -> T>(
        &self,
        len: usize,
        generator: F,
    ) -> &mut [T] {
        self.try_make_initialized_array(len, generator)
            .unwrap_or_else(|err| fatal(err))
    }

    /// Fallible form of
    /// [`make_initialized_array`](Self::make_initialized_array).
    #[allow(clippy::mut_from_ref)]
    pub fn try_make_initialized_array<T: 'static, F: FnMut(usize) -> T>(
        &self,
        len: usize,
        mut generator: F,
    ) -> Result<&mut [T], ArenaError> {
        let ptr = self.alloc_layout(array_layout::<T>(len)?)?.cast::<T>();
        for i in 0..len {
            let value = generator(i);
            // SAFETY: `i < len`, so the slot is inside the allocation.
            unsafe { ptr.as_ptr().add(i).write(value) };
        }
        if len > 0 {
            self.record(DropEntry::array(ptr, len));
        }
        // SAFETY: all `len` elements were initialized above.
        Ok(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), len) })
    }

    /// Raw storage of `size` bytes aligned to `align`, with no bookkeeping.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    #[allow(clippy::mut_from_ref)]
    pub fn make_bytes_aligned_to(&self, size: usize, align: usize) -> &mut [MaybeUninit<u8>] {
        self.try_make_bytes_aligned_to(size, align)
            .unwrap_or_else(|err| fatal(err))
    }

    /// Fallible form of [`make_bytes_aligned_to`](Self::make_bytes_aligned_to).
    #[allow(clippy::mut_from_ref)]
    pub fn try_make_bytes_aligned_to(
        &self,
        size: usize,
        align: usize,
    ) -> Result<&mut [MaybeUninit<u8>], ArenaError> {
        let range = self.allocator.borrow_mut().try_allocate(align, 0, size)?;
        let ptr = range.ptr().cast::<MaybeUninit<u8>>();
        // SAFETY: the range is `size` bytes, exclusively ours, and
        // `MaybeUninit<u8>` has no validity requirement.
        Ok(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), size) })
    }

    /// Drop every recorded value, newest first, then release all blocks
    /// back to the just-constructed state.
    ///
    /// Calling this on an empty arena does nothing.
    pub fn reset(&mut self) {
        let dropped = self.run_teardown();
        self.allocator.get_mut().reset();
        debug!(dropped, "reset arena");
    }

    /// Capacity of every block the arena owns.
    pub fn total_size(&self) -> usize {
        self.allocator.borrow().total_size()
    }

    /// Bytes of first-block storage.
    pub fn prealloc_size(&self) -> usize {
        self.allocator.borrow().prealloc_size()
    }

    /// Number of blocks in use, the first block included.
    pub fn block_count(&self) -> usize {
        self.allocator.borrow().block_count()
    }

    /// Destructor records waiting for teardown.
    pub fn pending_destructors(&self) -> usize {
        self.teardown.borrow().len()
    }

    /// Stage storage for `size` bytes ahead of time.
    ///
    /// See [`BlockAllocator::reserve`].
    pub fn reserve(&self, size: usize, flags: ReserveFlags) {
        self.allocator.borrow_mut().reserve(size, flags);
    }

    /// Capacity of the block retained for the next growth, or 0.
    pub fn scratch_block_size(&self) -> usize {
        self.allocator.borrow().scratch_block_size()
    }

    fn alloc_layout(&self, layout: Layout) -> Result<NonNull<u8>, ArenaError> {
        let range = self
            .allocator
            .borrow_mut()
            .try_allocate(layout.align(), 0, layout.size())?;
        Ok(range.ptr())
    }

    fn record(&self, entry: Option<DropEntry>) {
        if let Some(entry) = entry {
            self.teardown.borrow_mut().push(entry);
        }
    }

    fn run_teardown(&mut self) -> usize {
        // SAFETY: `&mut self` proves no reference handed out by `make*` is
        // still live, and every entry was recorded after its values were
        // fully initialized.
        unsafe { self.teardown.get_mut().run_all() }
    }
}

impl Drop for Arena<'_> {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

impl fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("allocator", &*self.allocator.borrow())
            .field("pending_destructors", &self.teardown.borrow().len())
            .finish()
    }
}

fn array_layout<T>(len: usize) -> Result<Layout, ArenaError> {
    Layout::array::<T>(len).map_err(|_| ArenaError::ArrayTooLarge {
        len,
        elem_size: mem::size_of::<T>(),
    })
}
