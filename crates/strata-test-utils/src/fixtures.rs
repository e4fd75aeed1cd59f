//! Lifecycle-tracking values.
//!
//! - [`LifeCounter`]: shared constructed/destroyed counters plus a log of
//!   ids in destruction order.
//! - [`Tracked`]: a value bound to a `LifeCounter`, with a payload large
//!   enough that a handful of them spill across blocks.
//! - [`DefaultTracked`]: a `Default` value that reports to a per-thread
//!   counter, for array constructors that cannot take arguments.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Shared lifecycle counters.
///
/// Clones share the same counts.
#[derive(Clone, Debug, Default)]
pub struct LifeCounter {
    constructed: Rc<Cell<usize>>,
    destroyed: Rc<Cell<usize>>,
    order: Rc<RefCell<Vec<usize>>>,
}

impl LifeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a tracked value with the given id.
    pub fn track(&self, id: usize) -> Tracked {
        self.constructed.set(self.constructed.get() + 1);
        Tracked {
            id,
            payload: [id as u64; Tracked::PAYLOAD_WORDS],
            counter: self.clone(),
        }
    }

    pub fn constructed(&self) -> usize {
        self.constructed.get()
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.get()
    }

    /// Values constructed but not yet destroyed.
    pub fn live(&self) -> usize {
        self.constructed() - self.destroyed()
    }

    /// Ids of destroyed values, in destruction order.
    pub fn drop_order(&self) -> Vec<usize> {
        self.order.borrow().clone()
    }

    fn record_drop(&self, id: usize) {
        self.destroyed.set(self.destroyed.get() + 1);
        self.order.borrow_mut().push(id);
    }
}

/// A value that reports its destruction to a [`LifeCounter`].
#[derive(Debug)]
pub struct Tracked {
    id: usize,
    payload: [u64; Tracked::PAYLOAD_WORDS],
    counter: LifeCounter,
}

impl Tracked {
    /// Words of filler carried by every value.
    pub const PAYLOAD_WORDS: usize = 8;

    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether the payload still holds the pattern written at construction.
    pub fn is_intact(&self) -> bool {
        self.payload.iter().all(|&word| word == self.id as u64)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.counter.record_drop(self.id);
    }
}

thread_local! {
    static DEFAULT_CONSTRUCTED: Cell<usize> = const { Cell::new(0) };
    static DEFAULT_ORDER: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// A `Default` value numbered in construction order on the current thread.
#[derive(Debug)]
pub struct DefaultTracked {
    seq: usize,
}

impl DefaultTracked {
    /// Clear this thread's counters.
    pub fn reset_counts() {
        DEFAULT_CONSTRUCTED.with(|c| c.set(0));
        DEFAULT_ORDER.with(|o| o.borrow_mut().clear());
    }

    pub fn constructed() -> usize {
        DEFAULT_CONSTRUCTED.with(Cell::get)
    }

    pub fn destroyed() -> usize {
        DEFAULT_ORDER.with(|o| o.borrow().len())
    }

    /// Sequence numbers of destroyed values, in destruction order.
    pub fn drop_order() -> Vec<usize> {
        DEFAULT_ORDER.with(|o| o.borrow().clone())
    }

    pub fn seq(&self) -> usize {
        self.seq
    }
}

impl Default for DefaultTracked {
    fn default() -> Self {
        let seq = DEFAULT_CONSTRUCTED.with(|c| {
            let seq = c.get();
            c.set(seq + 1);
            seq
        });
        Self { seq }
    }
}

impl Drop for DefaultTracked {
    fn drop(&mut self) {
        DEFAULT_ORDER.with(|o| o.borrow_mut().push(self.seq));
    }
}
