//! Growth policies for sizing heap blocks.
//!
//! A [`GrowthPolicy`] maps the 1-based index `k` of the heap block about to
//! be added to a multiple of the block increment (`unit`):
//!
//! | Policy | Size of block `k` |
//! |--------|-------------------|
//! | `Fixed` | `unit` |
//! | `Linear` | `(k + 1) * unit` |
//! | `Fibonacci` | `fib(k + 1) * unit` |
//! | `Exponential` | `2^k * unit` |
//!
//! Counting the head block (of size `unit`) as block 0, the first five blocks
//! of each policy are `1,1,1,1,1`, `1,2,3,4,5`, `1,1,2,3,5` and `1,2,4,8,16`
//! units. Every size saturates at a ceiling instead of overflowing.

use std::fmt;

/// Rule for sizing the next heap block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GrowthPolicy {
    /// Every block is one unit.
    Fixed,
    /// Block `k` is `k + 1` units.
    Linear,
    /// Block sizes follow the Fibonacci sequence.
    Fibonacci,
    /// Block `k` is `2^k` units.
    #[default]
    Exponential,
}

impl GrowthPolicy {
    /// Every policy, in declaration order.
    pub const ALL: [GrowthPolicy; 4] = [
        GrowthPolicy::Fixed,
        GrowthPolicy::Linear,
        GrowthPolicy::Fibonacci,
        GrowthPolicy::Exponential,
    ];

    /// Size of heap block `k` (1-based) in bytes, clamped to `ceiling`.
    ///
    /// Fibonacci uses the standard `(1, 1)` seeds; see [`BlockSizing`] for
    /// custom seeds.
    pub fn next_size(self, k: usize, unit: usize, ceiling: usize) -> usize {
        BlockSizing::new(self, unit, ceiling).next_size(k)
    }
}

impl fmt::Display for GrowthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fixed => "fixed",
            Self::Linear => "linear",
            Self::Fibonacci => "fibonacci",
            Self::Exponential => "exponential",
        };
        f.write_str(name)
    }
}

/// A growth policy bound to its unit, ceiling and Fibonacci seeds.
///
/// This is the pure sizing function the allocator consults; it holds no
/// per-allocator progress (the caller supplies `k`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockSizing {
    policy: GrowthPolicy,
    unit: usize,
    ceiling: usize,
    seeds: (usize, usize),
}

impl BlockSizing {
    /// Bind `policy` to a block increment and ceiling.
    pub fn new(policy: GrowthPolicy, unit: usize, ceiling: usize) -> Self {
        Self {
            policy,
            unit,
            ceiling,
            seeds: (1, 1),
        }
    }

    /// Start the Fibonacci sequence from `fib(1) = first`, `fib(2) = second`.
    pub fn with_seeds(mut self, first: usize, second: usize) -> Self {
        self.seeds = (first, second);
        self
    }

    /// The bound policy.
    pub fn policy(&self) -> GrowthPolicy {
        self.policy
    }

    /// The block increment.
    pub fn unit(&self) -> usize {
        self.unit
    }

    /// The largest size this sizing ever returns.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Size in bytes of heap block `k` (1-based).
    ///
    /// Returns `ceiling` whenever the raw size would exceed it or overflow,
    /// so the sequence over increasing `k` is monotonic and bounded.
    pub fn next_size(&self, k: usize) -> usize {
        self.multiplier(k)
            .and_then(|m| m.checked_mul(self.unit))
            .map_or(self.ceiling, |size| size.min(self.ceiling))
    }

    /// Sizes of heap blocks `1..`, as an endless iterator.
    pub fn sizes(self) -> impl Iterator<Item = usize> {
        (1..).map(move |k| self.next_size(k))
    }

    /// Number of units in block `k`, or `None` once it overflows `usize`.
    fn multiplier(&self, k: usize) -> Option<usize> {
        match self.policy {
            GrowthPolicy::Fixed => Some(1),
            GrowthPolicy::Linear => k.checked_add(1),
            GrowthPolicy::Exponential => {
                let shift = u32::try_from(k).ok()?;
                1usize.checked_shl(shift)
            }
            GrowthPolicy::Fibonacci => {
                // Walk to fib(k + 1). Terms outgrow any ceiling after a few
                // dozen steps, so stop as soon as the product passes it.
                let (mut a, mut b) = self.seeds;
                for _ in 0..k {
                    if a.checked_mul(self.unit)? > self.ceiling {
                        return Some(a);
                    }
                    let next = a.checked_add(b)?;
                    a = b;
                    b = next;
                }
                Some(a)
            }
        }
    }
}

/// Stateful Fibonacci block-size generator.
///
/// Each call to [`next_block_size`](Self::next_block_size) returns the next
/// Fibonacci term times the unit. Once the following term would exceed the
/// ceiling the generator stops advancing and keeps returning the last term
/// that fit, rather than the ceiling itself.
#[derive(Clone, Debug)]
pub struct FibBlockSizes {
    unit: usize,
    ceiling: usize,
    current: usize,
    next: usize,
}

impl FibBlockSizes {
    /// Fallback unit when neither size hint is non-zero.
    pub const DEFAULT_UNIT: usize = 1024;

    /// Ceiling used by [`new`](Self::new).
    pub const DEFAULT_CEILING: usize = u32::MAX as usize;

    /// Pick the unit from the first non-zero of `first_allocation_size`,
    /// `static_size`, or [`DEFAULT_UNIT`](Self::DEFAULT_UNIT).
    pub fn new(static_size: usize, first_allocation_size: usize) -> Self {
        Self::with_ceiling(static_size, first_allocation_size, Self::DEFAULT_CEILING)
    }

    /// Like [`new`](Self::new) with an explicit ceiling.
    ///
    /// # Panics
    ///
    /// Panics if the chosen unit exceeds `ceiling`.
    pub fn with_ceiling(static_size: usize, first_allocation_size: usize, ceiling: usize) -> Self {
        let unit = if first_allocation_size > 0 {
            first_allocation_size
        } else if static_size > 0 {
            static_size
        } else {
            Self::DEFAULT_UNIT
        };
        assert!(
            unit <= ceiling,
            "block unit {unit} exceeds ceiling {ceiling}"
        );
        Self {
            unit,
            ceiling,
            current: 1,
            next: 1,
        }
    }

    /// The unit every term is multiplied by.
    pub fn unit(&self) -> usize {
        self.unit
    }

    /// Return the current size and advance if the next one still fits.
    pub fn next_block_size(&mut self) -> usize {
        let result = self.current * self.unit;
        let fits = self
            .next
            .checked_mul(self.unit)
            .is_some_and(|bytes| bytes <= self.ceiling);
        if fits {
            let following = self.current.saturating_add(self.next);
            self.current = self.next;
            self.next = following;
        }
        result
    }
}

impl Iterator for FibBlockSizes {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        Some(self.next_block_size())
    }
}
