//! Workload generators for the Strata benchmarks.
//!
//! - [`request_mix`]: deterministic `(align, size)` requests shaped like a
//!   compiler's node allocations (mostly small, occasionally large).
//! - [`fill_allocator`]: drive a [`BlockAllocator`] through a request mix.
//! - [`lifo_churn`]: push/pop a stack of tail allocations.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use strata_block::{BlockAllocator, ByteRange};

/// A single allocation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    /// Payload alignment (power of two).
    pub align: usize,
    /// Payload size in bytes.
    pub size: usize,
}

/// Generate `n` deterministic requests from `seed`.
///
/// Roughly one request in 32 is large (1-4 KiB); the rest are 8-128 bytes
/// with 1-16 byte alignment.
pub fn request_mix(n: usize, seed: u64) -> Vec<Request> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let bits = state >> 33;
            let align = 1usize << (bits % 5);
            let size = if bits % 32 == 0 {
                1024 + (bits as usize >> 5) % 3072
            } else {
                8 + (bits as usize >> 5) % 121
            };
            Request { align, size }
        })
        .collect()
}

/// Allocate every request in order, returning the total payload bytes.
pub fn fill_allocator(alloc: &mut BlockAllocator<'_>, requests: &[Request]) -> usize {
    requests
        .iter()
        .map(|req| alloc.allocate(req.align, 0, req.size).len())
        .sum()
}

/// Push `depth` tail allocations of `size` bytes, then release them all in
/// reverse order. Returns how many releases succeeded.
pub fn lifo_churn(alloc: &mut BlockAllocator<'_>, depth: usize, size: usize) -> usize {
    let ranges: Vec<ByteRange> = (0..depth).map(|_| alloc.allocate(8, 0, size)).collect();
    ranges.iter().rev().filter(|range| alloc.release(range)).count()
}
