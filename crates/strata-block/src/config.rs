//! Block allocator configuration parameters.

use crate::error::BlockError;
use crate::growth::{BlockSizing, GrowthPolicy};

/// Configuration for a [`BlockAllocator`](crate::BlockAllocator).
///
/// Controls head-block capacity and heap-block growth. Validated at
/// construction; all values are immutable after creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockAllocatorConfig {
    /// How heap block sizes grow as blocks are added.
    pub policy: GrowthPolicy,

    /// Usable bytes in the head block.
    pub head_capacity: usize,

    /// Growth unit for heap blocks.
    ///
    /// `None` means "same as `head_capacity`", falling back to
    /// [`DEFAULT_BLOCK_INCREMENT`](Self::DEFAULT_BLOCK_INCREMENT) when the
    /// head block is empty.
    pub block_increment: Option<usize>,

    /// Largest heap block the growth policy will request.
    ///
    /// A single allocation larger than this still gets a block of its own.
    /// Default: 512MB.
    pub max_block_size: usize,

    /// First two Fibonacci terms, used by [`GrowthPolicy::Fibonacci`].
    pub fibonacci_seeds: (usize, usize),
}

impl BlockAllocatorConfig {
    /// Block increment used when neither it nor the head capacity is set.
    pub const DEFAULT_BLOCK_INCREMENT: usize = 1024;

    /// Default growth ceiling: 512MB.
    pub const DEFAULT_MAX_BLOCK_SIZE: usize = 1 << 29;

    /// Create a config with the given policy and head capacity.
    ///
    /// Uses default values for all other parameters.
    pub fn new(policy: GrowthPolicy, head_capacity: usize) -> Self {
        Self {
            policy,
            head_capacity,
            block_increment: None,
            max_block_size: Self::DEFAULT_MAX_BLOCK_SIZE,
            fibonacci_seeds: (1, 1),
        }
    }

    /// Set an explicit growth unit, independent of the head capacity.
    pub fn with_block_increment(mut self, bytes: usize) -> Self {
        self.block_increment = Some(bytes);
        self
    }

    /// Set the growth ceiling.
    pub fn with_max_block_size(mut self, bytes: usize) -> Self {
        self.max_block_size = bytes;
        self
    }

    /// Set the first two Fibonacci terms.
    pub fn with_fibonacci_seeds(mut self, first: usize, second: usize) -> Self {
        self.fibonacci_seeds = (first, second);
        self
    }

    /// The effective growth unit.
    pub fn unit(&self) -> usize {
        match self.block_increment {
            Some(bytes) => bytes,
            None if self.head_capacity > 0 => self.head_capacity,
            None => Self::DEFAULT_BLOCK_INCREMENT,
        }
    }

    /// The sizing function heap blocks are drawn from.
    pub fn sizing(&self) -> BlockSizing {
        let (first, second) = self.fibonacci_seeds;
        BlockSizing::new(self.policy, self.unit(), self.max_block_size).with_seeds(first, second)
    }

    /// Check that the parameters describe a usable allocator.
    pub fn validate(&self) -> Result<(), BlockError> {
        let unit = self.unit();
        let reason = if unit == 0 {
            "block_increment must be non-zero".to_string()
        } else if self.max_block_size == 0 {
            "max_block_size must be non-zero".to_string()
        } else if unit > self.max_block_size {
            format!(
                "block increment {unit} exceeds max_block_size {}",
                self.max_block_size
            )
        } else if self.max_block_size > isize::MAX as usize {
            format!("max_block_size {} exceeds isize::MAX", self.max_block_size)
        } else if self.fibonacci_seeds.0 == 0 || self.fibonacci_seeds.1 == 0 {
            "fibonacci seeds must be non-zero".to_string()
        } else {
            return Ok(());
        };
        Err(BlockError::InvalidConfig { reason })
    }
}

impl Default for BlockAllocatorConfig {
    fn default() -> Self {
        Self::new(GrowthPolicy::default(), 0)
    }
}
