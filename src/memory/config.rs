use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};

/// Default alignment quantum in bytes (one 512-bit vector register)
pub const DEFAULT_ALIGNMENT: usize = 64;

/// How the allocator picks a free block for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AllocationStrategy {
    /// Lowest-offset free block that is large enough
    FirstFit,
    /// Free block with the least leftover space, earliest offset on ties
    BestFit,
}

impl Default for AllocationStrategy {
    fn default() -> Self {
        AllocationStrategy::BestFit
    }
}

/// Total extent of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolCapacity {
    /// Open-ended arena; the high-water mark becomes the buffer size
    Unbounded,
    /// Hard limit in bytes
    Fixed(usize),
}

impl Default for PoolCapacity {
    fn default() -> Self {
        PoolCapacity::Unbounded
    }
}

impl fmt::Display for PoolCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolCapacity::Unbounded => write!(f, "unbounded"),
            PoolCapacity::Fixed(bytes) => write!(f, "{}", bytes),
        }
    }
}

impl FromStr for PoolCapacity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(PoolCapacity::Unbounded);
        }
        s.parse::<usize>()
            .map(PoolCapacity::Fixed)
            .map_err(|e| Error::InvalidConfig(format!("Invalid pool capacity '{}': {}", s, e)))
    }
}

/// Construction-time settings of a `MemoryManager`.
///
/// All fields are fixed once the manager is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Alignment quantum in bytes; every request is rounded up to a multiple of it
    pub alignment: usize,
    /// Block selection strategy
    pub strategy: AllocationStrategy,
    /// Pool extent
    pub capacity: PoolCapacity,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
            strategy: AllocationStrategy::default(),
            capacity: PoolCapacity::default(),
        }
    }
}

impl PoolConfig {
    /// Create a new pool config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the alignment quantum
    pub fn set_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set the allocation strategy
    pub fn set_strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the pool capacity
    pub fn set_capacity(mut self, capacity: PoolCapacity) -> Self {
        self.capacity = capacity;
        self
    }

    /// Parse a config from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PoolConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the settings describe a usable pool
    pub fn validate(&self) -> Result<()> {
        if self.alignment == 0 {
            return Err(Error::InvalidConfig(
                "Alignment quantum must be a positive number of bytes".to_string(),
            ));
        }
        if let PoolCapacity::Fixed(0) = self.capacity {
            return Err(Error::InvalidConfig(
                "Fixed pool capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
