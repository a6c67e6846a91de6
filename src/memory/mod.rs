pub mod config;
pub mod manager;

pub use config::{
    AllocationStrategy,
    PoolCapacity,
    PoolConfig,
    DEFAULT_ALIGNMENT,
};

pub use manager::{
    MemoryManager,
    BlockInfo,
    BlockState,
    Extent,
    PoolReport,
};
