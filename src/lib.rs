pub mod descriptor;
pub mod error;
pub mod memory;
pub mod model;
pub mod pass;

// Re-export commonly used types
pub use descriptor::{ElementType, TensorView};
pub use error::{Error, FreeFault, Result};
pub use memory::{AllocationStrategy, MemoryManager, PoolCapacity, PoolConfig, PoolReport};
pub use model::{Graph, Node, NodeId};
pub use pass::{
    LayoutOptions, Liveness, MemoryLayout, Pass, PassKind, PassManager, PassResult, PassStats,
    ReusePolicy, TopologicalSort,
};
