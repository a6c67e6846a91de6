pub mod liveness;
pub mod manager;
pub mod memory_layout;
pub mod topological_sort;

pub use liveness::Liveness;
pub use manager::{Pass, PassKind, PassManager, PassResult, PassStats};
pub use memory_layout::{LayoutOptions, MemoryLayout, ReusePolicy};
pub use topological_sort::TopologicalSort;
