use strum_macros::Display;
use thiserror::Error;

use crate::pass::PassKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a `free` call was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FreeFault {
    /// No block starts at the given offset
    #[strum(serialize = "no block starts at this offset")]
    NoBlockAtOffset,
    /// The block at the given offset is already free
    #[strum(serialize = "block is already free")]
    AlreadyFree,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Out of memory: no free block can hold {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("Invalid free at offset {offset}: {reason}")]
    InvalidFree { offset: usize, reason: FreeFault },

    #[error("Dependency '{dependency}' not found for pass '{pass}'")]
    MissingDependency { pass: PassKind, dependency: PassKind },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown tensor: {0}")]
    UnknownTensor(String),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Tensor '{name}' already has offset {offset}")]
    OffsetReassigned { name: String, offset: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
