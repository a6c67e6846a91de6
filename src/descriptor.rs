use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};

/// Element types a tensor view can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ElementType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float16,
    BFloat16,
    Float32,
    Float64,
}

impl ElementType {
    /// Size of one element in bytes
    pub fn size_in_bytes(&self) -> usize {
        match self {
            ElementType::Bool | ElementType::Int8 | ElementType::Uint8 => 1,
            ElementType::Int16
            | ElementType::Uint16
            | ElementType::Float16
            | ElementType::BFloat16 => 2,
            ElementType::Int32 | ElementType::Uint32 | ElementType::Float32 => 4,
            ElementType::Int64 | ElementType::Uint64 | ElementType::Float64 => 8,
        }
    }
}

/// A tensor view the layout pass assigns a pool offset to.
///
/// The offset starts unset and can be written exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorView {
    name: String,
    element_type: ElementType,
    shape: Vec<usize>,
    size_bytes: usize,
    offset: Option<usize>,
    is_input: bool,
    is_output: bool,
}

impl TensorView {
    /// Create a tensor view, computing its size from shape and element type
    pub fn new(name: impl Into<String>, element_type: ElementType, shape: &[usize]) -> Result<Self> {
        let name = name.into();
        let size_bytes = shape
            .iter()
            .try_fold(element_type.size_in_bytes(), |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| {
                Error::InvalidGraph(format!(
                    "Integer overflow calculating size for tensor {} with shape {:?}",
                    name, shape
                ))
            })?;

        Ok(Self {
            name,
            element_type,
            shape: shape.to_vec(),
            size_bytes,
            offset: None,
            is_input: false,
            is_output: false,
        })
    }

    /// Mark this view as a graph input
    pub fn as_input(mut self) -> Self {
        self.is_input = true;
        self
    }

    /// Mark this view as a graph output
    pub fn as_output(mut self) -> Self {
        self.is_output = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Logical size in bytes, before pool alignment
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn is_input(&self) -> bool {
        self.is_input
    }

    pub fn is_output(&self) -> bool {
        self.is_output
    }

    /// Pool-relative offset, once assigned
    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// Record the pool offset. Fails if one was already recorded.
    pub fn set_offset(&mut self, offset: usize) -> Result<()> {
        if let Some(existing) = self.offset {
            return Err(Error::OffsetReassigned {
                name: self.name.clone(),
                offset: existing,
            });
        }
        self.offset = Some(offset);
        Ok(())
    }
}
