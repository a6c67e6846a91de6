use std::collections::HashMap;

use crate::descriptor::TensorView;
use crate::error::{Error, Result};

/// Unique identifier for a node in the graph
pub type NodeId = usize;

/// Node in the computation graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Tensors that become live at this node
    pub liveness_new: Vec<String>,
    /// Tensors whose last use is this node
    pub liveness_free: Vec<String>,
}

impl Node {
    pub fn new(
        id: NodeId,
        name: impl Into<String>,
        op_type: impl Into<String>,
        inputs: &[&str],
        outputs: &[&str],
    ) -> Self {
        Self {
            id,
            name: name.into(),
            op_type: op_type.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            liveness_new: Vec::new(),
            liveness_free: Vec::new(),
        }
    }
}

/// A function body: nodes in execution order plus the tensor views they touch
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub name: String,
    /// Nodes in execution order
    pub nodes: Vec<Node>,
    /// Tensor views by name
    pub tensors: HashMap<String, TensorView>,
    /// Size of the scratch pool, published by the layout pass
    pub temporary_pool_size: Option<usize>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Register a tensor view. Names must be unique.
    pub fn add_tensor(&mut self, view: TensorView) -> Result<()> {
        if self.tensors.contains_key(view.name()) {
            return Err(Error::InvalidGraph(format!(
                "Tensor {} is defined more than once",
                view.name()
            )));
        }
        self.tensors.insert(view.name().to_string(), view);
        Ok(())
    }

    /// Append a node at the end of the execution order and return its ID
    pub fn add_node(&mut self, name: &str, op_type: &str, inputs: &[&str], outputs: &[&str]) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node::new(id, name, op_type, inputs, outputs));
        id
    }

    pub fn tensor(&self, name: &str) -> Result<&TensorView> {
        self.tensors
            .get(name)
            .ok_or_else(|| Error::UnknownTensor(name.to_string()))
    }

    pub fn tensor_mut(&mut self, name: &str) -> Result<&mut TensorView> {
        self.tensors
            .get_mut(name)
            .ok_or_else(|| Error::UnknownTensor(name.to_string()))
    }

    /// Pool offset of a tensor, if the layout pass assigned one
    pub fn offset_of(&self, name: &str) -> Result<Option<usize>> {
        Ok(self.tensor(name)?.offset())
    }

    /// Names of graph inputs, sorted
    pub fn inputs(&self) -> Vec<&str> {
        self.persistent_names(TensorView::is_input)
    }

    /// Names of graph outputs, sorted
    pub fn outputs(&self) -> Vec<&str> {
        self.persistent_names(TensorView::is_output)
    }

    fn persistent_names(&self, pred: fn(&TensorView) -> bool) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tensors
            .values()
            .filter(|view| pred(view))
            .map(|view| view.name())
            .collect();
        names.sort_unstable();
        names
    }
}
