use std::collections::{HashMap, HashSet};

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::descriptor::TensorView;
use crate::error::{Error, FreeFault, Result};
use crate::memory::{AllocationStrategy, MemoryManager, PoolCapacity, PoolConfig, PoolReport};
use crate::model::{Graph, Node};
use crate::pass::manager::{timed, Pass, PassKind, PassResult};

/// When space released at a node becomes available again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReusePolicy {
    /// Outputs of a node are placed before its dying inputs are released
    NextNode,
    /// Dying inputs are released first, so a node's outputs may overwrite them.
    /// Gives lower peaks, but kernels must tolerate aliased inputs and outputs.
    SameNode,
}

impl Default for ReusePolicy {
    fn default() -> Self {
        ReusePolicy::NextNode
    }
}

/// Options for the layout pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOptions {
    /// Settings for the pool each run lays tensors out in
    pub pool: PoolConfig,
    /// Reuse timing for freed space
    pub reuse: ReusePolicy,
}

impl LayoutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the alignment quantum
    pub fn set_alignment(mut self, alignment: usize) -> Self {
        self.pool.alignment = alignment;
        self
    }

    /// Set the allocation strategy
    pub fn set_strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.pool.strategy = strategy;
        self
    }

    /// Set the pool capacity
    pub fn set_capacity(mut self, capacity: PoolCapacity) -> Self {
        self.pool.capacity = capacity;
        self
    }

    /// Set the reuse policy
    pub fn set_reuse_policy(mut self, reuse: ReusePolicy) -> Self {
        self.reuse = reuse;
        self
    }

    /// Parse options from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let options: LayoutOptions = serde_json::from_str(json)?;
        options.pool.validate()?;
        Ok(options)
    }
}

/// Assigns every temporary tensor an offset in one shared scratch pool.
///
/// Walks the nodes in execution order, placing tensors as they become live and
/// releasing them at their last use, as given by each node's liveness lists.
#[derive(Debug)]
pub struct MemoryLayout {
    options: LayoutOptions,
    last_report: Option<PoolReport>,
}

impl MemoryLayout {
    pub fn new(options: LayoutOptions) -> Result<Self> {
        options.pool.validate()?;
        Ok(Self {
            options,
            last_report: None,
        })
    }

    /// Default options with the given alignment quantum
    pub fn with_alignment(alignment: usize) -> Result<Self> {
        Self::new(LayoutOptions::new().set_alignment(alignment))
    }

    pub fn options(&self) -> &LayoutOptions {
        &self.options
    }

    /// Pool state at the end of the most recent run that laid anything out
    pub fn last_report(&self) -> Option<&PoolReport> {
        self.last_report.as_ref()
    }

    /// Lay out the graph's tensors, returning whether any offset was assigned.
    ///
    /// Layout is all or nothing: a graph whose temporaries all carry offsets is
    /// left untouched, and one where only some do is rejected. On error the
    /// graph must be discarded.
    pub fn run_on_graph(&mut self, graph: &mut Graph) -> Result<bool> {
        let Graph {
            name,
            nodes,
            tensors,
            temporary_pool_size,
        } = graph;

        let (temporaries, laid_out) = count_laid_out(nodes, tensors)?;
        if laid_out > 0 {
            if laid_out == temporaries {
                debug!("graph {} is already laid out", name);
                return Ok(false);
            }
            return Err(Error::InvalidGraph(format!(
                "Graph {} is partially laid out: {} of {} temporaries already have offsets",
                name, laid_out, temporaries
            )));
        }

        let mut walk = LayoutWalk {
            manager: MemoryManager::new(self.options.pool.clone())?,
            tensors,
            placed: HashSet::new(),
            released: HashSet::new(),
            changed: false,
        };

        for node in nodes.iter() {
            trace!("laying out node {} ({})", node.name, node.op_type);
            match self.options.reuse {
                ReusePolicy::NextNode => {
                    walk.place_all(node)?;
                    walk.release_all(node, |_| true)?;
                }
                ReusePolicy::SameNode => {
                    let born_here: HashSet<&str> =
                        node.liveness_new.iter().map(String::as_str).collect();
                    walk.release_all(node, |name| !born_here.contains(name))?;
                    walk.place_all(node)?;
                    walk.release_all(node, |name| born_here.contains(name))?;
                }
            }
        }

        let high_water_mark = walk.manager.high_water_mark();
        if walk.changed {
            *temporary_pool_size = Some(high_water_mark);
        }
        info!(
            "memory layout of {}: {} tensors placed, pool high water {} bytes",
            name, temporaries, high_water_mark
        );

        let changed = walk.changed;
        self.last_report = Some(walk.manager.report());
        Ok(changed)
    }
}

/// Distinct temporaries born somewhere in the graph, and how many of them
/// already carry an offset
fn count_laid_out(nodes: &[Node], tensors: &HashMap<String, TensorView>) -> Result<(usize, usize)> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut laid_out = 0;
    for name in nodes.iter().flat_map(|node| &node.liveness_new) {
        let view = tensors
            .get(name)
            .ok_or_else(|| Error::UnknownTensor(name.clone()))?;
        if seen.insert(name.as_str()) && view.offset().is_some() {
            laid_out += 1;
        }
    }
    Ok((seen.len(), laid_out))
}

/// State of one walk over the node list
struct LayoutWalk<'a> {
    manager: MemoryManager,
    tensors: &'a mut HashMap<String, TensorView>,
    /// Placed in this run and still live
    placed: HashSet<String>,
    /// Placed in this run and already released
    released: HashSet<String>,
    changed: bool,
}

impl LayoutWalk<'_> {
    fn place_all(&mut self, node: &Node) -> Result<()> {
        for name in &node.liveness_new {
            let view = self
                .tensors
                .get_mut(name)
                .ok_or_else(|| Error::UnknownTensor(name.clone()))?;

            let offset = self.manager.allocate(view.size_bytes())?;
            view.set_offset(offset)?;
            debug!(
                "tensor {} ({} {:?}, {} bytes) placed at offset {}",
                name,
                view.element_type(),
                view.shape(),
                view.size_bytes(),
                offset
            );

            self.placed.insert(name.clone());
            self.changed = true;
        }
        Ok(())
    }

    fn release_all<F>(&mut self, node: &Node, select: F) -> Result<()>
    where
        F: Fn(&str) -> bool,
    {
        for name in node.liveness_free.iter().filter(|name| select(name)) {
            let view = self
                .tensors
                .get(name)
                .ok_or_else(|| Error::UnknownTensor(name.clone()))?;

            match view.offset() {
                Some(offset) if self.placed.remove(name) => {
                    self.manager.free(offset)?;
                    self.released.insert(name.clone());
                    debug!("tensor {} released at node {}", name, node.name);
                }
                Some(offset) if self.released.contains(name) => {
                    return Err(Error::InvalidFree {
                        offset,
                        reason: FreeFault::AlreadyFree,
                    });
                }
                _ => {
                    return Err(Error::InvalidGraph(format!(
                        "Tensor {} dies at node {} before it is live",
                        name, node.name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Pass for MemoryLayout {
    fn kind(&self) -> PassKind {
        PassKind::MemoryLayout
    }

    fn dependencies(&self) -> &'static [PassKind] {
        &[PassKind::Liveness]
    }

    fn run(&mut self, graph: &mut Graph) -> Result<PassResult> {
        timed(PassKind::MemoryLayout, || self.run_on_graph(graph))
    }
}
