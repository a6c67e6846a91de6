use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use log::debug;

use crate::error::{Error, Result};
use crate::model::Graph;
use crate::pass::manager::{timed, Pass, PassKind, PassResult};

/// Reorders the node list so producers run before their consumers.
///
/// Among ready nodes the one that came first in the original list wins, so an
/// order that is already valid is left as it is.
#[derive(Debug, Default)]
pub struct TopologicalSort;

impl TopologicalSort {
    pub fn new() -> Self {
        Self
    }

    /// Sort the graph's nodes in place, returning whether the order changed
    pub fn sort(graph: &mut Graph) -> Result<bool> {
        let node_count = graph.nodes.len();

        // Identify the producer of each tensor
        let mut tensor_producers: HashMap<&str, usize> = HashMap::new();
        for (position, node) in graph.nodes.iter().enumerate() {
            for output in node.outputs.iter().filter(|s| !s.is_empty()) {
                tensor_producers.insert(output.as_str(), position);
            }
        }

        // Build the graph edges and count in-degrees
        let mut adjacency_list: Vec<Vec<usize>> = vec![Vec::new(); node_count];
        let mut in_degree = vec![0usize; node_count];
        for (position, node) in graph.nodes.iter().enumerate() {
            for input in node.inputs.iter().filter(|s| !s.is_empty()) {
                // Tensors without a producer are external inputs
                if let Some(&producer) = tensor_producers.get(input.as_str()) {
                    adjacency_list[producer].push(position);
                    in_degree[position] += 1;
                }
            }
        }

        // Kahn's algorithm, lowest original position first
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(position, _)| Reverse(position))
            .collect();
        let mut sorted = Vec::with_capacity(node_count);

        while let Some(Reverse(position)) = ready.pop() {
            sorted.push(position);
            for &dependent in &adjacency_list[position] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if sorted.len() != node_count {
            return Err(Error::InvalidGraph(format!(
                "Graph {} contains cycles",
                graph.name
            )));
        }

        let changed = sorted.iter().enumerate().any(|(i, &position)| i != position);
        if changed {
            let mut slots: Vec<_> = std::mem::take(&mut graph.nodes)
                .into_iter()
                .map(Some)
                .collect();
            graph.nodes = sorted
                .into_iter()
                .filter_map(|position| slots[position].take())
                .collect();
        }

        debug!("sorted {} nodes of graph {}, changed: {}", node_count, graph.name, changed);
        Ok(changed)
    }
}

impl Pass for TopologicalSort {
    fn kind(&self) -> PassKind {
        PassKind::TopologicalSort
    }

    fn run(&mut self, graph: &mut Graph) -> Result<PassResult> {
        timed(PassKind::TopologicalSort, || Self::sort(graph))
    }
}
