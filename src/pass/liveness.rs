use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::descriptor::TensorView;
use crate::error::{Error, Result};
use crate::model::{Graph, Node};
use crate::pass::manager::{timed, Pass, PassKind, PassResult};

/// Fills each node's `liveness_new` and `liveness_free` lists.
///
/// Graph inputs and outputs are persistent and never show up in either list.
#[derive(Debug, Default)]
pub struct Liveness;

impl Liveness {
    pub fn new() -> Self {
        Self
    }

    /// Compute liveness lists for every node, returning whether any list changed
    pub fn analyze(graph: &mut Graph) -> Result<bool> {
        let persistent: HashSet<String> = graph
            .inputs()
            .into_iter()
            .chain(graph.outputs())
            .map(str::to_string)
            .collect();
        let Graph { nodes, tensors, .. } = graph;
        let storage = Storage {
            tensors,
            persistent: &persistent,
        };

        check_definitions(nodes, &storage)?;

        let mut live: HashSet<&str> = HashSet::new();
        let mut lists = Vec::with_capacity(nodes.len());

        for node in nodes.iter().rev() {
            let mut new_list = Vec::new();
            let mut dead_outputs = Vec::new();
            for output in node.outputs.iter().filter(|s| !s.is_empty()) {
                if storage.is_persistent(output)? {
                    continue;
                }
                new_list.push(output.clone());
                if !live.remove(output.as_str()) {
                    // nobody reads it
                    dead_outputs.push(output.clone());
                }
            }

            let mut free_list = Vec::new();
            for input in node.inputs.iter().filter(|s| !s.is_empty()) {
                if storage.is_persistent(input)? {
                    continue;
                }
                if live.insert(input.as_str()) {
                    free_list.push(input.clone());
                }
            }
            free_list.extend(dead_outputs);

            trace!("node {}: new {:?}, free {:?}", node.name, new_list, free_list);
            lists.push((new_list, free_list));
        }

        let mut changed = false;
        for (node, (new_list, free_list)) in nodes.iter_mut().zip(lists.into_iter().rev()) {
            if node.liveness_new != new_list || node.liveness_free != free_list {
                node.liveness_new = new_list;
                node.liveness_free = free_list;
                changed = true;
            }
        }

        debug!("liveness computed for {} nodes, changed: {}", nodes.len(), changed);
        Ok(changed)
    }
}

/// Where a tensor lives: caller-owned buffers for graph inputs and outputs,
/// the scratch pool for everything else
struct Storage<'a> {
    tensors: &'a HashMap<String, TensorView>,
    persistent: &'a HashSet<String>,
}

impl Storage<'_> {
    fn is_persistent(&self, name: &str) -> Result<bool> {
        if !self.tensors.contains_key(name) {
            return Err(Error::UnknownTensor(name.to_string()));
        }
        Ok(self.persistent.contains(name))
    }
}

/// Every temporary must be produced once, before anything reads it
fn check_definitions(nodes: &[Node], storage: &Storage<'_>) -> Result<()> {
    let mut defined: HashSet<&str> = HashSet::new();
    for node in nodes.iter() {
        for input in node.inputs.iter().filter(|s| !s.is_empty()) {
            if !storage.is_persistent(input)? && !defined.contains(input.as_str()) {
                return Err(Error::InvalidGraph(format!(
                    "Tensor {} is read by node {} before it is produced",
                    input, node.name
                )));
            }
        }
        for output in node.outputs.iter().filter(|s| !s.is_empty()) {
            if !storage.is_persistent(output)? && !defined.insert(output.as_str()) {
                return Err(Error::InvalidGraph(format!(
                    "Tensor {} is produced more than once",
                    output
                )));
            }
        }
    }
    Ok(())
}

impl Pass for Liveness {
    fn kind(&self) -> PassKind {
        PassKind::Liveness
    }

    fn dependencies(&self) -> &'static [PassKind] {
        &[PassKind::TopologicalSort]
    }

    fn run(&mut self, graph: &mut Graph) -> Result<PassResult> {
        timed(PassKind::Liveness, || Self::analyze(graph))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ElementType;

    fn view(name: &str) -> TensorView {
        TensorView::new(name, ElementType::Float32, &[16]).unwrap()
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// x -> a -> b -> y, plus a side branch a -> c that nobody reads
    fn chain() -> Graph {
        let mut graph = Graph::new("chain");
        graph.add_tensor(view("x").as_input()).unwrap();
        graph.add_tensor(view("a")).unwrap();
        graph.add_tensor(view("b")).unwrap();
        graph.add_tensor(view("c")).unwrap();
        graph.add_tensor(view("y").as_output()).unwrap();
        graph.add_node("n0", "Relu", &["x"], &["a"]);
        graph.add_node("n1", "Split", &["a"], &["b", "c"]);
        graph.add_node("n2", "Add", &["b", "b"], &["y"]);
        graph
    }

    #[test]
    fn test_chain_liveness() {
        let mut graph = chain();
        assert!(Liveness::analyze(&mut graph).unwrap());

        assert_eq!(graph.nodes[0].liveness_new, strings(&["a"]));
        assert!(graph.nodes[0].liveness_free.is_empty());

        assert_eq!(graph.nodes[1].liveness_new, strings(&["b", "c"]));
        assert_eq!(graph.nodes[1].liveness_free, strings(&["a", "c"]));

        assert!(graph.nodes[2].liveness_new.is_empty());
        assert_eq!(graph.nodes[2].liveness_free, strings(&["b"]));
    }

    #[test]
    fn test_rerun_is_stable() {
        let mut graph = chain();
        assert!(Liveness::analyze(&mut graph).unwrap());
        assert!(!Liveness::analyze(&mut graph).unwrap());
    }

    #[test]
    fn test_every_temporary_born_once() {
        let mut graph = chain();
        Liveness::analyze(&mut graph).unwrap();
        let mut born: Vec<&String> = graph.nodes.iter().flat_map(|n| &n.liveness_new).collect();
        let mut died: Vec<&String> = graph.nodes.iter().flat_map(|n| &n.liveness_free).collect();
        born.sort();
        died.sort();
        assert_eq!(born, died);
        assert_eq!(born.len(), 3);
    }

    #[test]
    fn test_invalid_graphs() {
        let mut graph = Graph::new("bad");
        graph.add_tensor(view("t")).unwrap();
        graph.add_node("n0", "Relu", &["t"], &["t2"]);
        assert!(matches!(Liveness::analyze(&mut graph), Err(Error::InvalidGraph(_))));

        let mut graph = Graph::new("twice");
        graph.add_tensor(view("x").as_input()).unwrap();
        graph.add_tensor(view("t")).unwrap();
        graph.add_node("n0", "Relu", &["x"], &["t"]);
        graph.add_node("n1", "Relu", &["x"], &["t"]);
        assert!(matches!(Liveness::analyze(&mut graph), Err(Error::InvalidGraph(_))));

        let mut graph = Graph::new("unknown");
        graph.add_tensor(view("x").as_input()).unwrap();
        graph.add_node("n0", "Relu", &["x"], &["missing"]);
        assert!(matches!(Liveness::analyze(&mut graph), Err(Error::UnknownTensor(_))));
    }

    #[test]
    fn test_needs_sorted_nodes() {
        let pass = Liveness::new();
        assert_eq!(pass.dependencies(), &[PassKind::TopologicalSort]);

        let err = pass.check_prerequisites(&HashSet::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingDependency {
                pass: PassKind::Liveness,
                dependency: PassKind::TopologicalSort
            }
        ));
        assert!(pass
            .check_prerequisites(&HashSet::from([PassKind::TopologicalSort]))
            .is_ok());
    }
}
