use buffer_layout::{
    AllocationStrategy, ElementType, Error, Graph, LayoutOptions, Liveness, MemoryLayout, Pass,
    PassKind, PassManager, ReusePolicy, TensorView, TopologicalSort,
};
use std::collections::{HashMap, HashSet};

fn tensor(name: &str, shape: &[usize]) -> TensorView {
    TensorView::new(name, ElementType::Float32, shape).unwrap()
}

// Helper to create a diamond-shaped graph with its nodes deliberately out of order
//
//   x -> conv -> a -> relu    -> b -> add -> d -> mul -> y
//                 \-> sigmoid -> c ---/            /
//                  \------------------------------/
fn create_diamond_graph() -> Graph {
    let mut graph = Graph::new("diamond");
    graph.add_tensor(tensor("x", &[1, 3, 32, 32]).as_input()).unwrap();
    graph.add_tensor(tensor("w", &[8, 3, 3, 3]).as_input()).unwrap();
    graph.add_tensor(tensor("a", &[1, 8, 32, 32])).unwrap();
    graph.add_tensor(tensor("b", &[1, 8, 32, 32])).unwrap();
    graph.add_tensor(tensor("c", &[1, 8, 32, 32])).unwrap();
    graph.add_tensor(tensor("d", &[1, 8, 32, 32])).unwrap();
    graph.add_tensor(tensor("y", &[1, 8, 32, 32]).as_output()).unwrap();

    graph.add_node("add", "Add", &["b", "c"], &["d"]);
    graph.add_node("mul", "Mul", &["d", "a"], &["y"]);
    graph.add_node("conv", "Conv", &["x", "w"], &["a"]);
    graph.add_node("sigmoid", "Sigmoid", &["a"], &["c"]);
    graph.add_node("relu", "Relu", &["a"], &["b"]);
    graph
}

fn standard_pipeline(options: LayoutOptions) -> PassManager {
    let mut manager = PassManager::new();
    // Registered out of order on purpose
    manager.register_pass(Box::new(MemoryLayout::new(options).unwrap()));
    manager.register_pass(Box::new(Liveness::new()));
    manager.register_pass(Box::new(TopologicalSort::new()));
    manager
}

/// Position range, inclusive, over which each temporary is live
fn live_ranges(graph: &Graph) -> HashMap<String, (usize, usize)> {
    let mut ranges = HashMap::new();
    for (position, node) in graph.nodes.iter().enumerate() {
        for name in &node.liveness_new {
            ranges.insert(name.clone(), (position, position));
        }
        for name in &node.liveness_free {
            ranges.get_mut(name).unwrap().1 = position;
        }
    }
    ranges
}

fn assert_no_conflicts(graph: &Graph, alignment: usize) {
    let ranges = live_ranges(graph);
    let names: Vec<&String> = ranges.keys().collect();
    for (i, first) in names.iter().enumerate() {
        for second in &names[i + 1..] {
            let (a_start, a_end) = ranges[*first];
            let (b_start, b_end) = ranges[*second];
            if a_end < b_start || b_end < a_start {
                continue;
            }

            let a = graph.tensor(first).unwrap();
            let b = graph.tensor(second).unwrap();
            let a_offset = a.offset().unwrap();
            let b_offset = b.offset().unwrap();
            assert_eq!(a_offset % alignment, 0);
            let disjoint = a_offset + a.size_bytes() <= b_offset
                || b_offset + b.size_bytes() <= a_offset;
            assert!(disjoint, "{} and {} are live together but overlap", first, second);
        }
    }
}

#[test]
fn test_full_pipeline() {
    let mut graph = create_diamond_graph();
    let mut manager = standard_pipeline(LayoutOptions::new());

    let stats = manager.run_passes(&mut graph).unwrap();
    let order: Vec<&str> = stats.pass_results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(order, vec!["TopologicalSort", "Liveness", "MemoryLayout"]);
    assert!(stats.pass_results.iter().all(|r| r.changed));
    assert_eq!(manager.executed().len(), 3);

    let names: Vec<&str> = graph.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["conv", "sigmoid", "relu", "add", "mul"]);

    // Temporaries get offsets, inputs and outputs stay outside the pool
    for name in ["a", "b", "c", "d"] {
        assert!(graph.offset_of(name).unwrap().is_some(), "{} has no offset", name);
    }
    for name in ["x", "w", "y"] {
        assert_eq!(graph.offset_of(name).unwrap(), None);
    }

    assert_no_conflicts(&graph, 64);

    let pool_size = graph.temporary_pool_size.unwrap();
    for name in ["a", "b", "c", "d"] {
        let view = graph.tensor(name).unwrap();
        assert!(view.offset().unwrap() + view.size_bytes() <= pool_size);
    }
    // a, b and c are live together at add; d cannot reuse b or c until mul
    assert_eq!(pool_size, 4 * 32 * 1024);
}

#[test]
fn test_same_node_reuse_lowers_peak() {
    let mut next_node = create_diamond_graph();
    standard_pipeline(LayoutOptions::new())
        .run_passes(&mut next_node)
        .unwrap();

    let mut same_node = create_diamond_graph();
    standard_pipeline(LayoutOptions::new().set_reuse_policy(ReusePolicy::SameNode))
        .run_passes(&mut same_node)
        .unwrap();

    assert!(same_node.temporary_pool_size.unwrap() < next_node.temporary_pool_size.unwrap());
    // d overwrites one of its dying inputs
    let d = same_node.offset_of("d").unwrap();
    assert!(d == same_node.offset_of("b").unwrap() || d == same_node.offset_of("c").unwrap());
}

#[test]
fn test_strategies_agree_on_simple_chain() {
    for strategy in [AllocationStrategy::FirstFit, AllocationStrategy::BestFit] {
        let mut graph = Graph::new("chain");
        graph.add_tensor(tensor("x", &[256]).as_input()).unwrap();
        graph.add_tensor(tensor("y", &[256]).as_output()).unwrap();
        let mut previous = "x".to_string();
        for i in 0..6 {
            let name = format!("t{}", i);
            graph.add_tensor(tensor(&name, &[256])).unwrap();
            graph.add_node(&format!("n{}", i), "Relu", &[previous.as_str()], &[name.as_str()]);
            previous = name;
        }
        graph.add_node("last", "Relu", &[previous.as_str()], &["y"]);

        let options = LayoutOptions::new().set_strategy(strategy);
        standard_pipeline(options).run_passes(&mut graph).unwrap();

        // Two 1 KiB buffers ping-pong down the chain
        assert_eq!(graph.temporary_pool_size, Some(2048));
        assert_eq!(graph.offset_of("t0").unwrap(), Some(0));
        assert_eq!(graph.offset_of("t1").unwrap(), Some(1024));
        assert_eq!(graph.offset_of("t2").unwrap(), Some(0));
        assert_no_conflicts(&graph, 64);
    }
}

#[test]
fn test_layout_without_liveness_fails_early() {
    let mut graph = create_diamond_graph();
    let mut manager = PassManager::new();
    manager.register_pass(Box::new(TopologicalSort::new()));
    manager.register_pass(Box::new(MemoryLayout::with_alignment(64).unwrap()));

    let err = manager.run_passes(&mut graph).unwrap_err();
    assert!(matches!(
        err,
        Error::MissingDependency {
            pass: PassKind::MemoryLayout,
            dependency: PassKind::Liveness
        }
    ));
    assert!(graph.tensors.values().all(|t| t.offset().is_none()));
    assert_eq!(graph.temporary_pool_size, None);
}

#[test]
fn test_gate_ignores_unrelated_passes() {
    let pass = MemoryLayout::with_alignment(64).unwrap();
    let executed: HashSet<PassKind> = [PassKind::Liveness, PassKind::MemoryLayout].into_iter().collect();
    assert!(pass.check_prerequisites(&executed).is_ok());
    assert!(pass.check_prerequisites(&HashSet::from([PassKind::TopologicalSort])).is_err());
}

#[test]
fn test_second_pipeline_run_is_a_fixed_point() -> anyhow::Result<()> {
    let mut graph = create_diamond_graph();
    let mut manager = standard_pipeline(LayoutOptions::new());
    manager.run_passes(&mut graph)?;
    let pool_size = graph.temporary_pool_size;

    let stats = manager.run_passes(&mut graph)?;
    assert!(!stats.changed());
    assert_eq!(graph.temporary_pool_size, pool_size);
    Ok(())
}

#[test]
fn test_cyclic_graph_is_rejected() {
    let mut graph = Graph::new("cycle");
    graph.add_tensor(tensor("p", &[4])).unwrap();
    graph.add_tensor(tensor("q", &[4])).unwrap();
    graph.add_node("n0", "Relu", &["q"], &["p"]);
    graph.add_node("n1", "Relu", &["p"], &["q"]);

    let mut manager = standard_pipeline(LayoutOptions::new());
    let err = manager.run_passes(&mut graph).unwrap_err();
    assert!(matches!(err, Error::InvalidGraph(ref msg) if msg.contains("contains cycles")));
    // The sort fails first, so nothing else runs
    assert!(manager.executed().is_empty());
    assert!(graph.nodes.iter().all(|n| n.liveness_new.is_empty()));
}

#[test]
fn test_growing_a_laid_out_graph_is_rejected() {
    let mut graph = Graph::new("grow");
    graph.add_tensor(tensor("x", &[16]).as_input()).unwrap();
    graph.add_tensor(tensor("a", &[16])).unwrap();
    graph.add_tensor(tensor("y", &[16]).as_output()).unwrap();
    graph.add_node("n0", "Relu", &["x"], &["a"]);
    graph.add_node("n1", "Relu", &["a"], &["y"]);

    let mut manager = standard_pipeline(LayoutOptions::new());
    manager.run_passes(&mut graph).unwrap();
    assert_eq!(graph.offset_of("a").unwrap(), Some(0));

    // z is live alongside a, but a's offset is already fixed
    graph.add_tensor(tensor("z", &[16])).unwrap();
    graph.nodes[0].outputs.push("z".to_string());
    graph.nodes[1].inputs.push("z".to_string());

    let err = manager.run_passes(&mut graph).unwrap_err();
    assert!(matches!(err, Error::InvalidGraph(ref msg) if msg.contains("partially laid out")));
    assert_eq!(graph.offset_of("a").unwrap(), Some(0));
    assert_eq!(graph.offset_of("z").unwrap(), None);
    assert_eq!(graph.temporary_pool_size, Some(64));
}
