// Property-based tests for backend invariants.
//
// Three categories:
// 1. Partition coverage: generated trees partition into disjoint,
//    complete records at every budget
// 2. Monotonicity: the bottleneck never rises with a larger budget
// 3. Placement: cost idempotence and feasibility across seeds
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use proptest::prelude::*;

use smc::flat::{FlatGraph, FlatId, FlatKind, FlatNode};
use smc::grid::{Grid, TileAssignment, XyRouter};
use smc::layout::{classify, evaluate_cost, place, verify_layout, LayoutOptions};
use smc::partition::{partition, verify_partition, PartitionOptions};
use smc::pass::StageCert;
use smc::stream::{
    validate_stream, Filter, Joiner, OpId, Pipeline, SplitJoin, Splitter, SplitterKind,
    StreamNode,
};

// ── Stream generator ────────────────────────────────────────────────────────

fn leaf(work: u64) -> StreamNode {
    StreamNode::Filter(Filter {
        id: OpId(0),
        name: "f".into(),
        work,
        pop: 1,
        push: 1,
        icode: 50 + work,
        identity: false,
        fissable: false,
    })
}

/// Small stream trees: filters, pipelines of them, and rectangular
/// splitjoins over filter branches. Ids are assigned afterwards.
fn arb_stream() -> impl Strategy<Value = StreamNode> {
    let filter = (1u64..100).prop_map(leaf);
    filter.prop_recursive(2, 12, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 2..4).prop_map(|children| {
                StreamNode::Pipeline(Pipeline {
                    id: OpId(0),
                    name: "pipe".into(),
                    children,
                })
            }),
            prop::collection::vec((1u64..100).prop_map(leaf), 2..4).prop_map(|branches| {
                let n = branches.len();
                StreamNode::SplitJoin(SplitJoin {
                    id: OpId(0),
                    name: "sj".into(),
                    splitter: Splitter {
                        id: OpId(0),
                        kind: SplitterKind::RoundRobin,
                        weights: vec![1; n],
                    },
                    branches,
                    joiner: Joiner {
                        id: OpId(0),
                        weights: vec![1; n],
                    },
                })
            }),
        ]
    })
}

/// Assign unique sequential ids across the whole tree.
fn renumber(node: &mut StreamNode, next: &mut u32) {
    let mut take = |next: &mut u32| {
        let id = OpId(*next);
        *next += 1;
        id
    };
    match node {
        StreamNode::Filter(f) => f.id = take(next),
        StreamNode::Pipeline(p) => {
            p.id = take(next);
            for c in p.children.iter_mut() {
                renumber(c, next);
            }
        }
        StreamNode::SplitJoin(sj) => {
            sj.id = take(next);
            sj.splitter.id = take(next);
            sj.joiner.id = take(next);
            for b in sj.branches.iter_mut() {
                renumber(b, next);
            }
        }
        StreamNode::FeedbackLoop(fl) => {
            fl.id = take(next);
            fl.splitter.id = take(next);
            fl.joiner.id = take(next);
            renumber(&mut fl.body, next);
            renumber(&mut fl.loopback, next);
        }
    }
}

fn numbered_stream() -> impl Strategy<Value = StreamNode> {
    arb_stream().prop_map(|mut root| {
        let mut next = 0;
        renumber(&mut root, &mut next);
        root
    })
}

// ── Flat generator ──────────────────────────────────────────────────────────

fn chain_graph(n: u32) -> FlatGraph {
    let nodes = (0..n)
        .map(|i| FlatNode {
            id: FlatId(i),
            name: format!("n{i}"),
            kind: FlatKind::Filter,
            edges: if i + 1 < n {
                vec![FlatId(i + 1)]
            } else {
                vec![]
            },
            incoming: Vec::new(),
            incoming_weights: Vec::new(),
            exec_count: 1 + i as u64,
            push: 1,
            pop: 1,
            item_bytes: 4,
            identity: false,
            io: None,
        })
        .collect();
    FlatGraph { nodes }
}

fn tiny_layout_opts(seed: u64) -> LayoutOptions {
    LayoutOptions {
        rows: 2,
        cols: 3,
        seed,
        proposals_per_temp: 10,
        max_temp_iterations: 5,
        min_temp_iterations: 5,
        calibration_trials: 8,
        ..LayoutOptions::default()
    }
}

// ── Partition properties ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

    #[test]
    fn generated_trees_are_valid(root in numbered_stream()) {
        prop_assert!(validate_stream(&root).is_empty());
    }

    #[test]
    fn partition_is_exact(root in numbered_stream(), tiles in 1u32..6) {
        let opts = PartitionOptions { tiles, ..PartitionOptions::default() };
        let result = partition(&root, &opts);
        let outcome = result.outcome.expect("valid tree must partition");
        let cert = verify_partition(&outcome, &root, tiles);
        prop_assert!(cert.all_pass(), "failed obligations: {:?}", cert.obligations());
    }

    #[test]
    fn bottleneck_never_rises_with_budget(root in numbered_stream(), tiles in 1u32..5) {
        let run = |t: u32| {
            let opts = PartitionOptions { tiles: t, ..PartitionOptions::default() };
            partition(&root, &opts).outcome.expect("must partition").bottleneck
        };
        prop_assert!(run(tiles + 1) <= run(tiles));
    }

    #[test]
    fn transform_preserves_total_work(root in numbered_stream(), tiles in 1u32..5) {
        // Fusion never changes the work sum; only fission adds its
        // per-replica overhead, and these trees are not fissable.
        let opts = PartitionOptions { tiles, transform: true, ..PartitionOptions::default() };
        let outcome = partition(&root, &opts).outcome.expect("must partition");
        let rewritten = outcome.rewritten.expect("transform requested");
        prop_assert_eq!(rewritten.total_work(), root.total_work());
    }
}

// ── Placement properties ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig { cases: 16, .. ProptestConfig::default() })]

    #[test]
    fn cost_evaluation_is_pure(
        n in 2u32..6,
        perm in Just((0usize..6).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let graph = chain_graph(n);
        let classes = classify(&graph);
        let grid = Grid::new(2, 3, false);
        let mut assignment = TileAssignment::new();
        for (i, &slot) in perm.iter().take(n as usize).enumerate() {
            assignment.assign(grid.compute_tile(slot), FlatId(i as u32));
        }
        let a = evaluate_cost(&graph, &classes, &grid, &XyRouter, &assignment).unwrap();
        let b = evaluate_cost(&graph, &classes, &grid, &XyRouter, &assignment).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn placement_is_feasible_for_any_seed(n in 2u32..6, seed in 0u64..1000) {
        let graph = chain_graph(n);
        let placement = place(&graph, &tiny_layout_opts(seed), &XyRouter).unwrap();
        let cert = verify_layout(&graph, &placement);
        prop_assert!(cert.all_pass(), "failed obligations: {:?}", cert.obligations());
        prop_assert!(placement.cost <= placement.initial_cost);
    }
}
