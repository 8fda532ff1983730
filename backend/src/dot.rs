// dot.rs — Graphviz DOT output for backend diagnostics
//
// Two renderings for external visualization: the placed mesh (grid
// adjacency plus node-to-tile mapping and observed producer→consumer
// edges) and the partitioned stream tree (one fill color per record).
// Pure string formatting with no influence on either algorithm.
//
// Preconditions: inputs are fully constructed pass outputs.
// Postconditions: returns valid, deterministic DOT text.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use crate::flat::{FlatGraph, FlatId};
use crate::layout::{classify, live_consumers, Placement};
use crate::partition::PartitionRecord;
use crate::stream::{OpId, StreamNode};

// ── Layout rendering ────────────────────────────────────────────────────────

/// Emit the placed mesh: tile ranks, grid adjacency, and the assignment
/// with its producer→consumer edges (I/O pass-through nodes excluded).
pub fn emit_layout_dot(graph: &FlatGraph, placement: &Placement) -> String {
    let classes = classify(graph);
    let grid = &placement.grid;
    let assignment = &placement.assignment;
    let mut buf = String::new();

    writeln!(buf, "digraph layout {{").unwrap();
    writeln!(buf, "    size = \"8, 10.5\";").unwrap();
    writeln!(buf, "    node [shape=box];").unwrap();
    writeln!(buf, "    edge [arrowhead=dot, style=dotted];").unwrap();

    // One rank per mesh row, reserved I/O column included.
    for row in 0..grid.rows {
        write!(buf, "    {{rank = same;").unwrap();
        for col in 0..grid.total_cols() {
            write!(buf, " tile{row}_{col};").unwrap();
        }
        writeln!(buf, "}}").unwrap();
    }

    // Grid adjacency, one direction per link.
    for row in 0..grid.rows {
        for col in 0..grid.cols {
            let here = crate::grid::Coordinate::new(row, col);
            for n in grid.forward_neighbors(here) {
                writeln!(
                    buf,
                    "    tile{}_{} -> tile{}_{} [weight = 10000];",
                    row, col, n.row, n.col
                )
                .unwrap();
            }
        }
    }

    writeln!(buf, "    edge [color=red, arrowhead=normal, style=bold];").unwrap();

    let io_set: HashSet<FlatId> = classes.io.iter().copied().collect();
    for (node, coord) in assignment.pairs() {
        if io_set.contains(&node) {
            continue;
        }
        writeln!(
            buf,
            "    tile{}_{} [label=\"{}\"];",
            coord.row,
            coord.col,
            sanitize(&graph.node(node).name)
        )
        .unwrap();
        for dest in live_consumers(graph, &classes, node) {
            if io_set.contains(&dest) {
                continue;
            }
            if let Some(to) = assignment.tile_of(dest) {
                writeln!(
                    buf,
                    "    tile{}_{} -> tile{}_{} [weight = 1];",
                    coord.row, coord.col, to.row, to.col
                )
                .unwrap();
            }
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

// ── Partition rendering ─────────────────────────────────────────────────────

const PALETTE: [&str; 8] = [
    "lightblue",
    "lightyellow",
    "lightgreen",
    "lightsalmon",
    "plum",
    "khaki",
    "lightcyan",
    "wheat",
];

/// Emit the stream tree with one fill color per partition record.
pub fn emit_partition_dot(root: &StreamNode, records: &[PartitionRecord]) -> String {
    let mut record_of: HashMap<OpId, usize> = HashMap::new();
    for (i, rec) in records.iter().enumerate() {
        for op in &rec.members {
            record_of.insert(*op, i);
        }
    }

    let mut buf = String::new();
    writeln!(buf, "digraph partitions {{").unwrap();
    writeln!(buf, "    rankdir=TB;").unwrap();
    writeln!(buf, "    node [shape=box, style=filled, fontsize=10];").unwrap();
    emit_op_nodes(&mut buf, root, &record_of);
    emit_op_edges(&mut buf, root);
    writeln!(buf, "}}").unwrap();
    buf
}

fn op_decl(buf: &mut String, id: OpId, label: &str, record_of: &HashMap<OpId, usize>) {
    let (color, tag) = match record_of.get(&id) {
        Some(&r) => (PALETTE[r % PALETTE.len()], format!("\\np{r}")),
        None => ("white", String::new()),
    };
    writeln!(
        buf,
        "    op{} [label=\"{}{}\", fillcolor={}];",
        id.0,
        sanitize(label),
        tag,
        color
    )
    .unwrap();
}

fn emit_op_nodes(buf: &mut String, node: &StreamNode, record_of: &HashMap<OpId, usize>) {
    match node {
        StreamNode::Filter(f) => op_decl(buf, f.id, &f.name, record_of),
        StreamNode::Pipeline(p) => {
            for c in &p.children {
                emit_op_nodes(buf, c, record_of);
            }
        }
        StreamNode::SplitJoin(sj) => {
            op_decl(buf, sj.splitter.id, "split", record_of);
            for b in &sj.branches {
                emit_op_nodes(buf, b, record_of);
            }
            op_decl(buf, sj.joiner.id, "join", record_of);
        }
        StreamNode::FeedbackLoop(fl) => {
            op_decl(buf, fl.joiner.id, "join", record_of);
            emit_op_nodes(buf, &fl.body, record_of);
            op_decl(buf, fl.splitter.id, "split", record_of);
            emit_op_nodes(buf, &fl.loopback, record_of);
        }
    }
}

/// Upstream boundary operator of a subtree.
fn first_op(node: &StreamNode) -> OpId {
    match node {
        StreamNode::Filter(f) => f.id,
        StreamNode::Pipeline(p) => first_op(&p.children[0]),
        StreamNode::SplitJoin(sj) => sj.splitter.id,
        StreamNode::FeedbackLoop(fl) => fl.joiner.id,
    }
}

/// Downstream boundary operator of a subtree.
fn last_op(node: &StreamNode) -> OpId {
    match node {
        StreamNode::Filter(f) => f.id,
        StreamNode::Pipeline(p) => last_op(p.children.last().unwrap()),
        StreamNode::SplitJoin(sj) => sj.joiner.id,
        StreamNode::FeedbackLoop(fl) => fl.splitter.id,
    }
}

fn edge(buf: &mut String, from: OpId, to: OpId) {
    writeln!(buf, "    op{} -> op{};", from.0, to.0).unwrap();
}

fn emit_op_edges(buf: &mut String, node: &StreamNode) {
    match node {
        StreamNode::Filter(_) => {}
        StreamNode::Pipeline(p) => {
            for c in &p.children {
                emit_op_edges(buf, c);
            }
            for pair in p.children.windows(2) {
                edge(buf, last_op(&pair[0]), first_op(&pair[1]));
            }
        }
        StreamNode::SplitJoin(sj) => {
            for b in &sj.branches {
                edge(buf, sj.splitter.id, first_op(b));
                emit_op_edges(buf, b);
                edge(buf, last_op(b), sj.joiner.id);
            }
        }
        StreamNode::FeedbackLoop(fl) => {
            edge(buf, fl.joiner.id, first_op(&fl.body));
            emit_op_edges(buf, &fl.body);
            edge(buf, last_op(&fl.body), fl.splitter.id);
            edge(buf, fl.splitter.id, first_op(&fl.loopback));
            emit_op_edges(buf, &fl.loopback);
            edge(buf, last_op(&fl.loopback), fl.joiner.id);
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a label to characters safe inside a quoted DOT string.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat::{FlatKind, FlatNode};
    use crate::grid::XyRouter;
    use crate::layout::{place, LayoutOptions};
    use crate::partition::{partition, PartitionOptions};
    use crate::stream::{Filter, Pipeline};

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
                exec_count: 10,
                push: 1,
                pop: 1,
                item_bytes: 4,
                identity: false,
                io: None,
            })
            .collect();
        FlatGraph { nodes }
    }

    fn small_opts() -> LayoutOptions {
        LayoutOptions {
            rows: 2,
            cols: 2,
            proposals_per_temp: 20,
            max_temp_iterations: 10,
            min_temp_iterations: 10,
            calibration_trials: 10,
            ..LayoutOptions::default()
        }
    }

    fn filter(id: u32, work: u64) -> StreamNode {
        StreamNode::Filter(Filter {
            id: OpId(id),
            name: format!("f{id}"),
            work,
            pop: 1,
            push: 1,
            icode: 100,
            identity: false,
            fissable: false,
        })
    }

    #[test]
    fn layout_dot_structure() {
        let g = chain_graph(3);
        let placement = place(&g, &small_opts(), &XyRouter).unwrap();
        let dot = emit_layout_dot(&g, &placement);
        assert!(dot.starts_with("digraph layout {"));
        assert!(dot.trim_end().ends_with('}'));
        assert!(dot.contains("rank = same"));
        assert!(dot.contains("[weight = 10000]"));
        assert!(dot.contains("[weight = 1]"));
        // All three nodes are labeled somewhere on the grid.
        for name in ["n0", "n1", "n2"] {
            assert!(dot.contains(&format!("label=\"{name}\"")), "missing {name}");
        }
    }

    #[test]
    fn layout_dot_deterministic() {
        let g = chain_graph(4);
        let placement = place(&g, &small_opts(), &XyRouter).unwrap();
        let a = emit_layout_dot(&g, &placement);
        let b = emit_layout_dot(&g, &placement);
        assert_eq!(a, b);
    }

    #[test]
    fn partition_dot_colors_records() {
        let root = StreamNode::Pipeline(Pipeline {
            id: OpId(100),
            name: "pipe".into(),
            children: vec![filter(0, 10), filter(1, 10), filter(2, 10), filter(3, 10)],
        });
        let outcome = partition(
            &root,
            &PartitionOptions {
                tiles: 2,
                ..PartitionOptions::default()
            },
        )
        .outcome
        .unwrap();
        let dot = emit_partition_dot(&root, &outcome.records);
        assert!(dot.starts_with("digraph partitions {"));
        assert!(dot.contains("fillcolor=lightblue"));
        assert!(dot.contains("p0"));
        assert!(dot.contains("p1"));
        // Chain edges between the four filters.
        assert!(dot.contains("op0 -> op1;"));
        assert!(dot.contains("op2 -> op3;"));
    }
}
