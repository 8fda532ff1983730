// rewrite.rs — Stream tree rewriting: fusion, fission, identity cleanup
//
// Rebuilds the stream tree to match a partition: fused regions become
// single filters, fissed filters become round-robin SplitJoins of
// replicas, and the result is normalized by dropping redundant identity
// filters and flattening nested pipelines. All transforms are owned-tree
// rebuilds; the returned root has no parent by construction.
//
// Preconditions: records were produced by the partitioner for this tree.
// Postconditions: rewritten work totals match the partition's estimates.
// Failure modes: none (pure rebuilding).
// Side effects: none.

use std::collections::HashMap;

use crate::partition::{PartitionRecord, FISSION_OVERHEAD};
use crate::stream::{
    Filter, Joiner, OpId, Pipeline, SplitJoin, Splitter, SplitterKind, StreamNode,
};

// ── Id allocation ───────────────────────────────────────────────────────────

/// Hands out ids above everything already present in the tree, so fused
/// and fissed nodes never collide with original operators.
struct IdAlloc {
    next: u32,
}

impl IdAlloc {
    fn new(root: &StreamNode) -> Self {
        IdAlloc {
            next: max_id(root) + 1,
        }
    }

    fn alloc(&mut self) -> OpId {
        let id = OpId(self.next);
        self.next += 1;
        id
    }
}

fn max_id(node: &StreamNode) -> u32 {
    match node {
        StreamNode::Filter(f) => f.id.0,
        StreamNode::Pipeline(p) => p
            .children
            .iter()
            .map(max_id)
            .fold(p.id.0, u32::max),
        StreamNode::SplitJoin(sj) => sj
            .branches
            .iter()
            .map(max_id)
            .fold(sj.id.0.max(sj.splitter.id.0).max(sj.joiner.id.0), u32::max),
        StreamNode::FeedbackLoop(fl) => max_id(&fl.body)
            .max(max_id(&fl.loopback))
            .max(fl.id.0)
            .max(fl.splitter.id.0)
            .max(fl.joiner.id.0),
    }
}

// ── Identity pre-fusion ─────────────────────────────────────────────────────

/// Pre-fuse maximal all-identity subtrees into single identity filters.
/// Only sharpens the downstream work estimate; semantics are unchanged.
pub fn collapse_identities(root: StreamNode) -> StreamNode {
    let mut alloc = IdAlloc::new(&root);
    collapse_node(root, &mut alloc)
}

fn collapse_node(node: StreamNode, alloc: &mut IdAlloc) -> StreamNode {
    if node.is_container() && node.all_identity() {
        return fuse_to_filter(&node, alloc);
    }
    match node {
        StreamNode::Filter(_) => node,
        StreamNode::Pipeline(mut p) => {
            p.children = p
                .children
                .into_iter()
                .map(|c| collapse_node(c, alloc))
                .collect();
            StreamNode::Pipeline(p)
        }
        StreamNode::SplitJoin(mut sj) => {
            sj.branches = sj
                .branches
                .into_iter()
                .map(|b| collapse_node(b, alloc))
                .collect();
            StreamNode::SplitJoin(sj)
        }
        StreamNode::FeedbackLoop(mut fl) => {
            fl.body = Box::new(collapse_node(*fl.body, alloc));
            fl.loopback = Box::new(collapse_node(*fl.loopback, alloc));
            StreamNode::FeedbackLoop(fl)
        }
    }
}

/// A single filter standing in for an entire fused subtree.
fn fuse_to_filter(node: &StreamNode, alloc: &mut IdAlloc) -> StreamNode {
    StreamNode::Filter(Filter {
        id: alloc.alloc(),
        name: format!("{}_fused", node.name()),
        work: node.total_work(),
        pop: node.boundary_pop().unwrap_or(1),
        push: node.boundary_push().unwrap_or(1),
        icode: node.total_icode(),
        identity: node.all_identity(),
        fissable: false,
    })
}

// ── Partition application ───────────────────────────────────────────────────

/// Rebuild the tree so that each partition record's operators form one
/// filter and each fissed filter becomes a SplitJoin of replicas, then
/// normalize identities and nesting away.
pub fn apply_partition(root: &StreamNode, records: &[PartitionRecord]) -> StreamNode {
    let mut record_of: HashMap<OpId, usize> = HashMap::new();
    for (i, rec) in records.iter().enumerate() {
        for op in &rec.members {
            record_of.insert(*op, i);
        }
    }
    let mut alloc = IdAlloc::new(root);
    let rebuilt = rebuild(root, records, &record_of, &mut alloc);
    lift(eliminate_identities(rebuilt))
}

/// The record every operator of `node` belongs to, if they all share one.
fn subtree_record(node: &StreamNode, record_of: &HashMap<OpId, usize>) -> Option<usize> {
    let mut ops = Vec::new();
    node.collect_ops(&mut ops);
    let first = *record_of.get(ops.first()?)?;
    ops.iter()
        .all(|op| record_of.get(op) == Some(&first))
        .then_some(first)
}

fn rebuild(
    node: &StreamNode,
    records: &[PartitionRecord],
    record_of: &HashMap<OpId, usize>,
    alloc: &mut IdAlloc,
) -> StreamNode {
    match node {
        StreamNode::Filter(f) => {
            let factor = record_of
                .get(&f.id)
                .map(|&r| records[r].fission_factor)
                .unwrap_or(1);
            if factor > 1 {
                fiss_filter(f, factor, alloc)
            } else {
                StreamNode::Filter(f.clone())
            }
        }
        StreamNode::Pipeline(p) => {
            let children = coalesce_sequence(&p.children, records, record_of, alloc);
            StreamNode::Pipeline(Pipeline {
                id: p.id,
                name: p.name.clone(),
                children,
            })
        }
        StreamNode::SplitJoin(sj) => {
            if let Some(r) = subtree_record(node, record_of) {
                if records[r].fission_factor == 1 {
                    return fuse_to_filter(node, alloc);
                }
            }
            rebuild_splitjoin(sj, records, record_of, alloc)
        }
        StreamNode::FeedbackLoop(fl) => {
            if let Some(r) = subtree_record(node, record_of) {
                if records[r].fission_factor == 1 {
                    return fuse_to_filter(node, alloc);
                }
            }
            let body = rebuild_or_fuse(&fl.body, records, record_of, alloc);
            let loopback = rebuild_or_fuse(&fl.loopback, records, record_of, alloc);
            let mut fl = fl.clone();
            fl.body = Box::new(body);
            fl.loopback = Box::new(loopback);
            StreamNode::FeedbackLoop(fl)
        }
    }
}

/// Fuse a container wholly owned by one record; otherwise recurse.
fn rebuild_or_fuse(
    node: &StreamNode,
    records: &[PartitionRecord],
    record_of: &HashMap<OpId, usize>,
    alloc: &mut IdAlloc,
) -> StreamNode {
    match subtree_record(node, record_of) {
        Some(r) if records[r].fission_factor == 1 && node.is_container() => {
            fuse_to_filter(node, alloc)
        }
        _ => rebuild(node, records, record_of, alloc),
    }
}

/// Rebuild a pipeline's child sequence, fusing runs of children that all
/// live in the same record into single filters.
fn coalesce_sequence(
    children: &[StreamNode],
    records: &[PartitionRecord],
    record_of: &HashMap<OpId, usize>,
    alloc: &mut IdAlloc,
) -> Vec<StreamNode> {
    let tags: Vec<Option<usize>> = children
        .iter()
        .map(|c| subtree_record(c, record_of).filter(|&r| records[r].fission_factor == 1))
        .collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < children.len() {
        match tags[i] {
            Some(r) => {
                let mut j = i;
                while j + 1 < children.len() && tags[j + 1] == Some(r) {
                    j += 1;
                }
                if i == j && !children[i].is_container() {
                    out.push(rebuild(&children[i], records, record_of, alloc));
                } else {
                    out.push(fuse_group(&children[i..=j], alloc));
                }
                i = j + 1;
            }
            None => {
                out.push(rebuild(&children[i], records, record_of, alloc));
                i += 1;
            }
        }
    }
    out
}

/// A single filter replacing a fused run of pipeline children.
fn fuse_group(group: &[StreamNode], alloc: &mut IdAlloc) -> StreamNode {
    if group.len() == 1 {
        return fuse_to_filter(&group[0], alloc);
    }
    StreamNode::Filter(Filter {
        id: alloc.alloc(),
        name: format!("fused_{}", group[0].name()),
        work: group.iter().map(|n| n.total_work()).sum(),
        pop: group[0].boundary_pop().unwrap_or(1),
        push: group.last().unwrap().boundary_push().unwrap_or(1),
        icode: group.iter().map(|n| n.total_icode()).sum(),
        identity: group.iter().all(|n| n.all_identity()),
        fissable: false,
    })
}

/// Rebuild a SplitJoin, merging adjacent branches that share a record and
/// summing the corresponding split/join weights.
fn rebuild_splitjoin(
    sj: &SplitJoin,
    records: &[PartitionRecord],
    record_of: &HashMap<OpId, usize>,
    alloc: &mut IdAlloc,
) -> StreamNode {
    let tags: Vec<Option<usize>> = sj
        .branches
        .iter()
        .map(|b| subtree_record(b, record_of).filter(|&r| records[r].fission_factor == 1))
        .collect();

    let mut branches = Vec::new();
    let mut split_weights = Vec::new();
    let mut join_weights = Vec::new();
    let mut i = 0;
    while i < sj.branches.len() {
        match tags[i] {
            Some(r) => {
                let mut j = i;
                while j + 1 < sj.branches.len() && tags[j + 1] == Some(r) {
                    j += 1;
                }
                if i == j && !sj.branches[i].is_container() {
                    branches.push(rebuild(&sj.branches[i], records, record_of, alloc));
                } else {
                    branches.push(fuse_group(&sj.branches[i..=j], alloc));
                }
                split_weights.push(merge_weights(
                    sj.splitter.kind,
                    &sj.splitter.weights[i..=j],
                ));
                join_weights.push(sj.joiner.weights[i..=j].iter().sum());
                i = j + 1;
            }
            None => {
                branches.push(rebuild(&sj.branches[i], records, record_of, alloc));
                split_weights.push(sj.splitter.weights[i]);
                join_weights.push(sj.joiner.weights[i]);
                i += 1;
            }
        }
    }

    StreamNode::SplitJoin(SplitJoin {
        id: sj.id,
        name: sj.name.clone(),
        splitter: Splitter {
            id: sj.splitter.id,
            kind: sj.splitter.kind,
            weights: split_weights,
        },
        branches,
        joiner: Joiner {
            id: sj.joiner.id,
            weights: join_weights,
        },
    })
}

fn merge_weights(kind: SplitterKind, weights: &[u32]) -> u32 {
    match kind {
        // A merged branch of a duplicating splitter still sees the stream once.
        SplitterKind::Duplicate => weights[0],
        SplitterKind::RoundRobin => weights.iter().sum(),
    }
}

/// Replace a filter with a round-robin SplitJoin of `factor` replicas.
fn fiss_filter(f: &Filter, factor: u32, alloc: &mut IdAlloc) -> StreamNode {
    let replicas: Vec<StreamNode> = (0..factor)
        .map(|k| {
            StreamNode::Filter(Filter {
                id: alloc.alloc(),
                name: format!("{}_{}", f.name, k),
                work: f.work / factor as u64 + FISSION_OVERHEAD,
                pop: f.pop,
                push: f.push,
                icode: f.icode,
                identity: f.identity,
                fissable: false,
            })
        })
        .collect();
    StreamNode::SplitJoin(SplitJoin {
        id: alloc.alloc(),
        name: format!("{}_fissed", f.name),
        splitter: Splitter {
            id: alloc.alloc(),
            kind: SplitterKind::RoundRobin,
            weights: vec![f.pop; factor as usize],
        },
        branches: replicas,
        joiner: Joiner {
            id: alloc.alloc(),
            weights: vec![f.push; factor as usize],
        },
    })
}

// ── Normalization ───────────────────────────────────────────────────────────

/// Drop identity filters from multi-child pipelines. Branch structure is
/// never changed: a SplitJoin keeps all its branches.
pub fn eliminate_identities(node: StreamNode) -> StreamNode {
    match node {
        StreamNode::Filter(_) => node,
        StreamNode::Pipeline(mut p) => {
            let children: Vec<StreamNode> = p
                .children
                .into_iter()
                .map(eliminate_identities)
                .collect();
            let kept: Vec<StreamNode> = if children.len() > 1 {
                let (identities, rest): (Vec<_>, Vec<_>) =
                    children.into_iter().partition(is_identity_filter);
                if rest.is_empty() {
                    identities.into_iter().take(1).collect()
                } else {
                    rest
                }
            } else {
                children
            };
            p.children = kept;
            StreamNode::Pipeline(p)
        }
        StreamNode::SplitJoin(mut sj) => {
            sj.branches = sj
                .branches
                .into_iter()
                .map(eliminate_identities)
                .collect();
            StreamNode::SplitJoin(sj)
        }
        StreamNode::FeedbackLoop(mut fl) => {
            fl.body = Box::new(eliminate_identities(*fl.body));
            fl.loopback = Box::new(eliminate_identities(*fl.loopback));
            StreamNode::FeedbackLoop(fl)
        }
    }
}

fn is_identity_filter(node: &StreamNode) -> bool {
    matches!(node, StreamNode::Filter(f) if f.identity)
}

/// Flatten nested pipelines and unwrap single-child pipelines.
pub fn lift(node: StreamNode) -> StreamNode {
    match node {
        StreamNode::Filter(_) => node,
        StreamNode::Pipeline(p) => {
            let mut out = Vec::new();
            for child in p.children {
                match lift(child) {
                    StreamNode::Pipeline(inner) => out.extend(inner.children),
                    other => out.push(other),
                }
            }
            if out.len() == 1 {
                out.pop().unwrap()
            } else {
                StreamNode::Pipeline(Pipeline {
                    id: p.id,
                    name: p.name,
                    children: out,
                })
            }
        }
        StreamNode::SplitJoin(mut sj) => {
            sj.branches = sj.branches.into_iter().map(lift).collect();
            StreamNode::SplitJoin(sj)
        }
        StreamNode::FeedbackLoop(mut fl) => {
            fl.body = Box::new(lift(*fl.body));
            fl.loopback = Box::new(lift(*fl.loopback));
            StreamNode::FeedbackLoop(fl)
        }
    }
}

/// Ordering of the eliminate-then-lift normalization applied after a
/// partition rewrite; exposed for callers that rewrite by hand.
pub fn normalize(node: StreamNode) -> StreamNode {
    lift(eliminate_identities(node))
}

// ── Tests ───────────────────────────────────────────────────────────────────
