// stream.rs — Hierarchical stream graph model
//
// The input form consumed by the partitioner: a tree of filters composed
// sequentially (Pipeline), in parallel (SplitJoin), and cyclically
// (FeedbackLoop). Built by the frontend/flattener collaborators and read
// here; the partitioner may return a rewritten copy.
//
// Preconditions: operator ids are unique; SplitJoins are rectangular
//                (checked by `validate_stream` before partitioning).
// Postconditions: none (model + validation only).
// Failure modes: validation emits `Diagnostic` errors for malformed trees.
// Side effects: none.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diag::{codes, DiagLevel, Diagnostic};

// ── Public types ────────────────────────────────────────────────────────────

/// Stable identifier for a stream operator (filter, splitter, or joiner).
///
/// Assigned by the producer of the backend input; partition records are
/// sets of these.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OpId(pub u32);

/// How a splitter distributes items across branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitterKind {
    /// Every branch receives every item.
    Duplicate,
    /// Items are dealt out in weighted round-robin order.
    RoundRobin,
}

/// A splitter operator heading a SplitJoin or FeedbackLoop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Splitter {
    pub id: OpId,
    pub kind: SplitterKind,
    pub weights: Vec<u32>,
}

/// A joiner operator closing a SplitJoin or heading a FeedbackLoop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Joiner {
    pub id: OpId,
    pub weights: Vec<u32>,
}

/// A leaf computation with steady-state work and rate estimates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub id: OpId,
    pub name: String,
    /// Steady-state work estimate (oracle-supplied).
    pub work: u64,
    pub pop: u32,
    pub push: u32,
    /// Estimated instruction-code size in bytes.
    pub icode: u64,
    /// True for identity (pass-through) filters.
    #[serde(default)]
    pub identity: bool,
    /// True if the filter is stateless and may be replicated across tiles.
    #[serde(default)]
    pub fissable: bool,
}

/// Sequential composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: OpId,
    pub name: String,
    pub children: Vec<StreamNode>,
}

/// Parallel composition between a splitter and a joiner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitJoin {
    pub id: OpId,
    pub name: String,
    pub splitter: Splitter,
    pub branches: Vec<StreamNode>,
    pub joiner: Joiner,
}

/// Cyclic composition: joiner → body → splitter, with a loop-back path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackLoop {
    pub id: OpId,
    pub name: String,
    pub joiner: Joiner,
    pub body: Box<StreamNode>,
    pub splitter: Splitter,
    pub loopback: Box<StreamNode>,
    /// Items pre-loaded on the loop-back path before steady state.
    pub delay: u32,
}

/// A node in the hierarchical stream graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StreamNode {
    Filter(Filter),
    Pipeline(Pipeline),
    SplitJoin(SplitJoin),
    FeedbackLoop(FeedbackLoop),
}

impl StreamNode {
    pub fn id(&self) -> OpId {
        match self {
            StreamNode::Filter(f) => f.id,
            StreamNode::Pipeline(p) => p.id,
            StreamNode::SplitJoin(sj) => sj.id,
            StreamNode::FeedbackLoop(fl) => fl.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            StreamNode::Filter(f) => &f.name,
            StreamNode::Pipeline(p) => &p.name,
            StreamNode::SplitJoin(sj) => &sj.name,
            StreamNode::FeedbackLoop(fl) => &fl.name,
        }
    }

    pub fn is_container(&self) -> bool {
        !matches!(self, StreamNode::Filter(_))
    }

    /// Sum of filter work estimates in the subtree.
    pub fn total_work(&self) -> u64 {
        match self {
            StreamNode::Filter(f) => f.work,
            StreamNode::Pipeline(p) => p.children.iter().map(|c| c.total_work()).sum(),
            StreamNode::SplitJoin(sj) => sj.branches.iter().map(|c| c.total_work()).sum(),
            StreamNode::FeedbackLoop(fl) => fl.body.total_work() + fl.loopback.total_work(),
        }
    }

    /// Sum of filter instruction-code estimates in the subtree.
    pub fn total_icode(&self) -> u64 {
        match self {
            StreamNode::Filter(f) => f.icode,
            StreamNode::Pipeline(p) => p.children.iter().map(|c| c.total_icode()).sum(),
            StreamNode::SplitJoin(sj) => sj.branches.iter().map(|c| c.total_icode()).sum(),
            StreamNode::FeedbackLoop(fl) => fl.body.total_icode() + fl.loopback.total_icode(),
        }
    }

    /// All operator ids in the subtree, in traversal order: filters plus
    /// the splitters and joiners of composite nodes. Container ids are not
    /// operators and are excluded.
    pub fn collect_ops(&self, out: &mut Vec<OpId>) {
        match self {
            StreamNode::Filter(f) => out.push(f.id),
            StreamNode::Pipeline(p) => {
                for c in &p.children {
                    c.collect_ops(out);
                }
            }
            StreamNode::SplitJoin(sj) => {
                out.push(sj.splitter.id);
                for b in &sj.branches {
                    b.collect_ops(out);
                }
                out.push(sj.joiner.id);
            }
            StreamNode::FeedbackLoop(fl) => {
                out.push(fl.joiner.id);
                fl.body.collect_ops(out);
                out.push(fl.splitter.id);
                fl.loopback.collect_ops(out);
            }
        }
    }

    /// Number of filter leaves in the subtree.
    pub fn filter_count(&self) -> usize {
        match self {
            StreamNode::Filter(_) => 1,
            StreamNode::Pipeline(p) => p.children.iter().map(|c| c.filter_count()).sum(),
            StreamNode::SplitJoin(sj) => sj.branches.iter().map(|c| c.filter_count()).sum(),
            StreamNode::FeedbackLoop(fl) => fl.body.filter_count() + fl.loopback.filter_count(),
        }
    }

    /// True if every filter in the subtree is an identity.
    pub fn all_identity(&self) -> bool {
        match self {
            StreamNode::Filter(f) => f.identity,
            StreamNode::Pipeline(p) => p.children.iter().all(|c| c.all_identity()),
            StreamNode::SplitJoin(sj) => sj.branches.iter().all(|c| c.all_identity()),
            StreamNode::FeedbackLoop(fl) => fl.body.all_identity() && fl.loopback.all_identity(),
        }
    }

    /// Pop rate of the subtree's upstream boundary, when that boundary is
    /// a filter (possibly through nested pipelines). `None` means the
    /// boundary is itself a container.
    pub fn boundary_pop(&self) -> Option<u32> {
        match self {
            StreamNode::Filter(f) => Some(f.pop),
            StreamNode::Pipeline(p) => p.children.first().and_then(|c| c.boundary_pop()),
            _ => None,
        }
    }

    /// Push rate of the subtree's downstream boundary; `None` for a
    /// container boundary.
    pub fn boundary_push(&self) -> Option<u32> {
        match self {
            StreamNode::Filter(f) => Some(f.push),
            StreamNode::Pipeline(p) => p.children.last().and_then(|c| c.boundary_push()),
            _ => None,
        }
    }

    /// Structural depth used by the rectangularity check: a pipeline's
    /// depth is its child count, anything else counts 1.
    fn shape_depth(&self) -> usize {
        match self {
            StreamNode::Pipeline(p) => p.children.len(),
            _ => 1,
        }
    }
}

/// Structural equality up to ids and names: same shape, same rates, same
/// work and code estimates. Used to detect uniform SplitJoin branches
/// whose cost tables can be shared.
pub fn structurally_equal(a: &StreamNode, b: &StreamNode) -> bool {
    match (a, b) {
        (StreamNode::Filter(x), StreamNode::Filter(y)) => {
            x.work == y.work
                && x.pop == y.pop
                && x.push == y.push
                && x.icode == y.icode
                && x.identity == y.identity
                && x.fissable == y.fissable
        }
        (StreamNode::Pipeline(x), StreamNode::Pipeline(y)) => {
            x.children.len() == y.children.len()
                && x.children
                    .iter()
                    .zip(y.children.iter())
                    .all(|(a, b)| structurally_equal(a, b))
        }
        (StreamNode::SplitJoin(x), StreamNode::SplitJoin(y)) => {
            x.splitter.kind == y.splitter.kind
                && x.splitter.weights == y.splitter.weights
                && x.joiner.weights == y.joiner.weights
                && x.branches.len() == y.branches.len()
                && x.branches
                    .iter()
                    .zip(y.branches.iter())
                    .all(|(a, b)| structurally_equal(a, b))
        }
        (StreamNode::FeedbackLoop(x), StreamNode::FeedbackLoop(y)) => {
            x.delay == y.delay
                && x.joiner.weights == y.joiner.weights
                && x.splitter.weights == y.splitter.weights
                && structurally_equal(&x.body, &y.body)
                && structurally_equal(&x.loopback, &y.loopback)
        }
        _ => false,
    }
}

// ── Validation ──────────────────────────────────────────────────────────────

/// Check the partitioner's preconditions on a stream tree.
///
/// All violations are fatal: the partitioner must never discover a
/// malformed SplitJoin mid-algorithm.
pub fn validate_stream(root: &StreamNode) -> Vec<Diagnostic> {
    let mut v = Validator {
        diagnostics: Vec::new(),
        seen: HashSet::new(),
    };
    v.visit(root);
    v.diagnostics
}

struct Validator {
    diagnostics: Vec<Diagnostic>,
    seen: HashSet<OpId>,
}

impl Validator {
    fn error(&mut self, code: crate::diag::DiagCode, subject: &str, message: String) {
        self.diagnostics.push(
            Diagnostic::new(DiagLevel::Error, message)
                .with_code(code)
                .with_subject(subject.to_string()),
        );
    }

    fn claim(&mut self, id: OpId, subject: &str) {
        if !self.seen.insert(id) {
            self.error(
                codes::E0103,
                subject,
                format!("operator id {} appears more than once", id.0),
            );
        }
    }

    fn visit(&mut self, node: &StreamNode) {
        match node {
            StreamNode::Filter(f) => {
                let name = f.name.clone();
                self.claim(f.id, &name);
            }
            StreamNode::Pipeline(p) => {
                if p.children.is_empty() {
                    let name = p.name.clone();
                    self.error(codes::E0101, &name, "pipeline has no children".to_string());
                    return;
                }
                for c in &p.children {
                    self.visit(c);
                }
            }
            StreamNode::SplitJoin(sj) => {
                let name = sj.name.clone();
                if sj.branches.is_empty() {
                    self.error(codes::E0101, &name, "splitjoin has no branches".to_string());
                    return;
                }
                if sj.splitter.weights.len() != sj.branches.len()
                    || sj.joiner.weights.len() != sj.branches.len()
                {
                    self.error(
                        codes::E0102,
                        &name,
                        format!(
                            "splitjoin has {} branches but {} split / {} join weights",
                            sj.branches.len(),
                            sj.splitter.weights.len(),
                            sj.joiner.weights.len()
                        ),
                    );
                }
                let depth = sj.branches[0].shape_depth();
                if sj.branches.iter().any(|b| b.shape_depth() != depth) {
                    self.error(
                        codes::E0100,
                        &name,
                        "splitjoin branches are not rectangular; run the \
                         canonicalization pass before partitioning"
                            .to_string(),
                    );
                }
                self.claim(sj.splitter.id, &name);
                self.claim(sj.joiner.id, &name);
                for b in &sj.branches {
                    self.visit(b);
                }
            }
            StreamNode::FeedbackLoop(fl) => {
                let name = fl.name.clone();
                self.claim(fl.joiner.id, &name);
                self.claim(fl.splitter.id, &name);
                self.visit(&fl.body);
                self.visit(&fl.loopback);
            }
        }
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for StreamNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(f, self, 0)
    }
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &StreamNode, indent: usize) -> fmt::Result {
    let pad = "  ".repeat(indent);
    match node {
        StreamNode::Filter(fl) => {
            writeln!(
                f,
                "{pad}filter '{}' work={} pop={} push={}",
                fl.name, fl.work, fl.pop, fl.push
            )
        }
        StreamNode::Pipeline(p) => {
            writeln!(f, "{pad}pipeline '{}' ({} children)", p.name, p.children.len())?;
            for c in &p.children {
                write_node(f, c, indent + 1)?;
            }
            Ok(())
        }
        StreamNode::SplitJoin(sj) => {
            writeln!(
                f,
                "{pad}splitjoin '{}' ({} branches)",
                sj.name,
                sj.branches.len()
            )?;
            for b in &sj.branches {
                write_node(f, b, indent + 1)?;
            }
            Ok(())
        }
        StreamNode::FeedbackLoop(fl) => {
            writeln!(f, "{pad}feedbackloop '{}' delay={}", fl.name, fl.delay)?;
            write_node(f, &fl.body, indent + 1)?;
            writeln!(f, "{pad}  (loopback)")?;
            write_node(f, &fl.loopback, indent + 1)
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
