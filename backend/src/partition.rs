// partition.rs — Dynamic-programming partitioner
//
// Splits the hierarchical stream graph into at most `tiles` fused groups,
// minimizing the bottleneck (maximum per-tile work). A config tree mirrors
// the stream shape; each config memoizes an interval DP over its child
// sequence: fuse a range onto one tile, or cut it and split the budget.
// Traceback replays the winning choices into partition records.
//
// Preconditions: the stream tree passes `validate_stream` (rectangular
//                SplitJoins, unique ids); checked here before any work.
// Postconditions: records form a true partition of all operator ids;
//                 bottleneck is non-increasing in the tile budget.
// Failure modes: precondition violations, zero tile budget, exhausted
//                icode search → error `Diagnostic`s, no outcome.
// Side effects: none.

use std::collections::HashMap;

use serde::Serialize;

use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::rewrite;
use crate::stream::{structurally_equal, validate_stream, OpId, StreamNode};

// ── Tuning constants ────────────────────────────────────────────────────────

/// Work overhead charged to every replica of a fissed filter.
pub const FISSION_OVERHEAD: u64 = 10;
/// Maximum fission factor before the network dominates any gain.
pub const MAX_FISSION_FACTOR: u32 = 64;
/// Multiplier on a branch's boundary rates when branches fuse horizontally.
pub const HORIZONTAL_FILTER_OVERHEAD_FACTOR: u64 = 30;
/// Extra charge when a horizontally fused branch endpoint is a container.
pub const HORIZONTAL_CONTAINER_OVERHEAD: u64 = 30;
/// Instruction-code bytes per tile above which a partition is rejected
/// when `limit_icode` is set.
pub const ICODE_THRESHOLD: u64 = 16_000;
/// Cap on the icode search loop's tile budget. The search would otherwise
/// grow without bound on infeasible inputs.
pub const MAX_ICODE_SEARCH_TILES: u32 = 1_024;

// ── Public types ────────────────────────────────────────────────────────────

/// A set of operators fused onto one tile. `fission_factor > 1` marks a
/// single filter replicated across that many tiles.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionRecord {
    pub members: Vec<OpId>,
    pub fission_factor: u32,
}

impl PartitionRecord {
    fn of(members: Vec<OpId>) -> Self {
        PartitionRecord {
            members,
            fission_factor: 1,
        }
    }

    /// Tiles this record occupies.
    pub fn tiles(&self) -> u32 {
        self.fission_factor
    }
}

/// Cost of mapping a subtree onto some number of tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cost {
    /// Maximum per-tile work among the chosen split.
    pub bottleneck: u64,
    /// Estimated code bytes of the most code-heavy tile.
    pub icode: u64,
}

impl Cost {
    fn fuse(self, other: Cost) -> Cost {
        Cost {
            bottleneck: self.bottleneck + other.bottleneck,
            icode: self.icode + other.icode,
        }
    }

    fn parallel(self, other: Cost) -> Cost {
        Cost {
            bottleneck: self.bottleneck.max(other.bottleneck),
            icode: self.icode.max(other.icode),
        }
    }

    fn better_than(self, other: Cost) -> bool {
        (self.bottleneck, self.icode) < (other.bottleneck, other.icode)
    }
}

/// Partitioner policy and budget.
#[derive(Debug, Clone)]
pub struct PartitionOptions {
    /// Tile budget; ignored when `limit_icode` searches for a budget.
    pub tiles: u32,
    /// Whether join nodes consume a tile slot.
    pub joiners_need_tiles: bool,
    /// Search for the smallest budget whose per-tile code fits
    /// `ICODE_THRESHOLD`.
    pub limit_icode: bool,
    /// Rewrite the stream tree to match the records.
    pub transform: bool,
    /// Pre-fuse maximal all-identity subtrees before estimating cost.
    pub collapse_identities: bool,
    /// Share cost tables across structurally identical SplitJoin branches,
    /// materializing copies before traceback.
    pub share_uniform_branches: bool,
    /// Collapse extra SplitJoin cuts that sit below the bottleneck.
    pub prune_on_traceback: bool,
    /// Walk the tile count down while the bottleneck is unchanged.
    pub minimize_tile_usage: bool,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        PartitionOptions {
            tiles: 16,
            joiners_need_tiles: false,
            limit_icode: false,
            transform: false,
            collapse_identities: false,
            share_uniform_branches: false,
            prune_on_traceback: true,
            minimize_tile_usage: false,
        }
    }
}

/// Successful partitioning output.
#[derive(Debug)]
pub struct PartitionOutcome {
    pub records: Vec<PartitionRecord>,
    pub bottleneck: u64,
    pub icode: u64,
    /// Tiles consumed: one per record, plus fission replicas.
    pub tiles_used: u32,
    /// The rewritten stream graph, when `transform` was requested.
    pub rewritten: Option<StreamNode>,
}

/// Result of the partition pass.
#[derive(Debug)]
pub struct PartitionResult {
    pub outcome: Option<PartitionOutcome>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for partition postconditions (P1-P3).
#[derive(Debug, Clone)]
pub struct PartitionCert {
    /// P1: every operator id appears in some record.
    pub p1_full_coverage: bool,
    /// P2: no operator id appears in two records.
    pub p2_no_overlap: bool,
    /// P3: tiles used do not exceed the granted budget.
    pub p3_within_budget: bool,
}

impl crate::pass::StageCert for PartitionCert {
    fn all_pass(&self) -> bool {
        self.p1_full_coverage && self.p2_no_overlap && self.p3_within_budget
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("P1_full_coverage", self.p1_full_coverage),
            ("P2_no_overlap", self.p2_no_overlap),
            ("P3_within_budget", self.p3_within_budget),
        ]
    }
}

/// Verify partition postconditions against the tree the records refer to.
///
/// When `collapse_identities` rewrote the tree first, pass the collapsed
/// tree (available as `outcome.rewritten`'s base); otherwise the original.
pub fn verify_partition(
    outcome: &PartitionOutcome,
    tree: &StreamNode,
    budget: u32,
) -> PartitionCert {
    let mut expected = Vec::new();
    tree.collect_ops(&mut expected);

    let mut seen: HashMap<OpId, usize> = HashMap::new();
    for rec in &outcome.records {
        for op in &rec.members {
            *seen.entry(*op).or_insert(0) += 1;
        }
    }

    let p1 = expected.iter().all(|op| seen.contains_key(op));
    let p2 = seen.values().all(|&n| n == 1) && seen.len() == expected.len();
    let p3 = outcome.tiles_used <= budget;
    PartitionCert {
        p1_full_coverage: p1,
        p2_no_overlap: p2,
        p3_within_budget: p3,
    }
}

// ── Public entry points ─────────────────────────────────────────────────────

/// Partition `root` under `opts`.
pub fn partition(root: &StreamNode, opts: &PartitionOptions) -> PartitionResult {
    let mut diagnostics = validate_stream(root);
    if crate::diag::has_errors(&diagnostics) {
        return PartitionResult {
            outcome: None,
            diagnostics,
        };
    }
    if opts.tiles == 0 && !opts.limit_icode {
        diagnostics.push(Diagnostic::error(
            codes::E0202,
            "tile budget must be at least 1",
        ));
        return PartitionResult {
            outcome: None,
            diagnostics,
        };
    }

    // Identity pre-fusion sharpens the work estimate; records then refer
    // to the collapsed tree, which is also the rewrite base.
    let work_tree = if opts.collapse_identities {
        rewrite::collapse_identities(root.clone())
    } else {
        root.clone()
    };

    let ctx = CostCtx {
        joiners_need_tiles: opts.joiners_need_tiles,
    };
    let mut config = build_config(&work_tree, opts.share_uniform_branches);

    // Budget selection: fixed, or the smallest budget meeting the icode
    // ceiling.
    let (budget, cost) = if opts.limit_icode {
        let mut found = None;
        for b in 1..=MAX_ICODE_SEARCH_TILES {
            let c = config.cost(b, ctx);
            if c.icode <= ICODE_THRESHOLD {
                found = Some((b, c));
                break;
            }
        }
        match found {
            Some(pair) => pair,
            None => {
                diagnostics.push(
                    Diagnostic::error(
                        codes::E0300,
                        format!(
                            "no feasible code-size bound found within {} tiles \
                             (per-tile icode stays above {})",
                            MAX_ICODE_SEARCH_TILES, ICODE_THRESHOLD
                        ),
                    )
                    .with_subject(work_tree.name().to_string()),
                );
                return PartitionResult {
                    outcome: None,
                    diagnostics,
                };
            }
        }
    } else {
        (opts.tiles, config.cost(opts.tiles, ctx))
    };

    // Fewest tiles achieving the same bottleneck.
    let mut tiles_granted = budget;
    if opts.minimize_tile_usage {
        while tiles_granted > 1
            && config.cost(tiles_granted - 1, ctx).bottleneck == cost.bottleneck
        {
            tiles_granted -= 1;
        }
        if tiles_granted < budget {
            diagnostics.push(
                Diagnostic::new(
                    DiagLevel::Warning,
                    format!(
                        "tile usage reduced from {} to {} at equal bottleneck",
                        budget, tiles_granted
                    ),
                )
                .with_code(codes::W0501),
            );
        }
    }

    let records = if cost.bottleneck == 0 {
        // Degenerate empty-work graph: one record holds everything.
        let mut ops = Vec::new();
        work_tree.collect_ops(&mut ops);
        vec![PartitionRecord::of(ops)]
    } else {
        config.traceback(
            tiles_granted,
            ctx,
            cost.bottleneck,
            opts.prune_on_traceback,
        )
    };

    let tiles_used = records.iter().map(|r| r.tiles()).sum();
    let rewritten = if opts.transform {
        Some(rewrite::apply_partition(&work_tree, &records))
    } else {
        None
    };

    PartitionResult {
        outcome: Some(PartitionOutcome {
            records,
            bottleneck: cost.bottleneck,
            icode: cost.icode,
            tiles_used,
            rewritten,
        }),
        diagnostics,
    }
}

/// One row of the scaling report.
#[derive(Debug, Clone, Serialize)]
pub struct ScalingEntry {
    pub tiles: u32,
    pub bottleneck: u64,
    pub records: usize,
}

/// Bottleneck scaling for every budget in `1..=max_tiles`, joiners
/// counted as occupying tiles.
pub fn scaling_report(root: &StreamNode, max_tiles: u32) -> Result<Vec<ScalingEntry>, Vec<Diagnostic>> {
    let mut entries = Vec::new();
    for tiles in 1..=max_tiles {
        let opts = PartitionOptions {
            tiles,
            joiners_need_tiles: true,
            ..PartitionOptions::default()
        };
        let result = partition(root, &opts);
        match result.outcome {
            Some(outcome) => entries.push(ScalingEntry {
                tiles,
                bottleneck: outcome.bottleneck,
                records: outcome.records.len(),
            }),
            None => return Err(result.diagnostics),
        }
    }
    Ok(entries)
}

// ── Config tree ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct CostCtx {
    joiners_need_tiles: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Pipeline,
    SplitJoin,
    FeedbackLoop,
}

/// Winning decision for a memoized (range, budget) cell.
#[derive(Debug, Clone, Copy)]
enum Choice {
    /// Whole range fused onto one tile.
    Fuse,
    /// Single-child range delegated to the child config.
    Leaf,
    /// Best solution uses fewer tiles than granted.
    Defer,
    /// Range cut after `at`; the left part gets `left_tiles`.
    Cut { at: usize, left_tiles: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    cost: Cost,
    choice: Choice,
}

#[derive(Debug, Clone)]
enum Config {
    Filter(FilterConfig),
    Container(Box<ContainerConfig>),
}

#[derive(Debug, Clone)]
struct FilterConfig {
    id: OpId,
    work: u64,
    icode: u64,
    fissable: bool,
    /// budget → (cost, fission factor)
    memo: HashMap<u32, (Cost, u32)>,
}

#[derive(Debug, Clone)]
struct ContainerConfig {
    kind: ContainerKind,
    children: Vec<Config>,
    /// Operator ids of each child subtree, for record building.
    child_ops: Vec<Vec<OpId>>,
    /// Per-branch horizontal fusion overhead (SplitJoin only, else 0).
    child_fuse_overhead: Vec<u64>,
    splitter_id: Option<OpId>,
    joiner_id: Option<OpId>,
    /// True until shared-branch cost tables are materialized.
    uniform_share: bool,
    /// (lo, hi, budget) → entry
    memo: HashMap<(usize, usize, u32), Entry>,
}

fn build_config(node: &StreamNode, share: bool) -> Config {
    match node {
        StreamNode::Filter(f) => Config::Filter(FilterConfig {
            id: f.id,
            work: f.work,
            icode: f.icode,
            fissable: f.fissable,
            memo: HashMap::new(),
        }),
        StreamNode::Pipeline(p) => {
            let children = p.children.iter().map(|c| build_config(c, share)).collect();
            let child_ops = p
                .children
                .iter()
                .map(|c| {
                    let mut ops = Vec::new();
                    c.collect_ops(&mut ops);
                    ops
                })
                .collect();
            let n = p.children.len();
            Config::Container(Box::new(ContainerConfig {
                kind: ContainerKind::Pipeline,
                children,
                child_ops,
                child_fuse_overhead: vec![0; n],
                splitter_id: None,
                joiner_id: None,
                uniform_share: false,
                memo: HashMap::new(),
            }))
        }
        StreamNode::SplitJoin(sj) => {
            let children: Vec<Config> =
                sj.branches.iter().map(|b| build_config(b, share)).collect();
            let child_ops = sj
                .branches
                .iter()
                .map(|b| {
                    let mut ops = Vec::new();
                    b.collect_ops(&mut ops);
                    ops
                })
                .collect();
            let child_fuse_overhead = sj.branches.iter().map(horizontal_overhead).collect();
            let uniform = share
                && sj.branches.len() > 1
                && sj
                    .branches
                    .windows(2)
                    .all(|w| structurally_equal(&w[0], &w[1]));
            Config::Container(Box::new(ContainerConfig {
                kind: ContainerKind::SplitJoin,
                children,
                child_ops,
                child_fuse_overhead,
                splitter_id: Some(sj.splitter.id),
                joiner_id: Some(sj.joiner.id),
                uniform_share: uniform,
                memo: HashMap::new(),
            }))
        }
        StreamNode::FeedbackLoop(fl) => {
            let children = vec![
                build_config(&fl.body, share),
                build_config(&fl.loopback, share),
            ];
            let child_ops = [&fl.body, &fl.loopback]
                .iter()
                .map(|c| {
                    let mut ops = Vec::new();
                    c.collect_ops(&mut ops);
                    ops
                })
                .collect();
            Config::Container(Box::new(ContainerConfig {
                kind: ContainerKind::FeedbackLoop,
                children,
                child_ops,
                child_fuse_overhead: vec![0; 2],
                splitter_id: Some(fl.splitter.id),
                joiner_id: Some(fl.joiner.id),
                uniform_share: false,
                memo: HashMap::new(),
            }))
        }
    }
}

/// Work penalty for fusing this branch horizontally with its siblings:
/// boundary rates scaled up, container endpoints charged a flat overhead.
fn horizontal_overhead(branch: &StreamNode) -> u64 {
    let top = match branch.boundary_pop() {
        Some(pop) => HORIZONTAL_FILTER_OVERHEAD_FACTOR * pop as u64,
        None => HORIZONTAL_CONTAINER_OVERHEAD,
    };
    let bottom = match branch.boundary_push() {
        Some(push) => HORIZONTAL_FILTER_OVERHEAD_FACTOR * push as u64,
        None => HORIZONTAL_CONTAINER_OVERHEAD,
    };
    top + bottom
}

impl Config {
    fn cost(&mut self, budget: u32, ctx: CostCtx) -> Cost {
        match self {
            Config::Filter(f) => f.cost(budget),
            Config::Container(c) => c.cost(budget, ctx),
        }
    }

    fn traceback(
        &mut self,
        budget: u32,
        ctx: CostCtx,
        target: u64,
        prune: bool,
    ) -> Vec<PartitionRecord> {
        match self {
            Config::Filter(f) => f.traceback(budget),
            Config::Container(c) => c.traceback(budget, ctx, target, prune),
        }
    }

    /// Copy memo tables from a structurally identical config, keeping own
    /// operator identity.
    fn adopt_memo(&mut self, proto: &Config) {
        match (self, proto) {
            (Config::Filter(a), Config::Filter(b)) => {
                a.memo = b.memo.clone();
            }
            (Config::Container(a), Config::Container(b)) => {
                a.memo = b.memo.clone();
                for (child, proto_child) in a.children.iter_mut().zip(b.children.iter()) {
                    child.adopt_memo(proto_child);
                }
            }
            _ => {}
        }
    }
}

impl FilterConfig {
    fn lookup(&mut self, budget: u32) -> (Cost, u32) {
        if let Some(hit) = self.memo.get(&budget) {
            return *hit;
        }
        let unfissed = Cost {
            bottleneck: self.work,
            icode: self.icode,
        };
        let mut best = (unfissed, 1u32);
        if self.fissable {
            // Every replica carries the full body, so icode is unchanged.
            for p in 2..=budget.min(MAX_FISSION_FACTOR) {
                let cand = Cost {
                    bottleneck: self.work / p as u64 + FISSION_OVERHEAD,
                    icode: self.icode,
                };
                if cand.better_than(best.0) {
                    best = (cand, p);
                }
            }
        }
        self.memo.insert(budget, best);
        best
    }

    fn cost(&mut self, budget: u32) -> Cost {
        self.lookup(budget).0
    }

    fn traceback(&mut self, budget: u32) -> Vec<PartitionRecord> {
        let (_, factor) = self.lookup(budget);
        vec![PartitionRecord {
            members: vec![self.id],
            fission_factor: factor,
        }]
    }
}

impl ContainerConfig {
    /// Tiles left for the children after the joiner takes its slot.
    fn child_budget(&self, budget: u32, ctx: CostCtx) -> u32 {
        let reserve = self.kind != ContainerKind::Pipeline
            && ctx.joiners_need_tiles
            && self.joiner_id.is_some()
            && budget > 1;
        if reserve {
            budget - 1
        } else {
            budget
        }
    }

    fn cost(&mut self, budget: u32, ctx: CostCtx) -> Cost {
        let child_budget = self.child_budget(budget, ctx);
        if self.uniform_share {
            self.materialize_shared(child_budget, ctx);
        }
        let hi = self.children.len() - 1;
        self.range_cost(0, hi, child_budget, ctx)
    }

    /// Fill the first branch's tables, then copy them to its structurally
    /// identical siblings. Must run before traceback so every branch
    /// reports its own operator ids.
    fn materialize_shared(&mut self, child_budget: u32, ctx: CostCtx) {
        for b in 1..=child_budget {
            self.children[0].cost(b, ctx);
        }
        let proto = self.children[0].clone();
        for child in self.children.iter_mut().skip(1) {
            child.adopt_memo(&proto);
        }
        self.uniform_share = false;
    }

    fn range_cost(&mut self, lo: usize, hi: usize, budget: u32, ctx: CostCtx) -> Cost {
        debug_assert!(budget >= 1);
        if let Some(entry) = self.memo.get(&(lo, hi, budget)) {
            return entry.cost;
        }
        let entry = if lo == hi {
            Entry {
                cost: self.children[lo].cost(budget, ctx),
                choice: Choice::Leaf,
            }
        } else if budget == 1 {
            Entry {
                cost: self.fused_cost(lo, hi, ctx),
                choice: Choice::Fuse,
            }
        } else {
            let mut best = Entry {
                cost: self.range_cost(lo, hi, budget - 1, ctx),
                choice: Choice::Defer,
            };
            for at in lo..hi {
                for left_tiles in 1..budget {
                    let left = self.range_cost(lo, at, left_tiles, ctx);
                    let right = self.range_cost(at + 1, hi, budget - left_tiles, ctx);
                    let cand = left.parallel(right);
                    if cand.better_than(best.cost) {
                        best = Entry {
                            cost: cand,
                            choice: Choice::Cut { at, left_tiles },
                        };
                    }
                }
            }
            best
        };
        self.memo.insert((lo, hi, budget), entry);
        entry.cost
    }

    /// Everything in `lo..=hi` on one tile: work and icode add up, and
    /// SplitJoin branches pay the horizontal fusion penalty.
    fn fused_cost(&mut self, lo: usize, hi: usize, ctx: CostCtx) -> Cost {
        let mut total = Cost {
            bottleneck: 0,
            icode: 0,
        };
        for i in lo..=hi {
            total = total.fuse(self.children[i].cost(1, ctx));
            if self.kind == ContainerKind::SplitJoin {
                total.bottleneck += self.child_fuse_overhead[i];
            }
        }
        total
    }

    fn traceback(
        &mut self,
        budget: u32,
        ctx: CostCtx,
        target: u64,
        prune: bool,
    ) -> Vec<PartitionRecord> {
        let child_budget = self.child_budget(budget, ctx);
        let reserved_joiner = child_budget < budget;
        let hi = self.children.len() - 1;
        let mut records = self.range_traceback(0, hi, child_budget, ctx, target, prune);
        debug_assert!(!records.is_empty());

        // The splitter travels with its first branch; the joiner gets its
        // own tile when reserved, else rides the last branch.
        if let Some(sid) = self.splitter_id {
            records[0].members.insert(0, sid);
        }
        if let Some(jid) = self.joiner_id {
            if reserved_joiner {
                records.push(PartitionRecord::of(vec![jid]));
            } else if let Some(last) = records.last_mut() {
                last.members.push(jid);
            }
        }
        records
    }

    fn range_traceback(
        &mut self,
        lo: usize,
        hi: usize,
        budget: u32,
        ctx: CostCtx,
        target: u64,
        prune: bool,
    ) -> Vec<PartitionRecord> {
        let entry = match self.memo.get(&(lo, hi, budget)) {
            Some(e) => *e,
            None => {
                self.range_cost(lo, hi, budget, ctx);
                self.memo[&(lo, hi, budget)]
            }
        };

        // Collapse extra parallel cuts that sit below the bottleneck.
        if prune
            && self.kind == ContainerKind::SplitJoin
            && matches!(entry.choice, Choice::Cut { .. })
            && self.range_cost(lo, hi, 1, ctx).bottleneck <= target
        {
            return vec![self.fused_record(lo, hi)];
        }

        match entry.choice {
            Choice::Fuse => vec![self.fused_record(lo, hi)],
            Choice::Leaf => self.children[lo].traceback(budget, ctx, target, prune),
            Choice::Defer => self.range_traceback(lo, hi, budget - 1, ctx, target, prune),
            Choice::Cut { at, left_tiles } => {
                let mut records =
                    self.range_traceback(lo, at, left_tiles, ctx, target, prune);
                records.extend(self.range_traceback(
                    at + 1,
                    hi,
                    budget - left_tiles,
                    ctx,
                    target,
                    prune,
                ));
                records
            }
        }
    }

    fn fused_record(&self, lo: usize, hi: usize) -> PartitionRecord {
        let mut members = Vec::new();
        for ops in &self.child_ops[lo..=hi] {
            members.extend_from_slice(ops);
        }
        PartitionRecord::of(members)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
