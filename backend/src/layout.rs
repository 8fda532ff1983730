// layout.rs — Simulated-annealing tile placer
//
// Assigns tile-occupying flat-graph nodes to mesh coordinates, minimizing
// a congestion-aware communication cost. Two annealing passes over random
// pairwise swaps with Metropolis acceptance; the starting and stopping
// temperatures are calibrated from measured acceptance rates. The best
// assignment seen anywhere in the run is the result, independent of the
// final state at termination.
//
// Preconditions: the flat graph passes `validate_flat`; the grid holds
//                every tile-occupying node; I/O nodes fit the reserved
//                column. All checked before any placement work.
// Postconditions: the returned assignment is a bijection within grid
//                 bounds; its cost never exceeds the initial placement's.
// Failure modes: capacity shortfalls and routing-contract violations →
//                error `Diagnostic`s.
// Side effects: none (the manual mode reads/writes caller-supplied
//               streams).

use std::collections::HashSet;
use std::io::{BufRead, Write};

use rand::prelude::*;
use rand_chacha::ChaCha20Rng;

use crate::diag::{codes, Diagnostic};
use crate::flat::{validate_flat, FlatGraph, FlatId, FlatKind, IoKind};
use crate::grid::{Coordinate, Grid, Router, TileAssignment};

// ── Tuning constants ────────────────────────────────────────────────────────

/// Cap on start-temperature doublings during calibration.
pub const MAX_TEMP_ITERATIONS: u32 = 200;
/// Cap on stop-temperature halvings during calibration.
pub const MIN_TEMP_ITERATIONS: u32 = 200;
/// Swap proposals attempted at each temperature.
pub const PROPOSALS_PER_TEMP: u32 = 100;
/// Proposals measured per calibration step.
pub const CALIBRATION_TRIALS: u32 = 100;
/// Multiplicative cooling factor between temperatures.
pub const COOLING_FACTOR: f64 = 0.9;
/// Default random seed; a fixed seed reproduces identical layouts.
pub const DEFAULT_SEED: u64 = 17;

// ── Public types ────────────────────────────────────────────────────────────

/// Placer configuration: grid shape plus annealing knobs.
#[derive(Debug, Clone)]
pub struct LayoutOptions {
    pub rows: u32,
    pub cols: u32,
    pub seed: u64,
    pub proposals_per_temp: u32,
    pub cooling_factor: f64,
    pub max_temp_iterations: u32,
    pub min_temp_iterations: u32,
    pub calibration_trials: u32,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        LayoutOptions {
            rows: 4,
            cols: 4,
            seed: DEFAULT_SEED,
            proposals_per_temp: PROPOSALS_PER_TEMP,
            cooling_factor: COOLING_FACTOR,
            max_temp_iterations: MAX_TEMP_ITERATIONS,
            min_temp_iterations: MIN_TEMP_ITERATIONS,
            calibration_trials: CALIBRATION_TRIALS,
        }
    }
}

/// A finished placement: the best assignment seen and its cost.
#[derive(Debug, Clone)]
pub struct Placement {
    pub assignment: TileAssignment,
    pub grid: Grid,
    pub cost: f64,
    pub initial_cost: f64,
}

// ── Node classification ─────────────────────────────────────────────────────

/// Which flat nodes occupy tiles, which go to the I/O column, and which
/// joiners are live.
#[derive(Debug, Clone)]
pub struct NodeClasses {
    /// Tile-occupying nodes, in graph order.
    pub occupants: Vec<FlatId>,
    occupant_set: HashSet<FlatId>,
    /// I/O device nodes, in arrival (graph) order.
    pub io: Vec<FlatId>,
    /// Joiners that occupy a tile.
    pub joiners: HashSet<FlatId>,
}

/// Apply the tile-occupancy rule: non-identity, non-I/O filters always
/// occupy a tile; a joiner occupies one iff it has a non-zero incoming
/// weight and is not immediately followed by another joiner; splitters
/// and identities never do.
pub fn classify(graph: &FlatGraph) -> NodeClasses {
    let mut occupants = Vec::new();
    let mut io = Vec::new();
    let mut joiners = HashSet::new();
    for node in &graph.nodes {
        match node.kind {
            FlatKind::Filter => {
                if node.io.is_some() {
                    io.push(node.id);
                } else if !node.identity {
                    occupants.push(node.id);
                }
            }
            FlatKind::Joiner => {
                let next_is_joiner = node
                    .edges
                    .first()
                    .map(|&e| graph.node(e).kind == FlatKind::Joiner)
                    .unwrap_or(false);
                if !next_is_joiner && node.incoming_weights.iter().any(|&w| w != 0) {
                    joiners.insert(node.id);
                    occupants.push(node.id);
                }
            }
            FlatKind::Splitter => {}
        }
    }
    let occupant_set = occupants.iter().copied().collect();
    NodeClasses {
        occupants,
        occupant_set,
        io,
        joiners,
    }
}

/// The next tile-occupying consumers downstream of `node`, walking forward
/// through unassigned splitters, joiners, and pass-through filters.
/// Deterministic way-order traversal.
pub fn live_consumers(graph: &FlatGraph, classes: &NodeClasses, node: FlatId) -> Vec<FlatId> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for &edge in &graph.node(node).edges {
        walk_downstream(graph, classes, edge, &mut out, &mut seen);
    }
    out
}

fn walk_downstream(
    graph: &FlatGraph,
    classes: &NodeClasses,
    node: FlatId,
    out: &mut Vec<FlatId>,
    seen: &mut HashSet<FlatId>,
) {
    if !seen.insert(node) {
        return;
    }
    let n = graph.node(node);
    match n.kind {
        FlatKind::Filter => {
            if classes.occupant_set.contains(&node) {
                out.push(node);
            } else if let Some(&next) = n.edges.first() {
                walk_downstream(graph, classes, next, out, seen);
            }
        }
        FlatKind::Joiner => {
            if classes.joiners.contains(&node) {
                out.push(node);
            } else if let Some(&next) = n.edges.first() {
                walk_downstream(graph, classes, next, out, seen);
            }
        }
        FlatKind::Splitter => {
            for &next in &n.edges {
                walk_downstream(graph, classes, next, out, seen);
            }
        }
    }
}

// ── Cost function ───────────────────────────────────────────────────────────

/// Communication cost of an assignment. The congestion set is rebuilt on
/// every call, so evaluation is idempotent: occupied intermediate tiles
/// weigh 2, router tiles 0.5 on reuse.
pub fn evaluate_cost(
    graph: &FlatGraph,
    classes: &NodeClasses,
    grid: &Grid,
    router: &dyn Router,
    assignment: &TileAssignment,
) -> Result<f64, Diagnostic> {
    let mut router_tiles: HashSet<Coordinate> = HashSet::new();
    let mut sum = 0.0;

    let mut sources: Vec<FlatId> = classes.occupants.clone();
    sources.extend(
        classes
            .io
            .iter()
            .copied()
            .filter(|&id| graph.node(id).io == Some(IoKind::Reader)),
    );

    for &src in &sources {
        let from = match assignment.tile_of(src) {
            Some(c) => c,
            None => continue,
        };
        let src_node = graph.node(src);
        let through_splitter = src_node
            .edges
            .first()
            .map(|&e| graph.node(e).kind == FlatKind::Splitter)
            .unwrap_or(false);

        for dest in live_consumers(graph, classes, src) {
            let to = match assignment.tile_of(dest) {
                Some(c) => c,
                None => continue,
            };
            let path = router.route(grid, from, to)?;

            let mut congestion: f64 = 0.0;
            if path.len() > 2 {
                for &coord in &path[1..path.len() - 1] {
                    if assignment.node_at(coord).is_some() {
                        congestion += 2.0;
                    } else {
                        if router_tiles.contains(&coord) {
                            congestion += 0.5;
                        }
                        router_tiles.insert(coord);
                    }
                }
            }
            let hops = path.len().saturating_sub(2) as f64;

            let dest_node = graph.node(dest);
            let items: f64 = if through_splitter {
                if dest_node.kind == FlatKind::Filter {
                    (dest_node.exec_count * dest_node.pop as u64) as f64
                } else {
                    // Splitter feeding a feedback joiner: scale by the
                    // fraction of the joiner's input arriving on this path.
                    let rate = if dest_node.incoming_weights.len() >= 2
                        && dest_node.incoming_weights[0] > 0
                    {
                        dest_node.incoming_weights[0] as f64
                            / (dest_node.incoming_weights[0] + dest_node.incoming_weights[1])
                                as f64
                    } else {
                        1.0
                    };
                    dest_node.exec_count as f64 / rate
                }
            } else {
                let push = if src_node.kind == FlatKind::Joiner {
                    1
                } else {
                    src_node.push
                };
                (src_node.exec_count * push as u64) as f64
            };

            sum += items * hops
                + items * src_node.item_bytes as f64 * (congestion * 2.0).powi(3);
        }
    }
    Ok(sum)
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for layout postconditions (L1-L3).
#[derive(Debug, Clone)]
pub struct LayoutCert {
    /// L1: every tile-occupying node sits in the compute region and every
    /// I/O node in the reserved column.
    pub l1_regions_respected: bool,
    /// L2: the assignment is a bijection covering exactly the nodes that
    /// need tiles.
    pub l2_bijective: bool,
    /// L3: the result never costs more than the initial placement.
    pub l3_non_regression: bool,
}

impl crate::pass::StageCert for LayoutCert {
    fn all_pass(&self) -> bool {
        self.l1_regions_respected && self.l2_bijective && self.l3_non_regression
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("L1_regions_respected", self.l1_regions_respected),
            ("L2_bijective", self.l2_bijective),
            ("L3_non_regression", self.l3_non_regression),
        ]
    }
}

/// Verify layout postconditions.
pub fn verify_layout(graph: &FlatGraph, placement: &Placement) -> LayoutCert {
    let classes = classify(graph);
    let grid = &placement.grid;
    let ta = &placement.assignment;

    let l1 = classes
        .occupants
        .iter()
        .all(|&id| ta.tile_of(id).is_some_and(|c| grid.is_compute(c)))
        && classes
            .io
            .iter()
            .all(|&id| ta.tile_of(id).is_some_and(|c| grid.contains(c) && c.col == grid.cols));

    let pairs = ta.pairs();
    let coords: HashSet<Coordinate> = pairs.iter().map(|(_, c)| *c).collect();
    let l2 = pairs.len() == classes.occupants.len() + classes.io.len()
        && coords.len() == pairs.len()
        && coords.iter().all(|&c| grid.contains(c));

    let l3 = placement.cost <= placement.initial_cost;

    LayoutCert {
        l1_regions_respected: l1,
        l2_bijective: l2,
        l3_non_regression: l3,
    }
}

// ── Automatic placement ─────────────────────────────────────────────────────

/// Place `graph` onto the mesh, returning the best assignment found.
/// Deterministic for a fixed seed.
pub fn place(
    graph: &FlatGraph,
    opts: &LayoutOptions,
    router: &dyn Router,
) -> Result<Placement, Vec<Diagnostic>> {
    let diags = validate_flat(graph);
    if crate::diag::has_errors(&diags) {
        return Err(diags);
    }
    let classes = classify(graph);
    let grid = Grid::new(opts.rows, opts.cols, !classes.io.is_empty());
    check_capacity(&classes, &grid)?;

    let mut placer = Placer {
        graph,
        classes: &classes,
        grid: &grid,
        router,
        opts,
        assignment: TileAssignment::new(),
        rng: ChaCha20Rng::seed_from_u64(opts.seed),
    };
    placer.initial_placement();
    let (assignment, cost, initial_cost) = placer.anneal().map_err(|d| vec![d])?;

    Ok(Placement {
        assignment,
        grid,
        cost,
        initial_cost,
    })
}

fn check_capacity(classes: &NodeClasses, grid: &Grid) -> Result<(), Vec<Diagnostic>> {
    if classes.occupants.len() > grid.capacity() {
        return Err(vec![Diagnostic::error(
            codes::E0200,
            format!(
                "need {} tiles, have {} ({} rows x {} columns)",
                classes.occupants.len(),
                grid.capacity(),
                grid.rows,
                grid.cols
            ),
        )]);
    }
    if classes.io.len() > grid.rows as usize {
        return Err(vec![Diagnostic::error(
            codes::E0201,
            format!(
                "{} I/O nodes exceed the reserved column's {} rows",
                classes.io.len(),
                grid.rows
            ),
        )]);
    }
    Ok(())
}

struct Placer<'a> {
    graph: &'a FlatGraph,
    classes: &'a NodeClasses,
    grid: &'a Grid,
    router: &'a dyn Router,
    opts: &'a LayoutOptions,
    assignment: TileAssignment,
    rng: ChaCha20Rng,
}

impl<'a> Placer<'a> {
    fn cost(&self) -> Result<f64, Diagnostic> {
        evaluate_cost(
            self.graph,
            self.classes,
            self.grid,
            self.router,
            &self.assignment,
        )
    }

    /// I/O nodes fill the reserved column top-down in arrival order; the
    /// remaining occupants take compute tiles in graph order.
    fn initial_placement(&mut self) {
        for (row, &id) in self.classes.io.iter().enumerate() {
            let tile = self.grid.io_tile(row as u32).expect("io column checked");
            self.assignment.assign(tile, id);
        }
        for (i, &id) in self.classes.occupants.iter().enumerate() {
            self.assignment.assign(self.grid.compute_tile(i), id);
        }
    }

    /// Propose one random swap; keep it under the Metropolis criterion.
    fn perturb(&mut self, t: f64) -> Result<bool, Diagnostic> {
        let e_old = self.cost()?;

        let (a, b) = loop {
            let first = self.rng.gen_range(0..self.grid.capacity());
            let second = self.rng.gen_range(0..self.grid.capacity());
            if first == second {
                continue;
            }
            let ca = self.grid.compute_tile(first);
            let cb = self.grid.compute_tile(second);
            if self.assignment.node_at(ca).is_none() && self.assignment.node_at(cb).is_none() {
                continue;
            }
            break (ca, cb);
        };

        self.assignment.swap(a, b);
        let e_new = self.cost()?;
        let p = if e_new >= e_old {
            (-(e_new - e_old) / t).exp()
        } else {
            1.0
        };
        if self.rng.gen::<f64>() < p {
            Ok(true)
        } else {
            self.assignment.swap(a, b);
            Ok(false)
        }
    }

    /// Double the temperature until almost every proposal is accepted.
    fn calibrate_max_temp(&mut self) -> Result<f64, Diagnostic> {
        let mut t = 1.0;
        let snapshot = self.assignment.clone();
        for _ in 0..self.opts.max_temp_iterations {
            t *= 2.0;
            let mut accepted = 0u32;
            for _ in 0..self.opts.calibration_trials {
                self.assignment = snapshot.clone();
                if self.perturb(t)? {
                    accepted += 1;
                }
            }
            if accepted as f64 / self.opts.calibration_trials as f64 > 0.9 {
                break;
            }
        }
        self.assignment = snapshot;
        Ok(t)
    }

    /// Halve the temperature until almost every proposal is rejected.
    fn calibrate_min_temp(&mut self) -> Result<f64, Diagnostic> {
        let mut t = 1.0;
        let snapshot = self.assignment.clone();
        for _ in 0..self.opts.min_temp_iterations {
            t *= 0.5;
            let mut accepted = 0u32;
            for _ in 0..self.opts.calibration_trials {
                self.assignment = snapshot.clone();
                if self.perturb(t)? {
                    accepted += 1;
                }
            }
            if (accepted as f64 / self.opts.calibration_trials as f64) < 0.1 {
                break;
            }
        }
        self.assignment = snapshot;
        Ok(t)
    }

    /// Two annealing passes; the second restarts from the best assignment
    /// the first found. Returns (best assignment, best cost, initial cost).
    fn anneal(&mut self) -> Result<(TileAssignment, f64, f64), Diagnostic> {
        let initial_cost = self.cost()?;
        let mut best = self.assignment.clone();
        let mut best_cost = initial_cost;

        // Nothing to swap with fewer than two occupants.
        if self.classes.occupants.len() < 2 {
            return Ok((best, best_cost, initial_cost));
        }

        for _ in 0..2 {
            let t_start = self.calibrate_max_temp()?;
            let t_final = self.calibrate_min_temp()?;
            let mut t = t_start;
            loop {
                let mut accepted = 0u32;
                for _ in 0..self.opts.proposals_per_temp {
                    if self.perturb(t)? {
                        accepted += 1;
                    }
                    if self.cost()? == 0.0 {
                        break;
                    }
                }
                t *= self.opts.cooling_factor;
                let current = self.cost()?;
                if current < best_cost {
                    best_cost = current;
                    best = self.assignment.clone();
                }
                if accepted == 0 || current == 0.0 || t <= t_final {
                    break;
                }
            }
            // Re-seed the refinement pass from the best state so far.
            self.assignment = best.clone();
        }

        Ok((best, best_cost, initial_cost))
    }
}

// ── Manual placement ────────────────────────────────────────────────────────

/// Interactive fallback: the operator assigns each tile-occupying node an
/// explicit coordinate. Bad input re-prompts; it is never fatal. The same
/// cost function scores the final layout.
pub fn hand_assign<R: BufRead, W: Write>(
    graph: &FlatGraph,
    opts: &LayoutOptions,
    router: &dyn Router,
    input: &mut R,
    out: &mut W,
) -> Result<Placement, Vec<Diagnostic>> {
    let diags = validate_flat(graph);
    if crate::diag::has_errors(&diags) {
        return Err(diags);
    }
    let classes = classify(graph);
    let grid = Grid::new(opts.rows, opts.cols, !classes.io.is_empty());
    check_capacity(&classes, &grid)?;

    let mut assignment = TileAssignment::new();
    for (row, &id) in classes.io.iter().enumerate() {
        let tile = grid.io_tile(row as u32).expect("io column checked");
        assignment.assign(tile, id);
    }

    write_line(out, "Enter desired tile for each node...")?;
    for &id in &classes.occupants {
        loop {
            write_line(out, &graph.node(id).name)?;
            let row = match prompt_value(input, out, "Row: ", grid.rows)? {
                Some(v) => v,
                None => continue,
            };
            let col = match prompt_value(input, out, "Column: ", grid.cols)? {
                Some(v) => v,
                None => continue,
            };
            let coord = Coordinate::new(row, col);
            if assignment.node_at(coord).is_some() {
                write_line(out, "Tile already assigned; try again.")?;
                continue;
            }
            assignment.assign(coord, id);
            break;
        }
    }

    let cost = evaluate_cost(graph, &classes, &grid, router, &assignment).map_err(|d| vec![d])?;
    Ok(Placement {
        assignment,
        grid,
        cost,
        initial_cost: cost,
    })
}

/// Prompt for one bounded value. `Ok(None)` means invalid input that was
/// reported; the caller restarts the node. Exhausted input is fatal.
fn prompt_value<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    prompt: &str,
    bound: u32,
) -> Result<Option<u32>, Vec<Diagnostic>> {
    write!(out, "{prompt}").map_err(io_diag)?;
    out.flush().map_err(io_diag)?;
    let mut line = String::new();
    let read = input.read_line(&mut line).map_err(io_diag)?;
    if read == 0 {
        return Err(vec![Diagnostic::new(
            crate::diag::DiagLevel::Error,
            "manual placement input ended before all nodes were assigned",
        )]);
    }
    match line.trim().parse::<i64>() {
        Ok(v) if v < 0 => {
            write_line(out, "Negative value; try again.")?;
            Ok(None)
        }
        Ok(v) if v >= bound as i64 => {
            write_line(out, "Value too large; try again.")?;
            Ok(None)
        }
        Ok(v) => Ok(Some(v as u32)),
        Err(_) => {
            write_line(out, "Error; try again.")?;
            Ok(None)
        }
    }
}

fn write_line<W: Write>(out: &mut W, line: &str) -> Result<(), Vec<Diagnostic>> {
    writeln!(out, "{line}").map_err(io_diag)
}

fn io_diag(err: std::io::Error) -> Vec<Diagnostic> {
    vec![Diagnostic::new(
        crate::diag::DiagLevel::Error,
        format!("manual placement I/O failure: {err}"),
    )]
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat::FlatNode;
    use crate::grid::XyRouter;
    use std::io::Cursor;

    fn node(id: u32, kind: FlatKind, edges: Vec<u32>) -> FlatNode {
        FlatNode {
            id: FlatId(id),
            name: format!("n{id}"),
            kind,
            edges: edges.into_iter().map(FlatId).collect(),
            incoming: Vec::new(),
            incoming_weights: Vec::new(),
            exec_count: 1,
            push: 1,
            pop: 1,
            item_bytes: 4,
            identity: false,
            io: None,
        }
    }

    /// producer (100 executions, push 1) -> consumer
    fn two_node_graph() -> FlatGraph {
        let mut producer = node(0, FlatKind::Filter, vec![1]);
        producer.exec_count = 100;
        let mut consumer = node(1, FlatKind::Filter, vec![]);
        consumer.exec_count = 100;
        FlatGraph {
            nodes: vec![producer, consumer],
        }
    }

    fn chain_graph(n: u32) -> FlatGraph {
        let nodes = (0..n)
            .map(|i| {
                let edges = if i + 1 < n { vec![i + 1] } else { vec![] };
                let mut fnode = node(i, FlatKind::Filter, edges);
                fnode.exec_count = 10;
                fnode
            })
            .collect();
        FlatGraph { nodes }
    }

    fn small_opts() -> LayoutOptions {
        LayoutOptions {
            rows: 2,
            cols: 2,
            proposals_per_temp: 30,
            max_temp_iterations: 20,
            min_temp_iterations: 20,
            calibration_trials: 20,
            ..LayoutOptions::default()
        }
    }

    // ── Classification ──────────────────────────────────────────────────

    #[test]
    fn identity_filters_do_not_occupy_tiles() {
        let mut g = chain_graph(3);
        g.nodes[1].identity = true;
        let classes = classify(&g);
        assert_eq!(classes.occupants, vec![FlatId(0), FlatId(2)]);
    }

    #[test]
    fn joiner_occupancy_rules() {
        // j1 feeds j2: j1 is absorbed into j2; j2 occupies a tile.
        let mut j1 = node(0, FlatKind::Joiner, vec![1]);
        j1.incoming = vec![FlatId(2)];
        j1.incoming_weights = vec![1];
        let mut j2 = node(1, FlatKind::Joiner, vec![]);
        j2.incoming = vec![FlatId(0)];
        j2.incoming_weights = vec![1];
        let f = node(2, FlatKind::Filter, vec![0]);
        let g = FlatGraph {
            nodes: vec![j1, j2, f],
        };
        let classes = classify(&g);
        assert!(!classes.joiners.contains(&FlatId(0)));
        assert!(classes.joiners.contains(&FlatId(1)));
    }

    #[test]
    fn zero_weight_joiner_is_free() {
        let mut j = node(0, FlatKind::Joiner, vec![]);
        j.incoming = vec![FlatId(1)];
        j.incoming_weights = vec![0];
        let f = node(1, FlatKind::Filter, vec![0]);
        let g = FlatGraph { nodes: vec![j, f] };
        let classes = classify(&g);
        assert!(classes.joiners.is_empty());
    }

    // ── Downstream walk ─────────────────────────────────────────────────

    #[test]
    fn consumers_skip_identities_and_fan_out_through_splitters() {
        // f0 -> identity -> splitter -> {f3, f4}
        let f0 = node(0, FlatKind::Filter, vec![1]);
        let mut idn = node(1, FlatKind::Filter, vec![2]);
        idn.identity = true;
        let sp = node(2, FlatKind::Splitter, vec![3, 4]);
        let f3 = node(3, FlatKind::Filter, vec![]);
        let f4 = node(4, FlatKind::Filter, vec![]);
        let g = FlatGraph {
            nodes: vec![f0, idn, sp, f3, f4],
        };
        let classes = classify(&g);
        let consumers = live_consumers(&g, &classes, FlatId(0));
        assert_eq!(consumers, vec![FlatId(3), FlatId(4)]);
    }

    // ── Cost function ───────────────────────────────────────────────────

    fn manual_assignment(pairs: &[(u32, (u32, u32))]) -> TileAssignment {
        let mut ta = TileAssignment::new();
        for &(id, (r, c)) in pairs {
            ta.assign(Coordinate::new(r, c), FlatId(id));
        }
        ta
    }

    #[test]
    fn adjacent_beats_diagonal() {
        let g = two_node_graph();
        let classes = classify(&g);
        let grid = Grid::new(2, 2, false);
        let adjacent = manual_assignment(&[(0, (0, 0)), (1, (0, 1))]);
        let diagonal = manual_assignment(&[(0, (0, 0)), (1, (1, 1))]);
        let c_adj = evaluate_cost(&g, &classes, &grid, &XyRouter, &adjacent).unwrap();
        let c_diag = evaluate_cost(&g, &classes, &grid, &XyRouter, &diagonal).unwrap();
        assert!(
            c_adj < c_diag,
            "adjacent ({c_adj}) should beat diagonal ({c_diag})"
        );
    }

    #[test]
    fn cost_evaluation_is_idempotent() {
        let g = chain_graph(4);
        let classes = classify(&g);
        let grid = Grid::new(2, 2, false);
        let ta = manual_assignment(&[(0, (0, 0)), (1, (1, 1)), (2, (0, 1)), (3, (1, 0))]);
        let first = evaluate_cost(&g, &classes, &grid, &XyRouter, &ta).unwrap();
        let second = evaluate_cost(&g, &classes, &grid, &XyRouter, &ta).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn occupied_intermediate_tile_raises_cost() {
        // Flow 0 -> 1 crosses the middle tile of a 1x3 row.
        let mut g = two_node_graph();
        g.nodes.push(node(2, FlatKind::Filter, vec![]));
        let classes = classify(&g);
        let grid = Grid::new(1, 3, false);
        let clear = manual_assignment(&[(0, (0, 0)), (1, (0, 2)), (2, (0, 1))]);
        let bystander_elsewhere = {
            let mut g2 = two_node_graph();
            g2.nodes.push(node(2, FlatKind::Filter, vec![]));
            g2
        };
        let classes2 = classify(&bystander_elsewhere);
        let grid2 = Grid::new(2, 3, false);
        let free_path = manual_assignment(&[(0, (0, 0)), (1, (0, 2)), (2, (1, 0))]);
        let blocked = evaluate_cost(&g, &classes, &grid, &XyRouter, &clear).unwrap();
        let unblocked =
            evaluate_cost(&bystander_elsewhere, &classes2, &grid2, &XyRouter, &free_path)
                .unwrap();
        assert!(
            blocked > unblocked,
            "occupied intermediate ({blocked}) should cost more than free ({unblocked})"
        );
    }

    // ── Automatic placement ─────────────────────────────────────────────

    #[test]
    fn capacity_shortfall_fails_before_placement() {
        let g = chain_graph(5);
        let result = place(&g, &small_opts(), &XyRouter);
        let diags = result.err().expect("5 nodes cannot fit 2x2");
        assert!(diags.iter().any(|d| d.code == Some(codes::E0200)));
    }

    #[test]
    fn io_column_overflow_is_fatal() {
        let mut g = chain_graph(3);
        for n in g.nodes.iter_mut() {
            n.io = Some(IoKind::Reader);
            n.edges.clear();
        }
        let result = place(&g, &small_opts(), &XyRouter);
        let diags = result.err().expect("3 io nodes cannot fit 2 rows");
        assert!(diags.iter().any(|d| d.code == Some(codes::E0201)));
    }

    #[test]
    fn placement_feasible_and_non_regressing() {
        use crate::pass::StageCert;
        let g = chain_graph(4);
        let placement = place(&g, &small_opts(), &XyRouter).unwrap();
        let cert = verify_layout(&g, &placement);
        assert!(cert.all_pass(), "cert failed: {:?}", cert.obligations());
        assert!(placement.cost <= placement.initial_cost);
    }

    #[test]
    fn same_seed_reproduces_layout() {
        let g = chain_graph(4);
        let opts = small_opts();
        let a = place(&g, &opts, &XyRouter).unwrap();
        let b = place(&g, &opts, &XyRouter).unwrap();
        assert_eq!(a.assignment.pairs(), b.assignment.pairs());
        assert_eq!(a.cost, b.cost);
    }

    #[test]
    fn different_seeds_allowed_to_differ() {
        // Not asserting inequality (seeds may converge), only that both
        // runs succeed and verify.
        use crate::pass::StageCert;
        let g = chain_graph(4);
        let mut opts = small_opts();
        let a = place(&g, &opts, &XyRouter).unwrap();
        opts.seed = 99;
        let b = place(&g, &opts, &XyRouter).unwrap();
        assert!(verify_layout(&g, &a).all_pass());
        assert!(verify_layout(&g, &b).all_pass());
    }

    #[test]
    fn io_nodes_pinned_to_reserved_column() {
        let mut g = chain_graph(3);
        g.nodes[0].io = Some(IoKind::Reader);
        let placement = place(&g, &small_opts(), &XyRouter).unwrap();
        let coord = placement.assignment.tile_of(FlatId(0)).unwrap();
        assert_eq!(coord.col, placement.grid.cols);
    }

    #[test]
    fn single_occupant_skips_annealing() {
        let g = chain_graph(1);
        let placement = place(&g, &small_opts(), &XyRouter).unwrap();
        assert_eq!(placement.assignment.len(), 1);
        assert_eq!(placement.cost, placement.initial_cost);
    }

    // ── Manual placement ────────────────────────────────────────────────

    #[test]
    fn hand_assign_reads_coordinates() {
        let g = two_node_graph();
        let mut input = Cursor::new("0\n0\n0\n1\n");
        let mut out = Vec::new();
        let placement =
            hand_assign(&g, &small_opts(), &XyRouter, &mut input, &mut out).unwrap();
        assert_eq!(
            placement.assignment.tile_of(FlatId(0)),
            Some(Coordinate::new(0, 0))
        );
        assert_eq!(
            placement.assignment.tile_of(FlatId(1)),
            Some(Coordinate::new(0, 1))
        );
    }

    #[test]
    fn hand_assign_rejects_duplicates_and_bad_values() {
        let g = two_node_graph();
        // node 0: (0,0). node 1: duplicate (0,0), then out-of-range row,
        // then garbage, then valid (1,1).
        let mut input = Cursor::new("0\n0\n0\n0\n9\nx\n1\n1\n");
        let mut out = Vec::new();
        let placement =
            hand_assign(&g, &small_opts(), &XyRouter, &mut input, &mut out).unwrap();
        assert_eq!(
            placement.assignment.tile_of(FlatId(1)),
            Some(Coordinate::new(1, 1))
        );
        let transcript = String::from_utf8(out).unwrap();
        assert!(transcript.contains("already assigned"));
        assert!(transcript.contains("too large"));
    }

    #[test]
    fn hand_assign_eof_is_fatal() {
        let g = two_node_graph();
        let mut input = Cursor::new("0\n0\n");
        let mut out = Vec::new();
        let result = hand_assign(&g, &small_opts(), &XyRouter, &mut input, &mut out);
        assert!(result.is_err());
    }
}
