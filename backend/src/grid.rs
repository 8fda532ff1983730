// grid.rs — Mesh grid, routing seam, and the tile assignment table
//
// Coordinates are pre-allocated once per run. Routing is behind the
// `Router` trait: the hardware router is an external collaborator, and the
// placer only ever asks for paths. `XyRouter` is the default mesh
// implementation. The tile assignment is one owned structure holding both
// lookup directions so they cannot diverge.
//
// Preconditions: grid dimensions are non-zero.
// Postconditions: none.
// Failure modes: route queries outside the mesh → `Diagnostic` (E0400).
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diag::{codes, Diagnostic};
use crate::flat::FlatId;

// ── Coordinates ─────────────────────────────────────────────────────────────

/// A physical tile position on the mesh.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Coordinate {
    pub row: u32,
    pub col: u32,
}

impl Coordinate {
    pub fn new(row: u32, col: u32) -> Self {
        Coordinate { row, col }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.row, self.col)
    }
}

/// Compass step between two adjacent tiles, or `Stay` for a self-route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    South,
    East,
    West,
    Stay,
}

impl Direction {
    /// The switch-code mnemonic for this step.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Direction::North => "N",
            Direction::South => "S",
            Direction::East => "E",
            Direction::West => "W",
            Direction::Stay => "st",
        }
    }
}

/// True if the two tiles share an orthogonal mesh link.
pub fn are_neighbors(a: Coordinate, b: Coordinate) -> bool {
    if a == b {
        return false;
    }
    (a.row == b.row && a.col.abs_diff(b.col) == 1)
        || (a.col == b.col && a.row.abs_diff(b.row) == 1)
}

/// The compass direction from `from` to its neighbor `to`.
///
/// Calling this on non-neighbors is an internal invariant break.
pub fn direction(from: Coordinate, to: Coordinate) -> Result<Direction, Diagnostic> {
    if from == to {
        return Ok(Direction::Stay);
    }
    if !are_neighbors(from, to) {
        return Err(Diagnostic::error(
            codes::E0400,
            format!("direction requested between non-neighbors {from} and {to}"),
        ));
    }
    Ok(if from.row == to.row {
        if from.col < to.col {
            Direction::East
        } else {
            Direction::West
        }
    } else if from.row < to.row {
        Direction::South
    } else {
        Direction::North
    })
}

// ── Grid ────────────────────────────────────────────────────────────────────

/// A fixed-size mesh of tiles, optionally widened by one reserved I/O
/// column at index `cols`.
#[derive(Debug, Clone)]
pub struct Grid {
    pub rows: u32,
    pub cols: u32,
    pub io_column: bool,
}

impl Grid {
    pub fn new(rows: u32, cols: u32, io_column: bool) -> Self {
        assert!(rows > 0 && cols > 0, "grid dimensions must be non-zero");
        Grid {
            rows,
            cols,
            io_column,
        }
    }

    /// Compute-tile capacity (the I/O column is not counted).
    pub fn capacity(&self) -> usize {
        (self.rows * self.cols) as usize
    }

    /// Total columns including the reserved I/O column when present.
    pub fn total_cols(&self) -> u32 {
        self.cols + if self.io_column { 1 } else { 0 }
    }

    pub fn contains(&self, c: Coordinate) -> bool {
        c.row < self.rows && c.col < self.total_cols()
    }

    /// True for coordinates in the compute region (excludes the I/O column).
    pub fn is_compute(&self, c: Coordinate) -> bool {
        c.row < self.rows && c.col < self.cols
    }

    /// The `index`-th compute tile in row-major order.
    pub fn compute_tile(&self, index: usize) -> Coordinate {
        debug_assert!(index < self.capacity());
        Coordinate::new(index as u32 / self.cols, index as u32 % self.cols)
    }

    /// The reserved I/O tile on `row`, if the grid has an I/O column.
    pub fn io_tile(&self, row: u32) -> Option<Coordinate> {
        if self.io_column && row < self.rows {
            Some(Coordinate::new(row, self.cols))
        } else {
            None
        }
    }

    /// All coordinates in row-major order, I/O column included.
    pub fn all_tiles(&self) -> Vec<Coordinate> {
        let mut tiles = Vec::with_capacity((self.rows * self.total_cols()) as usize);
        for row in 0..self.rows {
            for col in 0..self.total_cols() {
                tiles.push(Coordinate::new(row, col));
            }
        }
        tiles
    }

    /// East and south neighbors within the compute region. One direction
    /// per link keeps the DOT adjacency free of duplicate edges.
    pub fn forward_neighbors(&self, c: Coordinate) -> Vec<Coordinate> {
        let mut out = Vec::with_capacity(2);
        if c.col + 1 < self.cols {
            out.push(Coordinate::new(c.row, c.col + 1));
        }
        if c.row + 1 < self.rows {
            out.push(Coordinate::new(c.row + 1, c.col));
        }
        out
    }
}

// ── Router seam ─────────────────────────────────────────────────────────────

/// The external point-to-point routing function: an ordered tile path from
/// `from` to `to`, both endpoints included. Must be pure and deterministic;
/// the placer's reproducibility guarantee depends on it.
pub trait Router {
    fn route(
        &self,
        grid: &Grid,
        from: Coordinate,
        to: Coordinate,
    ) -> Result<Vec<Coordinate>, Diagnostic>;
}

/// Dimension-ordered routing: first along the row (X), then along the
/// column (Y). Matches the mesh's static network behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct XyRouter;

impl Router for XyRouter {
    fn route(
        &self,
        grid: &Grid,
        from: Coordinate,
        to: Coordinate,
    ) -> Result<Vec<Coordinate>, Diagnostic> {
        if !grid.contains(from) || !grid.contains(to) {
            return Err(Diagnostic::error(
                codes::E0400,
                format!("route requested outside the mesh: {from} -> {to}"),
            ));
        }
        let mut path = vec![from];
        let mut cur = from;
        while cur.col != to.col {
            cur.col = if cur.col < to.col { cur.col + 1 } else { cur.col - 1 };
            path.push(cur);
        }
        while cur.row != to.row {
            cur.row = if cur.row < to.row { cur.row + 1 } else { cur.row - 1 };
            path.push(cur);
        }
        Ok(path)
    }
}

// ── Tile assignment ─────────────────────────────────────────────────────────

/// The (partial) bijection between flat-graph nodes and tile coordinates.
///
/// Both lookup directions live in one structure and every mutation updates
/// them together, so a mid-failure state is always consistent. Cloned for
/// best-cost snapshots during annealing.
#[derive(Debug, Clone, Default)]
pub struct TileAssignment {
    by_tile: HashMap<Coordinate, FlatId>,
    by_node: HashMap<FlatId, Coordinate>,
}

impl TileAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `node` to `coord`, displacing any previous binding of either.
    pub fn assign(&mut self, coord: Coordinate, node: FlatId) {
        if let Some(old_coord) = self.by_node.remove(&node) {
            self.by_tile.remove(&old_coord);
        }
        if let Some(old_node) = self.by_tile.remove(&coord) {
            self.by_node.remove(&old_node);
        }
        self.by_tile.insert(coord, node);
        self.by_node.insert(node, coord);
    }

    /// Empty `coord`, if occupied.
    pub fn clear_tile(&mut self, coord: Coordinate) {
        if let Some(node) = self.by_tile.remove(&coord) {
            self.by_node.remove(&node);
        }
    }

    /// Exchange the occupants of two tiles; either side may be empty.
    pub fn swap(&mut self, a: Coordinate, b: Coordinate) {
        let na = self.by_tile.get(&a).copied();
        let nb = self.by_tile.get(&b).copied();
        self.clear_tile(a);
        self.clear_tile(b);
        if let Some(n) = nb {
            self.assign(a, n);
        }
        if let Some(n) = na {
            self.assign(b, n);
        }
    }

    pub fn node_at(&self, coord: Coordinate) -> Option<FlatId> {
        self.by_tile.get(&coord).copied()
    }

    pub fn tile_of(&self, node: FlatId) -> Option<Coordinate> {
        self.by_node.get(&node).copied()
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }

    /// (node, tile) pairs sorted by node id, for deterministic output.
    pub fn pairs(&self) -> Vec<(FlatId, Coordinate)> {
        let mut pairs: Vec<_> = self.by_node.iter().map(|(n, c)| (*n, *c)).collect();
        pairs.sort_by_key(|(n, _)| *n);
        pairs
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_tiles_row_major() {
        let g = Grid::new(2, 3, false);
        assert_eq!(g.capacity(), 6);
        assert_eq!(g.compute_tile(0), Coordinate::new(0, 0));
        assert_eq!(g.compute_tile(4), Coordinate::new(1, 1));
    }

    #[test]
    fn io_column_outside_compute_region() {
        let g = Grid::new(2, 2, true);
        let io = g.io_tile(1).unwrap();
        assert_eq!(io, Coordinate::new(1, 2));
        assert!(g.contains(io));
        assert!(!g.is_compute(io));
        assert!(Grid::new(2, 2, false).io_tile(0).is_none());
    }

    #[test]
    fn neighbors_and_directions() {
        let a = Coordinate::new(1, 1);
        assert!(are_neighbors(a, Coordinate::new(1, 2)));
        assert!(are_neighbors(a, Coordinate::new(0, 1)));
        assert!(!are_neighbors(a, Coordinate::new(0, 0)));
        assert!(!are_neighbors(a, a));

        assert_eq!(
            direction(a, Coordinate::new(1, 2)).unwrap(),
            Direction::East
        );
        assert_eq!(
            direction(a, Coordinate::new(0, 1)).unwrap(),
            Direction::North
        );
        assert_eq!(direction(a, a).unwrap(), Direction::Stay);
        assert!(direction(a, Coordinate::new(0, 0)).is_err());
    }

    #[test]
    fn xy_route_column_first() {
        let g = Grid::new(4, 4, false);
        let path = XyRouter
            .route(&g, Coordinate::new(0, 0), Coordinate::new(2, 2))
            .unwrap();
        assert_eq!(path.first(), Some(&Coordinate::new(0, 0)));
        assert_eq!(path.last(), Some(&Coordinate::new(2, 2)));
        // 0,0 -> 0,1 -> 0,2 -> 1,2 -> 2,2
        assert_eq!(path.len(), 5);
        assert_eq!(path[1], Coordinate::new(0, 1));
        for pair in path.windows(2) {
            assert!(are_neighbors(pair[0], pair[1]));
        }
    }

    #[test]
    fn route_outside_mesh_is_fatal() {
        let g = Grid::new(2, 2, false);
        let err = XyRouter
            .route(&g, Coordinate::new(0, 0), Coordinate::new(5, 5))
            .unwrap_err();
        assert_eq!(err.code, Some(codes::E0400));
    }

    #[test]
    fn assignment_stays_bijective() {
        let mut ta = TileAssignment::new();
        let (a, b) = (Coordinate::new(0, 0), Coordinate::new(0, 1));
        ta.assign(a, FlatId(0));
        ta.assign(b, FlatId(1));
        // Rebinding a node moves it rather than duplicating it.
        ta.assign(b, FlatId(0));
        assert_eq!(ta.len(), 1);
        assert_eq!(ta.node_at(a), None);
        assert_eq!(ta.node_at(b), Some(FlatId(0)));
        assert_eq!(ta.tile_of(FlatId(0)), Some(b));
    }

    #[test]
    fn swap_exchanges_occupants() {
        let mut ta = TileAssignment::new();
        let (a, b, c) = (
            Coordinate::new(0, 0),
            Coordinate::new(0, 1),
            Coordinate::new(1, 0),
        );
        ta.assign(a, FlatId(0));
        ta.assign(b, FlatId(1));
        ta.swap(a, b);
        assert_eq!(ta.node_at(a), Some(FlatId(1)));
        assert_eq!(ta.node_at(b), Some(FlatId(0)));
        // Swapping with an empty tile moves the occupant.
        ta.swap(a, c);
        assert_eq!(ta.node_at(a), None);
        assert_eq!(ta.node_at(c), Some(FlatId(1)));
        assert_eq!(ta.len(), 2);
    }
}
