// flat.rs — Flattened dataflow graph model
//
// The graph form consumed by the placer: explicit nodes and directed edges
// produced by the external flattening stage after partitioning. Read-only
// here; the placer keeps its tile assignment in a side table.
//
// Preconditions: edge and weight indices are in range (checked by
//                `validate_flat` before placement).
// Postconditions: none (model + validation only).
// Failure modes: validation emits `Diagnostic` errors for malformed graphs.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diag::{codes, Diagnostic};

// ── Public types ────────────────────────────────────────────────────────────

/// Index of a node within a `FlatGraph`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FlatId(pub u32);

/// Discriminates what a flat node carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlatKind {
    Filter,
    Splitter,
    Joiner,
}

/// Marks a node as an I/O device endpoint, placed in the reserved column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoKind {
    Reader,
    Writer,
}

/// A node in the flattened dataflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatNode {
    pub id: FlatId,
    pub name: String,
    pub kind: FlatKind,
    /// Outgoing edges in way order.
    pub edges: Vec<FlatId>,
    /// Incoming edges, parallel to `incoming_weights`.
    #[serde(default)]
    pub incoming: Vec<FlatId>,
    #[serde(default)]
    pub incoming_weights: Vec<u32>,
    /// Steady-state execution count (oracle-supplied).
    pub exec_count: u64,
    #[serde(default)]
    pub push: u32,
    #[serde(default)]
    pub pop: u32,
    /// Size in bytes of one output item.
    #[serde(default = "default_item_bytes")]
    pub item_bytes: u32,
    #[serde(default)]
    pub identity: bool,
    #[serde(default)]
    pub io: Option<IoKind>,
}

fn default_item_bytes() -> u32 {
    4
}

/// The flattened dataflow graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlatGraph {
    pub nodes: Vec<FlatNode>,
}

impl FlatGraph {
    pub fn node(&self, id: FlatId) -> &FlatNode {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids in graph order.
    pub fn ids(&self) -> impl Iterator<Item = FlatId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }
}

// ── Validation ──────────────────────────────────────────────────────────────

/// Check that every edge and weight reference is in range and that node
/// ids match their positions.
pub fn validate_flat(graph: &FlatGraph) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let n = graph.nodes.len() as u32;
    for (i, node) in graph.nodes.iter().enumerate() {
        if node.id.0 != i as u32 {
            diags.push(
                Diagnostic::error(
                    codes::E0104,
                    format!("node id {} does not match its position {}", node.id.0, i),
                )
                .with_subject(node.name.clone()),
            );
        }
        for edge in node.edges.iter().chain(node.incoming.iter()) {
            if edge.0 >= n {
                diags.push(
                    Diagnostic::error(
                        codes::E0104,
                        format!("edge target {} out of range ({} nodes)", edge.0, n),
                    )
                    .with_subject(node.name.clone()),
                );
            }
        }
        if node.incoming_weights.len() != node.incoming.len() {
            diags.push(
                Diagnostic::error(
                    codes::E0104,
                    format!(
                        "{} incoming edges but {} incoming weights",
                        node.incoming.len(),
                        node.incoming_weights.len()
                    ),
                )
                .with_subject(node.name.clone()),
            );
        }
    }
    diags
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for FlatGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let edges: usize = self.nodes.iter().map(|n| n.edges.len()).sum();
        writeln!(f, "FlatGraph ({} nodes, {} edges)", self.nodes.len(), edges)?;
        for node in &self.nodes {
            writeln!(
                f,
                "  {} '{}' {:?} exec={} ways={:?}",
                node.id.0,
                node.name,
                node.kind,
                node.exec_count,
                node.edges.iter().map(|e| e.0).collect::<Vec<_>>()
            )?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn validate_accepts_chain() {
        let g = FlatGraph {
            nodes: vec![
                node(0, FlatKind::Filter, vec![1]),
                node(1, FlatKind::Filter, vec![]),
            ],
        };
        assert!(validate_flat(&g).is_empty());
    }

    #[test]
    fn validate_rejects_dangling_edge() {
        let g = FlatGraph {
            nodes: vec![node(0, FlatKind::Filter, vec![7])],
        };
        let diags = validate_flat(&g);
        assert!(diags.iter().any(|d| d.code == Some(codes::E0104)));
    }

    #[test]
    fn validate_rejects_misplaced_id() {
        let g = FlatGraph {
            nodes: vec![node(3, FlatKind::Filter, vec![])],
        };
        let diags = validate_flat(&g);
        assert!(!diags.is_empty());
    }

    #[test]
    fn validate_rejects_weight_mismatch() {
        let mut n = node(0, FlatKind::Joiner, vec![]);
        n.incoming = vec![FlatId(0)];
        n.incoming_weights = vec![];
        let g = FlatGraph { nodes: vec![n] };
        let diags = validate_flat(&g);
        assert!(diags.iter().any(|d| d.code == Some(codes::E0104)));
    }

    #[test]
    fn serde_defaults_apply() {
        let json = r#"{"nodes":[{"id":0,"name":"f","kind":"Filter","edges":[],"exec_count":5}]}"#;
        let g: FlatGraph = serde_json::from_str(json).unwrap();
        assert_eq!(g.node(FlatId(0)).item_bytes, 4);
        assert_eq!(g.node(FlatId(0)).push, 0);
        assert!(g.node(FlatId(0)).io.is_none());
    }
}
