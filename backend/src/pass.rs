// pass.rs — Pass descriptors and the verification cert seam
//
// Declares the backend's two passes, their artifacts, and the dependency
// resolution the runner uses. The external flattening stage sits between
// them: the placer's flat graph arrives in the backend input rather than
// as a pass artifact, so the passes carry no edge between them.

use std::collections::HashSet;

// ── Verification seam ──────────────────────────────────────────────────────

/// Machine-checkable pass postconditions. Each pass produces a cert the
/// runner can fold into diagnostics on failure.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each backend pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Partition,
    Place,
}

/// Machine-readable artifact identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Partition,       // PartitionOutcome
    RewrittenStream, // StreamNode (transform mode)
    Placement,       // Placement
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a backend pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Partition => PassDescriptor {
            name: "partition",
            inputs: &[],
            outputs: &[ArtifactId::Partition, ArtifactId::RewrittenStream],
            invariants: "records cover every operator exactly once; \
                         bottleneck non-increasing in the budget",
        },
        PassId::Place => PassDescriptor {
            name: "place",
            inputs: &[],
            outputs: &[ArtifactId::Placement],
            invariants: "assignment is a bounded bijection; best-tracked \
                         cost never exceeds the initial placement; the flat \
                         graph arrives from the external flattener",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// Both pass IDs in pipeline order.
pub const ALL_PASSES: [PassId; 2] = [PassId::Partition, PassId::Place];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_are_independent() {
        assert_eq!(required_passes(PassId::Partition), vec![PassId::Partition]);
        assert_eq!(required_passes(PassId::Place), vec![PassId::Place]);
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            assert!(
                !desc.outputs.is_empty(),
                "pass {:?} has no outputs declared",
                pass
            );
        }
    }
}
