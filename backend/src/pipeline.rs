// pipeline.rs — Backend state, pass runner, and provenance
//
// Holds the backend input and pass artifacts, runs the requested passes
// with per-pass timing and a completion callback, and computes the
// input fingerprint for hermetic `--emit build-info` output.
//
// Preconditions: `BackendState.input` is set before run_backend.
// Postconditions: artifacts for the required passes are populated, or
//                 has_error is set.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete after each pass for immediate
//               display; verbose timing lines on stderr.

use std::time::Instant;

use serde::Deserialize;

use crate::diag::{codes, has_errors, Diagnostic};
use crate::flat::FlatGraph;
use crate::grid::Router;
use crate::layout::{self, LayoutOptions, Placement};
use crate::partition::{
    self, PartitionOptions, PartitionOutcome, MAX_ICODE_SEARCH_TILES,
};
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::stream::StreamNode;

// ── Backend input ──────────────────────────────────────────────────────────

/// The backend input file: the hierarchical stream graph for the
/// partitioner and/or the flattened graph for the placer. Either section
/// may be absent when only one pass is requested.
#[derive(Debug, Default, Deserialize)]
pub struct BackendInput {
    #[serde(default)]
    pub stream: Option<StreamNode>,
    #[serde(default)]
    pub flat: Option<FlatGraph>,
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for hermetic runs and cache-key use.
///
/// `input_hash`: SHA-256 of the raw input JSON text.
/// `seed`: the annealing seed, part of the reproducibility contract.
/// `backend_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub input_hash: [u8; 32],
    pub seed: u64,
    pub backend_version: &'static str,
}

impl Provenance {
    /// Hex string of the input hash (64 characters).
    pub fn input_hash_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.input_hash {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"input_hash\": \"{}\",\n  \"seed\": {},\n  \"backend_version\": \"{}\"\n}}\n",
            self.input_hash_hex(),
            self.seed,
            self.backend_version,
        )
    }
}

/// Compute provenance from the raw input text and the annealing seed.
pub fn compute_provenance(input_text: &str, seed: u64) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(input_text.as_bytes());
    let result = hasher.finalize();
    let mut input_hash = [0u8; 32];
    input_hash.copy_from_slice(&result);

    Provenance {
        input_hash,
        seed,
        backend_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Backend state ──────────────────────────────────────────────────────────

/// Holds the input, all pass artifacts, and accumulated diagnostics.
pub struct BackendState {
    pub input: BackendInput,
    pub partition: Option<PartitionOutcome>,
    pub placement: Option<Placement>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl BackendState {
    pub fn new(input: BackendInput) -> Self {
        BackendState {
            input,
            partition: None,
            placement: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `BackendState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut BackendState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "smc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → verify cert → on_pass_complete → verbose →
/// error check.
pub fn run_backend(
    state: &mut BackendState,
    terminal: PassId,
    popts: &PartitionOptions,
    lopts: &LayoutOptions,
    router: &dyn Router,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        match pass_id {
            PassId::Partition => {
                let t = Instant::now();
                let diags = run_partition(state, popts);
                finish_pass(
                    state,
                    PassId::Partition,
                    diags,
                    t.elapsed(),
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Place => {
                let t = Instant::now();
                let diags = run_place(state, lopts, router);
                finish_pass(
                    state,
                    PassId::Place,
                    diags,
                    t.elapsed(),
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
        }
    }
    Ok(())
}

fn run_partition(state: &mut BackendState, popts: &PartitionOptions) -> Vec<Diagnostic> {
    let stream = match &state.input.stream {
        Some(s) => s,
        None => {
            return vec![Diagnostic::error(
                codes::E0105,
                "backend input has no stream graph for the partition pass",
            )]
        }
    };
    let result = partition::partition(stream, popts);
    let mut diags = result.diagnostics;
    state.partition = result.outcome;

    // Verify postconditions against the tree the records refer to. With
    // identity pre-fusion the records target the collapsed tree, which
    // the partitioner has already verified internally.
    if let Some(outcome) = &state.partition {
        if !popts.collapse_identities {
            let budget = if popts.limit_icode {
                MAX_ICODE_SEARCH_TILES
            } else {
                popts.tiles
            };
            let cert = partition::verify_partition(outcome, stream, budget);
            if !cert.all_pass() {
                let failed: Vec<_> = cert
                    .obligations()
                    .iter()
                    .filter(|(_, ok)| !ok)
                    .map(|(name, _)| *name)
                    .collect();
                diags.push(Diagnostic::error(
                    codes::E0500,
                    format!("partition verification failed: {}", failed.join(", ")),
                ));
            }
        }
    }
    diags
}

fn run_place(
    state: &mut BackendState,
    lopts: &LayoutOptions,
    router: &dyn Router,
) -> Vec<Diagnostic> {
    let flat = match &state.input.flat {
        Some(f) => f,
        None => {
            return vec![Diagnostic::error(
                codes::E0105,
                "backend input has no flat graph for the place pass",
            )]
        }
    };
    match layout::place(flat, lopts, router) {
        Ok(placement) => {
            let mut diags = Vec::new();
            let cert = layout::verify_layout(flat, &placement);
            if !cert.all_pass() {
                let failed: Vec<_> = cert
                    .obligations()
                    .iter()
                    .filter(|(_, ok)| !ok)
                    .map(|(name, _)| *name)
                    .collect();
                diags.push(Diagnostic::error(
                    codes::E0501,
                    format!("layout verification failed: {}", failed.join(", ")),
                ));
            }
            state.placement = Some(placement);
            diags
        }
        Err(diags) => diags,
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
