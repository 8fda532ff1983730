use clap::Parser;
use std::path::PathBuf;

use serde::Serialize;

use smc::diag::Diagnostic;
use smc::grid::XyRouter;
use smc::layout::{self, LayoutOptions};
use smc::partition::{scaling_report, PartitionOptions, PartitionRecord};
use smc::pass::PassId;
use smc::pipeline::{compute_provenance, BackendInput, BackendState};
use smc::stream::StreamNode;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Layout,
    Partition,
    Dot,
    Scaling,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "smc",
    version,
    about = "Stream Mesh Compiler — maps partitioned stream programs onto a 2-D mesh of processing tiles"
)]
struct Cli {
    /// Backend input file (stream graph and/or flat graph, JSON)
    input: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Mesh rows
    #[arg(long, default_value_t = 4)]
    rows: u32,

    /// Mesh columns
    #[arg(long, default_value_t = 4)]
    cols: u32,

    /// Partition tile budget (defaults to rows x cols)
    #[arg(long)]
    tiles: Option<u32>,

    /// Joiners consume a tile slot
    #[arg(long)]
    joiners_need_tiles: bool,

    /// Search for the smallest budget whose per-tile code fits the ceiling
    #[arg(long)]
    limit_icode: bool,

    /// Rewrite the stream graph to match the partition
    #[arg(long)]
    transform: bool,

    /// Pre-fuse all-identity subtrees before estimating cost
    #[arg(long)]
    collapse_identities: bool,

    /// Annealing seed
    #[arg(long, default_value_t = layout::DEFAULT_SEED)]
    seed: u64,

    /// Swap proposals per temperature
    #[arg(long, default_value_t = layout::PROPOSALS_PER_TEMP)]
    proposals: u32,

    /// Cooling factor between temperatures
    #[arg(long, default_value_t = layout::COOLING_FACTOR)]
    cooling: f64,

    /// Interactive manual placement (layout output only)
    #[arg(long)]
    manual: bool,

    /// Output stage
    #[arg(long, value_enum, default_value = "layout")]
    emit: EmitStage,

    /// Print pass timing
    #[arg(long)]
    verbose: bool,
}

#[derive(Serialize)]
struct PartitionReport<'a> {
    bottleneck: u64,
    icode: u64,
    tiles_used: u32,
    records: &'a [PartitionRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    rewritten: Option<&'a StreamNode>,
}

#[derive(Serialize)]
struct TileEntry {
    node: u32,
    name: String,
    row: u32,
    col: u32,
}

#[derive(Serialize)]
struct LayoutReport {
    cost: f64,
    initial_cost: f64,
    tiles: Vec<TileEntry>,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("smc: input = {}", cli.input.display());
        eprintln!("smc: grid  = {}x{}", cli.rows, cli.cols);
        eprintln!("smc: emit  = {:?}", cli.emit);
    }

    // ── Read and parse input ──
    let input_text = match std::fs::read_to_string(&cli.input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("smc: error: {}: {}", cli.input.display(), e);
            std::process::exit(2);
        }
    };
    let input: BackendInput = match serde_json::from_str(&input_text) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("smc: input parse error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.rows == 0 || cli.cols == 0 {
        eprintln!("smc: error: grid dimensions must be non-zero");
        std::process::exit(2);
    }
    if !(cli.cooling > 0.0 && cli.cooling < 1.0) {
        eprintln!("smc: error: --cooling must be strictly between 0 and 1");
        std::process::exit(2);
    }

    let popts = PartitionOptions {
        tiles: cli.tiles.unwrap_or(cli.rows * cli.cols),
        joiners_need_tiles: cli.joiners_need_tiles,
        limit_icode: cli.limit_icode,
        transform: cli.transform,
        collapse_identities: cli.collapse_identities,
        ..PartitionOptions::default()
    };
    let lopts = LayoutOptions {
        rows: cli.rows,
        cols: cli.cols,
        seed: cli.seed,
        proposals_per_temp: cli.proposals,
        cooling_factor: cli.cooling,
        ..LayoutOptions::default()
    };

    let mut state = BackendState::new(input);
    state.provenance = Some(compute_provenance(&input_text, cli.seed));

    let output = match &cli.emit {
        EmitStage::BuildInfo => state.provenance.as_ref().unwrap().to_json(),

        EmitStage::Scaling => {
            let stream = match &state.input.stream {
                Some(s) => s,
                None => {
                    eprintln!("smc: error: scaling report needs a stream graph");
                    std::process::exit(1);
                }
            };
            match scaling_report(stream, cli.rows * cli.cols) {
                Ok(entries) => {
                    let mut text = String::new();
                    for e in &entries {
                        text.push_str(&format!(
                            "tiles={} bottleneck={} records={}\n",
                            e.tiles, e.bottleneck, e.records
                        ));
                    }
                    text
                }
                Err(diags) => {
                    report_diagnostics(&diags);
                    std::process::exit(1);
                }
            }
        }

        EmitStage::Partition => {
            run(&mut state, PassId::Partition, &popts, &lopts, cli.verbose);
            let outcome = state.partition.as_ref().unwrap();
            let report = PartitionReport {
                bottleneck: outcome.bottleneck,
                icode: outcome.icode,
                tiles_used: outcome.tiles_used,
                records: &outcome.records,
                rewritten: outcome.rewritten.as_ref(),
            };
            serde_json::to_string_pretty(&report).expect("report serializes") + "\n"
        }

        EmitStage::Layout => {
            let placement = if cli.manual {
                let flat = match &state.input.flat {
                    Some(f) => f.clone(),
                    None => {
                        eprintln!("smc: error: manual placement needs a flat graph");
                        std::process::exit(1);
                    }
                };
                let stdin = std::io::stdin();
                let mut stderr = std::io::stderr();
                match layout::hand_assign(
                    &flat,
                    &lopts,
                    &XyRouter,
                    &mut stdin.lock(),
                    &mut stderr,
                ) {
                    Ok(p) => p,
                    Err(diags) => {
                        report_diagnostics(&diags);
                        std::process::exit(1);
                    }
                }
            } else {
                run(&mut state, PassId::Place, &popts, &lopts, cli.verbose);
                state.placement.clone().unwrap()
            };
            let flat = state.input.flat.as_ref().unwrap();
            let tiles = placement
                .assignment
                .pairs()
                .into_iter()
                .map(|(node, coord)| TileEntry {
                    node: node.0,
                    name: flat.node(node).name.clone(),
                    row: coord.row,
                    col: coord.col,
                })
                .collect();
            let report = LayoutReport {
                cost: placement.cost,
                initial_cost: placement.initial_cost,
                tiles,
            };
            serde_json::to_string_pretty(&report).expect("report serializes") + "\n"
        }

        EmitStage::Dot => {
            if state.input.flat.is_some() {
                run(&mut state, PassId::Place, &popts, &lopts, cli.verbose);
                let flat = state.input.flat.as_ref().unwrap();
                smc::dot::emit_layout_dot(flat, state.placement.as_ref().unwrap())
            } else if state.input.stream.is_some() {
                run(&mut state, PassId::Partition, &popts, &lopts, cli.verbose);
                let stream = state.input.stream.as_ref().unwrap();
                let outcome = state.partition.as_ref().unwrap();
                smc::dot::emit_partition_dot(stream, &outcome.records)
            } else {
                eprintln!("smc: error: dot output needs a stream or flat graph");
                std::process::exit(1);
            }
        }
    };

    // ── Write output ──
    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, output) {
                eprintln!("smc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
            if cli.verbose {
                eprintln!("smc: wrote {}", path.display());
            }
        }
        None => print!("{output}"),
    }
}

/// Run the backend to `terminal`, printing diagnostics; exits on error.
fn run(
    state: &mut BackendState,
    terminal: PassId,
    popts: &PartitionOptions,
    lopts: &LayoutOptions,
    verbose: bool,
) {
    let result = smc::pipeline::run_backend(
        state,
        terminal,
        popts,
        lopts,
        &XyRouter,
        verbose,
        |_, diags| report_diagnostics(diags),
    );
    if result.is_err() || state.has_error {
        std::process::exit(1);
    }
}

fn report_diagnostics(diags: &[Diagnostic]) {
    for diag in diags {
        eprintln!("smc: {}", diag);
    }
}
