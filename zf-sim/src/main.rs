#![deny(
    clippy::nursery,
    clippy::pedantic,
    missing_docs,
    clippy::missing_docs_in_private_items,
)]
//! Command-line driver for zf-sim.
//!
//! Builds a random zinc-finger network from node counts, runs a replicate ensemble and prints the
//! mean terminal population of every node (or the whole ensemble as JSON). An optional knock-down
//! resets every transcription factor at a chosen tick. See `--help` for the flags.

use std::io::{
    self,
    Write,
};

use clap::Parser;
use indicatif::{
    ProgressBar,
    ProgressFinish,
    ProgressStyle,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use zf_core::prelude::*;
use zf_sim::sampling::derive_seed;
use zf_sim::{
    force_transcription_factors,
    Ensemble,
    GillespieSimulator,
    Network,
    NetworkBuilder,
    Schedule,
    SimulationConfig,
};

/// Stream index reserved for network generation, far away from replicate streams.
const TOPOLOGY_STREAM: u64 = u64::MAX;

/// zf-sim: simulate transcription-factor / zinc-finger / transposable-element networks
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of transcription factors.
    #[arg(long, default_value_t = 2)]
    tfs: usize,

    /// Number of KRAB zinc-finger repressors.
    #[arg(long, default_value_t = 5)]
    zfs: usize,

    /// Number of transposable elements.
    #[arg(long, default_value_t = 10)]
    tes: usize,

    /// Include every candidate edge independently with this probability (0.0–1.0).
    #[arg(short = 'p', long, default_value_t = 0.2, value_parser = parse_probability, conflicts_with = "biased")]
    edge_probability: f64,

    /// Use type-dependent edge probabilities instead of a single `--edge-probability`.
    #[arg(long)]
    biased: bool,

    /// Number of integer ticks recorded per replicate.
    #[arg(short, long, default_value_t = 200)]
    duration: usize,

    /// Number of independent replicates.
    #[arg(short, long, default_value_t = 20)]
    replicates: usize,

    /// Base random seed; random when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Initial population of every transcription factor.
    #[arg(long, default_value_t = 10)]
    initial_tf_population: u64,

    /// Tick at which transcription factors are knocked down.
    #[arg(long)]
    knockdown_tick: Option<usize>,

    /// Transcription-factor population set by the knock-down.
    #[arg(long, requires = "knockdown_tick")]
    knockdown_pop: Option<u64>,

    /// Transcription-factor production rate set by the knock-down.
    #[arg(long, requires = "knockdown_tick")]
    knockdown_beta: Option<f64>,

    /// Run replicates on all cores.
    #[arg(long)]
    parallel: bool,

    /// Print the full ensemble as JSON instead of a summary table.
    #[arg(long)]
    json: bool,

    /// Logging verbosity level (`trace`, `debug`, `info`, `warn`, `error`).
    #[arg(short, long, default_value = "info")]
    verbosity: String,
}

/// Accept probabilities in `[0, 1]` only.
fn parse_probability(s: &str) -> Result<f64, String> {
    let val: f64 = s.parse().map_err(|_| format!("'{s}' isn't a valid float number"))?;
    if (0.0..=1.0).contains(&val) {
        Ok(val)
    } else {
        Err(format!("value must be between 0.0 and 1.0, got: {val}"))
    }
}

/// Generate the network described by `args`.
fn build_network(args: &Cli, seed: u64) -> anyhow::Result<Network> {
    let mut network = Network::with_counts(args.tfs, args.zfs, args.tes);
    let mut rng = StdRng::seed_from_u64(derive_seed(seed, TOPOLOGY_STREAM));
    let builder = NetworkBuilder::default();
    if args.biased {
        builder.generate_biased(&mut network, &mut rng)?;
    } else {
        builder.generate_random(&mut network, args.edge_probability, &mut rng)?;
    }
    network.kinetics_mut().for_each_transcription_factor(|tf| tf.population = args.initial_tf_population);
    Ok(network)
}

/// Knock-down schedule requested on the command line, if any.
fn schedule(args: &Cli) -> Schedule {
    let mut schedule = Schedule::new();
    if let Some(tick) = args.knockdown_tick {
        schedule.insert(tick, force_transcription_factors(args.knockdown_pop, args.knockdown_beta, None));
    }
    schedule
}

/// Run the ensemble, with a progress bar in parallel mode.
fn simulate(args: &Cli, sim: &mut GillespieSimulator) -> anyhow::Result<Ensemble> {
    if !args.parallel {
        return Ok(sim.run(args.duration, args.replicates, schedule(args))?);
    }

    let pb = ProgressBar::new(args.replicates as u64)
        .with_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} replicates ({percent}%)",
                )
                .context("invalid progress bar template")?,
        )
        .with_finish(ProgressFinish::AndLeave);
    let ensemble = sim.run_parallel_with_progress(args.duration, args.replicates, schedule(args), |done| {
        pb.set_position(done as u64);
    })?;
    pb.finish_using_style();
    Ok(ensemble)
}

/// Write the mean terminal population of every node, one `label<TAB>mean` line each.
fn print_summary(out: &mut impl Write, ensemble: &Ensemble) -> io::Result<()> {
    writeln!(out, "node\tmean_terminal_population")?;
    for (label, mean) in ensemble.labels().iter().zip(ensemble.terminal_means()) {
        writeln!(out, "{label}\t{mean:.3}")?;
    }
    Ok(())
}

/// Build and simulate the network described by `args`, then print the results.
fn run(args: &Cli) -> EmptyResult {
    let seed = args.seed.unwrap_or_else(rand::random);
    let network = build_network(args, seed)?;
    info!(
        nodes = network.node_count(),
        edges = network.edge_count(),
        heterochromatin = network.heterochromatin().len(),
        seed,
        "network generated"
    );

    let mut sim = GillespieSimulator::new(network, SimulationConfig::default().with_seed(seed))
        .context("network cannot be simulated")?;
    let ensemble = simulate(args, &mut sim)?;

    let mut out = io::stdout().lock();
    if args.json {
        serde_json::to_writer(&mut out, &ensemble)?;
        writeln!(out)?;
    } else {
        print_summary(&mut out, &ensemble)?;
    }
    Ok(())
}

fn main() -> EmptyResult {
    let args = Cli::parse();
    zf_core::logging::setup(&args.verbosity)?;
    run(&args).inspect_err(log_chain)
}
