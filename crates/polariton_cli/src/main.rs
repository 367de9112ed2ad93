mod batch;
mod logging;
mod sweep;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueHint};
use polariton_core::{CavityConfig, TrajectoryWriter};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Sweep and trajectory driver for driven-dissipative polariton cavities"
)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sweep point and write a single tab-separated result line
    Run(RunArgs),

    /// Integrate and write the full state at a fixed cadence
    Trajectory(TrajectoryArgs),

    /// Run every sweep point and concatenate the results in index order
    Batch(BatchArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Cavity configuration file
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Number of sweep points
    total_steps: usize,

    /// Sweep point to run, in 0..total_steps
    index: usize,

    /// Destination of the result line
    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Also write a JSON report with integration statistics
    #[arg(long, value_hint = ValueHint::FilePath)]
    report: Option<PathBuf>,
}

#[derive(Args)]
struct TrajectoryArgs {
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Number of integration steps
    #[arg(long)]
    steps: usize,

    /// Fixed step size; defaults to the [sweep] dt
    #[arg(long)]
    dt: Option<f64>,

    /// Use adaptive steps instead of fixed ones
    #[arg(long)]
    adaptive: bool,

    /// Write every k-th step
    #[arg(long, default_value_t = 1)]
    every: usize,

    /// Apply this value to the [sweep] drive and pump targets before integrating
    #[arg(long)]
    value: Option<f64>,

    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Args)]
struct BatchArgs {
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Worker threads; 1 runs the points sequentially
    #[arg(long, default_value_t = 1)]
    jobs: usize,

    /// Directory for per-index results; defaults to `<output>.parts`
    #[arg(long, value_hint = ValueHint::DirPath)]
    work_dir: Option<PathBuf>,

    /// Keep the per-index files after concatenation
    #[arg(long)]
    keep_parts: bool,

    total_steps: usize,

    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&cli.log_level)?;

    match cli.command {
        Command::Run(args) => run(args),
        Command::Trajectory(args) => trajectory(args),
        Command::Batch(args) => batch_cmd(args),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let config = CavityConfig::load(&args.config)?;
    let record = sweep::run_point(config, args.total_steps, args.index)?;
    sweep::write_line(&args.output, &record)?;
    if let Some(report) = &args.report {
        sweep::write_report(report, &record)?;
    }
    Ok(())
}

fn trajectory(args: TrajectoryArgs) -> Result<()> {
    if args.every == 0 {
        bail!("--every must be at least 1");
    }
    let mut config = CavityConfig::load(&args.config)?;
    if let Some(value) = args.value {
        config.apply_sweep_value(value)?;
    }
    let dt = args
        .dt
        .or_else(|| config.sweep().map(|s| s.dt))
        .unwrap_or(0.005);

    let mut cavity = config.build()?;
    let file = File::create(&args.output)
        .with_context(|| format!("cannot create output {}", args.output.display()))?;
    let mut writer = TrajectoryWriter::new(BufWriter::new(file));

    writer.record(&cavity)?;
    for step in 1..=args.steps {
        if args.adaptive {
            cavity.adaptive_step()?;
        } else {
            cavity.step(dt)?;
        }
        if step % args.every == 0 {
            writer.record(&cavity)?;
        }
    }
    let rows = writer.rows();
    writer.into_inner()?;

    info!(
        rows,
        final_time = cavity.time(),
        accepted = cavity.stats().accepted,
        rejected = cavity.stats().rejected,
        "trajectory written"
    );
    Ok(())
}

fn batch_cmd(args: BatchArgs) -> Result<()> {
    let text = fs::read_to_string(&args.config)
        .with_context(|| format!("cannot open config file {}", args.config.display()))?;
    let work_dir = args.work_dir.unwrap_or_else(|| {
        let mut name = args.output.clone().into_os_string();
        name.push(".parts");
        PathBuf::from(name)
    });
    let options = batch::BatchOptions {
        total_steps: args.total_steps,
        jobs: args.jobs.max(1),
        work_dir,
        output: args.output,
        keep_parts: args.keep_parts,
    };
    batch::run_batch(&text, &options)
}
