//! apr-prune - structured channel pruning for YOLOv5 checkpoints
//!
//! Usage:
//!   apr-prune prune --weights best.safetensors --preset yolov5s --percent 0.3
//!   apr-prune prune --weights best.safetensors --cfg model.json --percent 0.3 --half
//!   apr-prune inspect --weights best.safetensors --preset yolov5s-seg --percent 0.5

use aprender_prune::config::PruneConfig;
use aprender_prune::pipeline::{default_output_path, PruneOptions, Pruner};
use aprender_prune::serialization::{load_checkpoint, save_checkpoint, SafeTensorsDType};
use aprender_prune::{Checkpoint, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod output;

/// apr-prune - BN-channel pruning and weight transplant
///
/// Scores channels by batch-norm scale, rebuilds a narrower network and
/// copies the surviving weights into it.
#[derive(Parser)]
#[command(name = "apr-prune")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (per-layer detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Prune a checkpoint and write the smaller model
    Prune(PruneArgs),

    /// Show the scale pool and the threshold a ratio would select
    Inspect(InspectArgs),
}

#[derive(Args)]
struct ModelArgs {
    /// Trained checkpoint (.safetensors)
    #[arg(short, long, value_name = "FILE")]
    weights: PathBuf,

    /// JSON model document
    #[arg(long, value_name = "FILE", conflicts_with = "preset")]
    cfg: Option<PathBuf>,

    /// Built-in architecture (yolov5s, yolov5s-seg)
    #[arg(long)]
    preset: Option<String>,

    /// Number of classes for presets (inferred from the head when omitted)
    #[arg(long)]
    nc: Option<usize>,
}

#[derive(Args)]
struct PruneArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Prune ratio in [0, 1)
    #[arg(short, long)]
    percent: Option<f64>,

    /// Output file (default: <stem>_pruned_<percent>.safetensors)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write half-precision (F16) weights
    #[arg(long)]
    half: bool,

    /// Write a JSON report of the threshold and retained channels
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// TOML configuration file ([prune] table)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Minimum channels every scored layer keeps
    #[arg(long)]
    min_channels: Option<usize>,
}

#[derive(Args)]
struct InspectArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Prune ratio to evaluate
    #[arg(short, long, default_value = "0.0")]
    percent: f64,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

impl ModelArgs {
    fn overrides(&self) -> PruneConfig {
        PruneConfig {
            preset: self.preset.clone(),
            cfg: self.cfg.clone(),
            nc: self.nc,
            ..PruneConfig::default()
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_pruner(config: &PruneConfig, weights: &Path, ratio: f64) -> Result<(Pruner, Checkpoint)> {
    let (checkpoint, _) = load_checkpoint(weights)?;
    let descriptor = config
        .topology()?
        .descriptor(|preset| preset.infer_classes(&checkpoint))?;
    let options = PruneOptions {
        ratio,
        min_channels: config.min_channels,
    };
    Ok((Pruner::new(descriptor, options), checkpoint))
}

fn source_name(weights: &Path) -> String {
    weights
        .file_name()
        .map_or_else(|| weights.display().to_string(), |n| n.to_string_lossy().into_owned())
}

fn run_prune(args: PruneArgs) -> Result<()> {
    let file_config = match &args.config {
        Some(path) => PruneConfig::from_toml_file(path)?,
        None => PruneConfig::default(),
    };
    let mut config = file_config.merge(PruneConfig {
        percent: args.percent,
        half: args.half,
        report: args.report.clone(),
        ..args.model.overrides()
    });
    if let Some(min_channels) = args.min_channels {
        config.min_channels = min_channels;
    }
    let ratio = config.ratio()?;

    let weights = &args.model.weights;
    let (pruner, checkpoint) = load_pruner(&config, weights, ratio)?;
    let outcome = pruner.run(checkpoint)?;

    let output = args
        .output
        .unwrap_or_else(|| default_output_path(weights, ratio));
    let dtype = if config.half {
        SafeTensorsDType::F16
    } else {
        SafeTensorsDType::F32
    };
    let source = source_name(weights);
    save_checkpoint(&output, &outcome.checkpoint, dtype, &outcome.metadata(&source))?;
    if let Some(report) = &config.report {
        fs::write(report, outcome.report_json(&source)?)?;
    }

    let summary = &outcome.summary;
    output::saved(&output);
    output::shrink("channels", summary.total_original, summary.total_retained);
    output::shrink("parameters", summary.params_before, summary.params_after);
    output::kv("threshold", format!("{:.4}", outcome.report.threshold));
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    let config = args.model.overrides();
    let (pruner, checkpoint) = load_pruner(&config, &args.model.weights, args.percent)?;
    let inspection = pruner.inspect(&checkpoint)?;
    let report = &inspection.report;

    if args.json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    output::section("Checkpoint");
    output::kv("file", args.model.weights.display());
    output::kv("tensors", checkpoint.len());
    output::kv("layers", inspection.network.len());
    output::kv("parameters", inspection.network.num_params());

    output::section("Batch-norm scales");
    output::kv("normalization layers", inspection.network.norm_ids().len());
    output::kv("kept whole", inspection.excluded.len());
    output::kv("pooled channels", report.pool_size);
    output::kv(
        "|gamma| min / mean / max",
        format!("{:.4} / {:.4} / {:.4}", report.min, report.mean, report.max),
    );

    output::section("Threshold");
    output::kv("suggested threshold below", format!("{:.4}", report.highest_threshold));
    output::kv("suggested ratio limit", format!("{:.3}", report.percent_limit));
    output::kv(
        &format!("threshold at ratio {:.3}", report.ratio),
        format!("{:.4}", report.threshold),
    );
    if report.ratio > report.percent_limit {
        output::warning("ratio exceeds the suggested limit; some layers will keep only the channel floor");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Prune(args) => run_prune(args),
        Commands::Inspect(args) => run_inspect(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}
