//! Command-line interface.
//!
//! Two subcommands: `run` executes the full pipeline from a YAML spec,
//! and `validate` checks a spec (including the files it references)
//! without training anything.

mod logging;

pub use logging::{log, LogLevel};

use crate::config::{DataSource, PipelineSpec};
use crate::pipeline::{run_pipeline, ProgressFn};
use crate::{AfinarError, Result};
use clap::{Parser, Subcommand};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Afinar command-line interface.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "afinar")]
#[command(version)]
#[command(about = "Fine-tune a small image classifier and export layer activations")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the full pipeline from a YAML spec
    Run(RunArgs),

    /// Validate a spec and probe its referenced files without training
    Validate(ValidateArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct RunArgs {
    /// Path to the YAML pipeline spec
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Override number of epochs
    #[arg(short, long)]
    pub epochs: Option<usize>,

    /// Override the global random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the checkpoint directory
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Redirect both export documents into this directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    /// Path to the YAML pipeline spec
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Print a section-by-section summary
    #[arg(short, long)]
    pub detailed: bool,
}

/// Parse CLI arguments from a string slice (for testing)
pub fn parse_args<I, T>(args: I) -> std::result::Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

/// Execute a CLI command based on the parsed arguments.
///
/// # Errors
///
/// Returns the underlying pipeline or validation error; the binary maps
/// it to a non-zero exit code.
pub fn run_command(cli: Cli) -> Result<()> {
    let level = LogLevel::from_flags(cli.quiet, cli.verbose);

    match cli.command {
        Command::Run(args) => run(args, level),
        Command::Validate(args) => validate(args, level),
    }
}

/// Apply command-line overrides to a loaded spec.
pub fn apply_overrides(spec: &mut PipelineSpec, args: &RunArgs) {
    if let Some(epochs) = args.epochs {
        spec.training.epochs = epochs;
    }
    if let Some(seed) = args.seed {
        spec.seed = seed;
    }
    if let Some(dir) = &args.checkpoint_dir {
        spec.training.checkpoint_dir = dir.clone();
    }
    if let Some(dir) = &args.output_dir {
        let model = file_name_or(&spec.export.model_path, "model.json");
        let activity = file_name_or(&spec.export.activity_path, "activity.json");
        spec.export.model_path = dir.join(model);
        spec.export.activity_path = dir.join(activity);
    }
}

/// File name of `path`, owned, with a fallback for extension-less paths.
fn file_name_or(path: &Path, fallback: &str) -> OsString {
    path.file_name().unwrap_or_else(|| OsStr::new(fallback)).to_os_string()
}

fn run(args: RunArgs, level: LogLevel) -> Result<()> {
    log(level, LogLevel::Normal, &format!("Loading spec from {}", args.config.display()));

    let mut spec = PipelineSpec::load(&args.config)?;
    apply_overrides(&mut spec, &args);

    let total = spec.training.epochs;
    let progress: Option<ProgressFn> = if level.allows(LogLevel::Normal) {
        Some(Box::new(move |m| {
            println!(
                "epoch {}/{}  train_loss {:.4}  eval_loss {:.4}  eval_acc {:.1}%  ({} ms)",
                m.epoch + 1,
                total,
                m.train_loss,
                m.eval_loss,
                m.eval_accuracy * 100.0,
                m.epoch_time_ms
            );
        }))
    } else {
        None
    };

    let report = run_pipeline(&spec, progress)?;

    log(
        level,
        LogLevel::Normal,
        &format!(
            "Trained {} epochs on {} samples ({} held out), final accuracy {:.1}%",
            report.epochs_run,
            report.train_samples,
            report.eval_samples,
            report.final_eval_accuracy * 100.0
        ),
    );
    log(
        level,
        LogLevel::Normal,
        &format!("Model description: {}", report.model_path.display()),
    );
    log(
        level,
        LogLevel::Normal,
        &format!("Dataset activity: {}", report.activity_path.display()),
    );
    Ok(())
}

fn validate(args: ValidateArgs, level: LogLevel) -> Result<()> {
    log(level, LogLevel::Normal, &format!("Validating spec: {}", args.config.display()));

    let spec = PipelineSpec::load(&args.config)?;
    probe_files(&spec)?;

    log(level, LogLevel::Normal, "Spec is valid");

    if args.detailed {
        print_summary(&spec);
    }
    Ok(())
}

/// Check that every file the spec references exists on disk.
fn probe_files(spec: &PipelineSpec) -> Result<()> {
    if let DataSource::Idx { images, labels } = &spec.data.source {
        for path in [images, labels] {
            if !path.is_file() {
                return Err(AfinarError::DatasetNotFound { path: path.clone() });
            }
        }
    }
    if let Some(path) = &spec.data.class_names {
        if !path.is_file() {
            return Err(AfinarError::DatasetNotFound { path: path.clone() });
        }
    }
    if let Some(path) = &spec.model.weights {
        if !path.is_file() {
            return Err(AfinarError::WeightsNotFound { path: path.clone() });
        }
    }
    Ok(())
}

/// Format the data section as an indented block.
pub fn format_data_info(spec: &PipelineSpec) -> String {
    let mut lines = vec![match &spec.data.source {
        DataSource::Idx { images, labels } => {
            format!("  Source: IDX ({}, {})", images.display(), labels.display())
        }
        DataSource::Synthetic { samples, classes } => {
            format!("  Source: synthetic ({samples} samples, {classes} classes)")
        }
    }];
    lines.push(format!("  Eval fraction: {}", spec.data.eval_fraction));
    if let Some(names) = &spec.data.class_names {
        lines.push(format!("  Class names: {}", names.display()));
    }
    lines.join("\n")
}

/// Format the model section as an indented block.
pub fn format_model_info(spec: &PipelineSpec) -> String {
    let model = &spec.model;
    let weights = match &model.weights {
        Some(path) => format!("{}", path.display()),
        None => "seeded init".to_string(),
    };
    format!(
        "  Input: {}ch {}x{}\n  Conv channels: {:?}\n  Weights: {weights}",
        model.in_channels, model.input_hw.0, model.input_hw.1, model.conv_channels
    )
}

/// Format the training section as an indented block.
pub fn format_training_info(spec: &PipelineSpec) -> String {
    let training = &spec.training;
    let mut lines = vec![
        format!("  Optimizer: {} (lr={})", training.optimizer.name, training.lr),
        format!("  Epochs: {}", training.epochs),
        format!("  Batch size: {}", training.batch_size),
    ];
    if training.save_every > 0 {
        lines.push(format!(
            "  Checkpoints: every {} epoch(s) into {}",
            training.save_every,
            training.checkpoint_dir.display()
        ));
    } else {
        lines.push("  Checkpoints: disabled".to_string());
    }
    lines.join("\n")
}

/// Format the capture and export sections as an indented block.
pub fn format_export_info(spec: &PipelineSpec) -> String {
    format!(
        "  Observed layers: {}\n  Model description: {}\n  Dataset activity: {}",
        spec.capture.layers.join(", "),
        spec.export.model_path.display(),
        spec.export.activity_path.display()
    )
}

/// Print a section-by-section spec summary.
pub fn print_summary(spec: &PipelineSpec) {
    println!();
    println!("Spec summary for '{}' (seed {}):", spec.name, spec.seed);
    println!();
    println!("{}", format_data_info(spec));
    println!();
    println!("{}", format_model_info(spec));
    println!();
    println!("{}", format_training_info(spec));
    println!();
    println!("{}", format_export_info(spec));
}
