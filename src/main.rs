//! Afinar CLI
//!
//! Fine-tunes a small pretrained image classifier, captures named layer
//! activations over the held-out split, and exports JSON documents for
//! the companion visualizer.
//!
//! # Usage
//!
//! ```bash
//! # Run the full pipeline from a spec
//! afinar run pipeline.yaml
//!
//! # Run with overrides
//! afinar run pipeline.yaml --epochs 10 --output-dir results
//!
//! # Validate a spec without training
//! afinar validate pipeline.yaml --detailed
//! ```

use afinar::cli::{run_command, Cli};
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error[{}]: {e}", e.code());
            ExitCode::FAILURE
        }
    }
}
