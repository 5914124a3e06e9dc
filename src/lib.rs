//! Fine-tune a small pretrained image classifier and export what it saw.
//!
//! Afinar covers the full tutorial workflow in one crate:
//! - Dataset loading (IDX files or a deterministic synthetic source)
//!   with preprocessing and a frozen train/eval split
//! - A fixed two-block convolutional network with named layers
//! - Head-only fine-tuning with SGD or Adam and per-epoch checkpoints
//! - Activation capture through explicit layer observers
//! - Atomic JSON export of the model description and dataset activity
//!   documents consumed by the companion visualizer
//!
//! The `afinar` binary drives everything from a YAML spec; the library
//! exposes each stage for direct use. Every run is deterministic for a
//! given seed: weight init, splitting, and epoch shuffling all derive
//! from `seed`.

pub mod capture;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod model;
pub mod optim;
pub mod pipeline;
pub mod train;

pub use error::{AfinarError, Result};
pub use pipeline::{run_pipeline, PipelineReport};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_has_actionable_message() {
        let err = AfinarError::ConfigNotFound { path: "/path/to/pipeline.yaml".into() };
        let msg = err.to_string();
        assert!(msg.contains("pipeline.yaml"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn test_layer_registry_is_exposed() {
        assert!(model::ConvNet::has_layer("global_pool"));
        assert_eq!(*model::LAYER_NAMES.last().expect("non-empty"), model::CLASSIFIER_LAYER);
    }

    #[test]
    fn test_spec_parses_from_library_surface() {
        let spec = config::PipelineSpec::from_yaml("data:\n  source: { kind: synthetic }\n")
            .expect("minimal spec");
        assert_eq!(spec.capture.layers, ["global_pool"]);
    }
}
