//! End-to-end tutorial pipeline.
//!
//! `run_pipeline` wires the stages together: prepare the dataset,
//! fine-tune the classifier head, capture activations over the frozen
//! eval split, and export the two JSON documents. Stages run in order
//! and the first error aborts the run; export writes are atomic, so an
//! aborted run leaves no partial artifacts.

use crate::capture::LayerObserver;
use crate::config::{DataSource, PipelineSpec};
use crate::data::{
    class_names_from_file, generate, load_idx_dataset, split_dataset, Dataset, DatasetSplit,
    Preprocess, Sample, SyntheticSpec,
};
use crate::export::{collect_activity, describe_model, save_json, CollectOptions};
use crate::model::{zoo, ConvNet, NetConfig};
use crate::train::{EpochMetrics, FineTuner, TrainOptions, TrainResult};
use crate::{AfinarError, Result};
use std::path::{Path, PathBuf};

/// Per-epoch progress callback.
pub type ProgressFn = Box<dyn FnMut(&EpochMetrics)>;

/// Outcome summary of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Samples in the shuffled training half.
    pub train_samples: usize,
    /// Samples in the frozen evaluation half.
    pub eval_samples: usize,
    /// Size of the label space.
    pub num_classes: usize,
    /// Epochs actually run.
    pub epochs_run: usize,
    /// Accuracy on the eval split after the last epoch.
    pub final_eval_accuracy: f32,
    /// Wall-clock training time in milliseconds.
    pub total_time_ms: u64,
    /// Where the model description document was written.
    pub model_path: PathBuf,
    /// Where the dataset activity document was written.
    pub activity_path: PathBuf,
}

/// Run the full pipeline described by `spec`.
///
/// `progress` is invoked once per reported epoch with that epoch's
/// metrics; pass `None` for a silent run.
///
/// # Errors
///
/// Returns the first stage error: config validation, dataset loading
/// or splitting, model construction, training, capture, or export.
pub fn run_pipeline(spec: &PipelineSpec, progress: Option<ProgressFn>) -> Result<PipelineReport> {
    spec.validate()?;

    let (dataset, split, preprocess) = prepare_data(spec)?;
    let num_classes = dataset.num_classes();
    let net = build_model(spec, num_classes)?;
    let (net, outcome) = fine_tune(spec, net, &split, &preprocess, progress)?;
    let (model_path, activity_path) =
        export_artifacts(spec, &net, &split.eval, &preprocess, dataset.class_names())?;

    Ok(PipelineReport {
        train_samples: split.train.len(),
        eval_samples: split.eval.len(),
        num_classes,
        epochs_run: outcome.epoch_metrics.len(),
        final_eval_accuracy: outcome.final_eval_accuracy,
        total_time_ms: outcome.total_time_ms,
        model_path,
        activity_path,
    })
}

/// Load the source, apply class names, split, and build the
/// preprocessing pipeline.
fn prepare_data(spec: &PipelineSpec) -> Result<(Dataset, DatasetSplit, Preprocess)> {
    let model = &spec.model;

    let dataset = match &spec.data.source {
        DataSource::Idx { images, labels } => load_idx_dataset(images, labels)?,
        DataSource::Synthetic { samples, classes } => generate(&SyntheticSpec {
            samples: *samples,
            classes: *classes,
            hw: model.input_hw,
            channels: model.in_channels,
            seed: spec.seed,
        }),
    };

    let dataset = match &spec.data.class_names {
        Some(path) => {
            let names = class_names_from_file(path)?;
            Dataset::with_class_names(dataset.samples().to_vec(), names)?
        }
        None => dataset,
    };

    if dataset.num_classes() < 2 {
        return Err(AfinarError::ConfigValue {
            field: "data".to_string(),
            message: format!(
                "classification needs at least 2 classes, dataset has {}",
                dataset.num_classes()
            ),
            suggestion: "Check the label file or raise the synthetic class count".to_string(),
        });
    }

    let split = split_dataset(&dataset, spec.data.eval_fraction, spec.seed)?;
    let preprocess = Preprocess::new(
        model.in_channels,
        model.input_hw,
        spec.data.mean_for(model.in_channels),
        spec.data.std_for(model.in_channels),
    )?;

    Ok((dataset, split, preprocess))
}

/// Build the network: pretrained backbone with a fresh head, or a
/// seeded model when no weights are configured.
fn build_model(spec: &PipelineSpec, num_classes: usize) -> Result<ConvNet> {
    let model = &spec.model;
    match &model.weights {
        Some(path) => {
            let net = zoo::load_pretrained(path, spec.seed)?;
            let cfg = net.config();
            if cfg.in_channels != model.in_channels || cfg.input_hw != model.input_hw {
                return Err(AfinarError::ConfigValue {
                    field: "model.weights".to_string(),
                    message: format!(
                        "pretrained state expects {}ch {}x{} input but the model section \
                         specifies {}ch {}x{}",
                        cfg.in_channels,
                        cfg.input_hw.0,
                        cfg.input_hw.1,
                        model.in_channels,
                        model.input_hw.0,
                        model.input_hw.1
                    ),
                    suggestion: "Align model.input_hw and model.in_channels with the state file"
                        .to_string(),
                });
            }
            net.with_head(num_classes)
        }
        None => ConvNet::seeded(NetConfig {
            in_channels: model.in_channels,
            input_hw: model.input_hw,
            conv_channels: model.conv_channels,
            num_classes,
            init_seed: spec.seed,
        }),
    }
}

/// Fine-tune the head on the training half.
fn fine_tune(
    spec: &PipelineSpec,
    net: ConvNet,
    split: &DatasetSplit,
    preprocess: &Preprocess,
    progress: Option<ProgressFn>,
) -> Result<(ConvNet, TrainResult)> {
    let training = &spec.training;
    let options = TrainOptions {
        epochs: training.epochs,
        batch_size: training.batch_size,
        lr: training.lr,
        save_every: training.save_every,
        log_interval: training.log_interval,
        checkpoint_dir: training.checkpoint_dir.clone(),
        seed: spec.seed,
        prefetch: training.prefetch,
    };

    let mut tuner = FineTuner::new(net, training.optimizer.build(training.lr), options)?;
    if let Some(f) = progress {
        tuner.set_progress(f);
    }
    let outcome = tuner.run(split, preprocess)?;
    Ok((tuner.into_model(), outcome))
}

/// Capture activations over the eval half and write both documents.
fn export_artifacts(
    spec: &PipelineSpec,
    net: &ConvNet,
    eval: &[Sample],
    preprocess: &Preprocess,
    categories: &[String],
) -> Result<(PathBuf, PathBuf)> {
    let observer = LayerObserver::new(&spec.capture.layers)?;
    let description = describe_model(net, observer.layers(), spec.name.clone())?;
    let options = CollectOptions {
        name: spec.name.clone(),
        categories: categories.to_vec(),
        batch_size: spec.training.batch_size,
    };
    let activity = collect_activity(net, observer, eval, preprocess, &description, &options)?;

    ensure_parent(&spec.export.model_path)?;
    save_json(&description, &spec.export.model_path, spec.export.pretty)?;
    ensure_parent(&spec.export.activity_path)?;
    save_json(&activity, &spec.export.activity_path, spec.export.pretty)?;

    Ok((spec.export.model_path.clone(), spec.export.activity_path.clone()))
}

/// Create the parent directory of an output path if it is missing.
fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| AfinarError::Export {
                path: path.to_path_buf(),
                message: format!("creating output directory {}: {e}", parent.display()),
            })?;
        }
    }
    Ok(())
}
