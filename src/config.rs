//! YAML pipeline specification.
//!
//! A `PipelineSpec` describes one full run: where the data comes from,
//! the network topology, the fine-tuning knobs, which layers to
//! observe, and where the export documents go. Every section except
//! `data` has sensible defaults, so a minimal spec is a data source
//! and nothing else.

use crate::model::ConvNet;
use crate::optim::{Adam, Optimizer, Sgd};
use crate::{AfinarError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete pipeline specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Run name, written into the exported documents.
    #[serde(default = "default_name")]
    pub name: String,

    /// Global random seed (weight init, splitting, shuffling).
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Dataset configuration.
    pub data: DataSection,

    /// Network configuration.
    #[serde(default)]
    pub model: ModelSection,

    /// Fine-tuning configuration.
    #[serde(default)]
    pub training: TrainingSection,

    /// Activation capture configuration.
    #[serde(default)]
    pub capture: CaptureSection,

    /// Export artifact configuration.
    #[serde(default)]
    pub export: ExportSection,
}

/// Dataset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSection {
    /// Where samples come from.
    pub source: DataSource,

    /// Optional newline-separated class names file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_names: Option<PathBuf>,

    /// Fraction of samples frozen for evaluation.
    #[serde(default = "default_eval_fraction")]
    pub eval_fraction: f64,

    /// Per-channel normalization mean; absent means 0.5 per channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<Vec<f32>>,

    /// Per-channel normalization std; absent means 0.5 per channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std: Option<Vec<f32>>,
}

impl DataSection {
    /// Normalization mean resolved to `channels` entries.
    #[must_use]
    pub fn mean_for(&self, channels: usize) -> Vec<f32> {
        self.mean.clone().unwrap_or_else(|| vec![0.5; channels])
    }

    /// Normalization std resolved to `channels` entries.
    #[must_use]
    pub fn std_for(&self, channels: usize) -> Vec<f32> {
        self.std.clone().unwrap_or_else(|| vec![0.5; channels])
    }
}

/// Where training samples come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DataSource {
    /// IDX image/label file pair (MNIST family).
    Idx {
        /// Path to the `idx3` image file.
        images: PathBuf,
        /// Path to the `idx1` label file.
        labels: PathBuf,
    },
    /// Deterministic generated dataset at the model's input size.
    Synthetic {
        /// Number of samples to generate.
        #[serde(default = "default_synthetic_samples")]
        samples: usize,
        /// Number of classes to cycle through.
        #[serde(default = "default_synthetic_classes")]
        classes: usize,
    },
}

/// Network configuration. The head width is not configured here; it is
/// sized from the dataset's label space.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// Optional pretrained state path; absent means seeded init.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<PathBuf>,

    /// Input resolution as `[height, width]`.
    pub input_hw: (usize, usize),

    /// Input channel count.
    pub in_channels: usize,

    /// Conv block widths.
    pub conv_channels: [usize; 2],
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            weights: None,
            input_hw: (32, 32),
            in_channels: 3,
            conv_channels: [8, 16],
        }
    }
}

/// Fine-tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSection {
    /// Number of epochs.
    pub epochs: usize,

    /// Samples per batch.
    pub batch_size: usize,

    /// Learning rate.
    pub lr: f32,

    /// Optimizer selection.
    pub optimizer: OptimSpec,

    /// Directory for `epoch-{n}` checkpoint directories.
    pub checkpoint_dir: PathBuf,

    /// Save a checkpoint every N epochs; 0 disables checkpoints.
    pub save_every: usize,

    /// Report metrics every N epochs; 0 silences progress.
    pub log_interval: usize,

    /// Assemble batches on a prefetch worker thread.
    pub prefetch: bool,
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 16,
            lr: 0.01,
            optimizer: OptimSpec::default(),
            checkpoint_dir: PathBuf::from("checkpoints"),
            save_every: 1,
            log_interval: 1,
            prefetch: true,
        }
    }
}

/// Optimizer selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimSpec {
    /// Optimizer name: `sgd` | `adam`.
    pub name: OptimName,

    /// Momentum for SGD; ignored by Adam.
    pub momentum: f32,
}

impl Default for OptimSpec {
    fn default() -> Self {
        Self { name: OptimName::Sgd, momentum: 0.9 }
    }
}

impl OptimSpec {
    /// Instantiate the selected optimizer at the given learning rate.
    #[must_use]
    pub fn build(&self, lr: f32) -> Box<dyn Optimizer> {
        match self.name {
            OptimName::Sgd => Box::new(Sgd::new(lr, self.momentum)),
            OptimName::Adam => Box::new(Adam::default_params(lr)),
        }
    }
}

/// Supported optimizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimName {
    /// Stochastic gradient descent with optional momentum.
    #[default]
    Sgd,
    /// Adam with default betas.
    Adam,
}

impl OptimName {
    /// Lowercase name as written in the spec.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sgd => "sgd",
            Self::Adam => "adam",
        }
    }
}

impl std::fmt::Display for OptimName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activation capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    /// Layer names to observe during export.
    pub layers: Vec<String>,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self { layers: vec!["global_pool".to_string()] }
    }
}

/// Export artifact configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    /// Output path for the model description document.
    pub model_path: PathBuf,

    /// Output path for the dataset activity document.
    pub activity_path: PathBuf,

    /// Pretty-print the JSON documents.
    pub pretty: bool,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("out/model.json"),
            activity_path: PathBuf::from("out/activity.json"),
            pretty: true,
        }
    }
}

impl PipelineSpec {
    /// Load and validate a spec from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigNotFound` when the file is missing,
    /// `ConfigParsing` on bad YAML, and field-level `ConfigValue`
    /// errors from [`PipelineSpec::validate`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AfinarError::ConfigNotFound { path: path.to_path_buf() }
            } else {
                AfinarError::io(format!("reading config from {}", path.display()), e)
            }
        })?;
        let spec: Self = serde_yaml::from_str(&content).map_err(|e| AfinarError::ConfigParsing {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Parse and validate a spec from a YAML string.
    ///
    /// # Errors
    ///
    /// Same contract as [`PipelineSpec::load`], with `<inline>` as the
    /// reported path.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let spec: Self = serde_yaml::from_str(content).map_err(|e| AfinarError::ConfigParsing {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first failing field as a `ConfigValue` error, or
    /// `UnknownLayer` for a capture layer outside the model registry.
    pub fn validate(&self) -> Result<()> {
        let f = self.data.eval_fraction;
        if !(f > 0.0 && f < 1.0) {
            return Err(AfinarError::ConfigValue {
                field: "data.eval_fraction".to_string(),
                message: format!("must be in (0, 1), got {f}"),
                suggestion: "Use a value like 0.2".to_string(),
            });
        }

        if self.training.epochs == 0 {
            return Err(AfinarError::ConfigValue {
                field: "training.epochs".to_string(),
                message: "must be at least 1".to_string(),
                suggestion: "Use a small value like 5 to start".to_string(),
            });
        }
        if self.training.batch_size == 0 {
            return Err(AfinarError::ConfigValue {
                field: "training.batch_size".to_string(),
                message: "must be at least 1".to_string(),
                suggestion: "Use a value like 16".to_string(),
            });
        }
        if !(self.training.lr > 0.0 && self.training.lr.is_finite()) {
            return Err(AfinarError::ConfigValue {
                field: "training.lr".to_string(),
                message: format!("must be a positive finite number, got {}", self.training.lr),
                suggestion: "Use a value like 0.01".to_string(),
            });
        }

        if self.model.in_channels == 0 {
            return Err(AfinarError::ConfigValue {
                field: "model.in_channels".to_string(),
                message: "must be at least 1".to_string(),
                suggestion: "Use 1 for grayscale or 3 for RGB input".to_string(),
            });
        }
        if self.model.conv_channels.iter().any(|&c| c == 0) {
            return Err(AfinarError::ConfigValue {
                field: "model.conv_channels".to_string(),
                message: format!("channel counts must be positive, got {:?}", self.model.conv_channels),
                suggestion: "Use values like [8, 16]".to_string(),
            });
        }
        let (h, w) = self.model.input_hw;
        if h < 4 || w < 4 {
            return Err(AfinarError::ConfigValue {
                field: "model.input_hw".to_string(),
                message: format!("resolution {h}x{w} is too small for two pooling stages"),
                suggestion: "Use a resolution of at least 4x4, e.g. [32, 32]".to_string(),
            });
        }

        if self.capture.layers.is_empty() {
            return Err(AfinarError::ConfigValue {
                field: "capture.layers".to_string(),
                message: "at least one layer must be observed".to_string(),
                suggestion: "Use [global_pool] to match the default".to_string(),
            });
        }
        for layer in &self.capture.layers {
            if !ConvNet::has_layer(layer) {
                return Err(AfinarError::UnknownLayer {
                    name: layer.clone(),
                    available: ConvNet::layer_names().join(", "),
                });
            }
        }

        for (field, values) in [("data.mean", &self.data.mean), ("data.std", &self.data.std)] {
            if let Some(values) = values {
                if values.len() != self.model.in_channels {
                    return Err(AfinarError::ConfigValue {
                        field: field.to_string(),
                        message: format!(
                            "has {} entries but model.in_channels is {}",
                            values.len(),
                            self.model.in_channels
                        ),
                        suggestion: "Provide one entry per input channel".to_string(),
                    });
                }
            }
        }
        if let Some(std) = &self.data.std {
            if std.iter().any(|&s| !(s > 0.0)) {
                return Err(AfinarError::ConfigValue {
                    field: "data.std".to_string(),
                    message: format!("entries must be strictly positive, got {std:?}"),
                    suggestion: "Use values like [0.5] per channel".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn default_name() -> String {
    "afinar-run".to_string()
}

fn default_seed() -> u64 {
    42
}

fn default_eval_fraction() -> f64 {
    0.2
}

fn default_synthetic_samples() -> usize {
    64
}

fn default_synthetic_classes() -> usize {
    4
}
