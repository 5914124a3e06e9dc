//! Core dataset types.
//!
//! A `Dataset` fixes the label space once at load time. The classifier
//! head is sized from `num_classes()` and the export category list is
//! read from `class_names()`, so the two can never disagree.

use crate::{AfinarError, Result};
use ndarray::Array3;
use std::path::Path;

/// A single labeled image in `C×H×W` layout with values in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Image tensor, channels first.
    pub image: Array3<f32>,
    /// Ground-truth class index.
    pub label: usize,
}

impl Sample {
    /// Create a sample from an image tensor and its class index.
    pub fn new(image: Array3<f32>, label: usize) -> Self {
        Self { image, label }
    }

    /// Number of channels.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.image.shape()[0]
    }

    /// Spatial resolution as `(height, width)`.
    #[must_use]
    pub fn hw(&self) -> (usize, usize) {
        (self.image.shape()[1], self.image.shape()[2])
    }
}

/// A labeled image dataset with a fixed class-name list.
#[derive(Debug, Clone)]
pub struct Dataset {
    samples: Vec<Sample>,
    class_names: Vec<String>,
}

impl Dataset {
    /// Build a dataset, deriving `class_{k}` names from the highest label
    /// present in `samples`.
    #[must_use]
    pub fn new(samples: Vec<Sample>) -> Self {
        let num_classes = samples.iter().map(|s| s.label + 1).max().unwrap_or(0);
        let class_names = (0..num_classes).map(|k| format!("class_{k}")).collect();
        Self { samples, class_names }
    }

    /// Build a dataset with an explicit class-name list.
    ///
    /// # Errors
    ///
    /// Returns a config error when a sample's label has no entry in
    /// `class_names`.
    pub fn with_class_names(samples: Vec<Sample>, class_names: Vec<String>) -> Result<Self> {
        let max_label = samples.iter().map(|s| s.label).max();
        if let Some(max_label) = max_label {
            if max_label >= class_names.len() {
                return Err(AfinarError::ConfigValue {
                    field: "data.class_names".to_string(),
                    message: format!(
                        "{} names provided but labels reach class index {max_label}",
                        class_names.len()
                    ),
                    suggestion: format!("Provide at least {} names, one per line", max_label + 1),
                });
            }
        }
        Ok(Self { samples, class_names })
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when the dataset holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// All samples, in load order.
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Sample at `index`, if present.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    /// Size of the label space fixed at load time.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Class names indexed by label.
    #[must_use]
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }
}

/// Read a one-name-per-line class-name file.
///
/// Blank lines and surrounding whitespace are ignored.
pub fn class_names_from_file(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AfinarError::DatasetNotFound { path: path.to_path_buf() }
        } else {
            AfinarError::io(format!("reading class names from {}", path.display()), e)
        }
    })?;

    let names: Vec<String> =
        content.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect();

    if names.is_empty() {
        return Err(AfinarError::ConfigValue {
            field: "data.class_names".to_string(),
            message: format!("{} contains no names", path.display()),
            suggestion: "List one class name per line".to_string(),
        });
    }

    Ok(names)
}
