//! The visualization data contract.
//!
//! Two JSON documents describe one export: `ModelDescription` lists
//! the observed layers and their widths, and `DatasetActivity` holds
//! the per-sample rows (image, label, one activation row per observed
//! layer, all index-aligned). Writes go through a temp file + rename,
//! so a failed export never leaves a partial artifact behind.

use crate::{AfinarError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Version tag written into both export documents.
pub const FORMAT_VERSION: u32 = 1;

/// One observed layer: name and flattened per-sample width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    /// Layer name, e.g. `global_pool`.
    pub name: String,
    /// Flattened output width per sample.
    pub dim: usize,
}

/// Description of the observed model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescription {
    /// Model name referenced by [`DatasetActivity::model`].
    pub name: String,
    /// See [`FORMAT_VERSION`].
    pub format_version: u32,
    /// Observed layers in forward order.
    pub layers: Vec<LayerInfo>,
    /// Layer whose width is the class count.
    pub classifier_layer: String,
}

/// Per-sample export rows, index-aligned across all collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetActivity {
    /// Activity name, usually the pipeline name.
    pub name: String,
    /// See [`FORMAT_VERSION`].
    pub format_version: u32,
    /// Name of the [`ModelDescription`] the activations came from.
    pub model: String,
    /// Class names, indexed by label.
    pub categories: Vec<String>,
    /// `[channels, height, width]` of each image row.
    pub image_shape: Vec<usize>,
    /// Flattened preprocessed images, one row per sample.
    pub images: Vec<Vec<f32>>,
    /// Ground-truth labels, index-aligned with `images`.
    pub labels: Vec<usize>,
    /// Captured rows per observed layer, index-aligned with `images`.
    pub activations: BTreeMap<String, Vec<Vec<f32>>>,
    /// RFC 3339 timestamp of the export.
    pub created_at: String,
}

impl DatasetActivity {
    /// Number of exported samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True when no samples were exported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Write a document as JSON through a temp file + rename.
///
/// # Errors
///
/// Returns `Serialization` when encoding fails and `Export` when the
/// temp file cannot be written or moved into place. On failure the
/// target path is left untouched.
pub fn save_json<T: Serialize>(value: &T, path: impl AsRef<Path>, pretty: bool) -> Result<()> {
    let path = path.as_ref();
    let data = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| AfinarError::Serialization {
        message: format!("JSON serialization failed: {e}"),
    })?;

    let tmp = temp_path(path);
    std::fs::write(&tmp, data.as_bytes()).map_err(|e| AfinarError::Export {
        path: path.to_path_buf(),
        message: format!("cannot write temporary file {}: {e}", tmp.display()),
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        AfinarError::Export {
            path: path.to_path_buf(),
            message: format!("cannot move temporary file into place: {e}"),
        }
    })?;
    Ok(())
}

/// Read a previously exported JSON document.
///
/// # Errors
///
/// Returns a contextual `Io` error when the file cannot be read and
/// `Serialization` when it does not parse.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| AfinarError::io(format!("reading export document {}", path.display()), e))?;
    serde_json::from_str(&content).map_err(|e| AfinarError::Serialization {
        message: format!("export document {} is invalid: {e}", path.display()),
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(|| std::ffi::OsString::from("export"), std::ffi::OsStr::to_os_string);
    name.push(".tmp");
    path.with_file_name(name)
}
