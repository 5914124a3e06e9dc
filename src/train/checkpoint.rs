//! Checkpoint directories.
//!
//! A checkpoint is a directory `epoch-{n}/` holding `model.json` (the
//! full versioned model state) and `metadata.json` (epoch metrics and
//! a timestamp). Both files must land for the checkpoint to count; any
//! failure is an error the caller aborts on, so a run never continues
//! believing a checkpoint exists that does not.

use crate::model::{zoo, ConvNet};
use crate::train::EpochMetrics;
use crate::{AfinarError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sidecar metadata stored next to the model state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Epoch the checkpoint was taken after (0-indexed).
    pub epoch: usize,
    /// Mean training loss of that epoch.
    pub train_loss: f32,
    /// Mean loss on the frozen eval split.
    pub eval_loss: f32,
    /// Accuracy on the frozen eval split.
    pub eval_accuracy: f32,
    /// Learning rate in effect.
    pub lr: f32,
    /// RFC 3339 timestamp of the write.
    pub saved_at: String,
}

/// Write `epoch-{n}/` under `dir` and return its path.
///
/// # Errors
///
/// Returns `Checkpoint` when the directory or either file cannot be
/// written.
pub fn save_checkpoint(dir: &Path, net: &ConvNet, metrics: &EpochMetrics) -> Result<PathBuf> {
    let path = dir.join(format!("epoch-{}", metrics.epoch));
    std::fs::create_dir_all(&path).map_err(|e| AfinarError::Checkpoint {
        path: path.clone(),
        message: format!("cannot create directory: {e}"),
    })?;

    let state = zoo::net_to_state(net, format!("epoch-{}", metrics.epoch));
    zoo::save_state(&state, path.join("model.json")).map_err(|e| AfinarError::Checkpoint {
        path: path.clone(),
        message: format!("model state: {e}"),
    })?;

    let meta = CheckpointMeta {
        epoch: metrics.epoch,
        train_loss: metrics.train_loss,
        eval_loss: metrics.eval_loss,
        eval_accuracy: metrics.eval_accuracy,
        lr: metrics.lr,
        saved_at: chrono::Utc::now().to_rfc3339(),
    };
    let json = serde_json::to_string_pretty(&meta).map_err(|e| AfinarError::Checkpoint {
        path: path.clone(),
        message: format!("metadata encoding: {e}"),
    })?;
    std::fs::write(path.join("metadata.json"), json).map_err(|e| AfinarError::Checkpoint {
        path: path.clone(),
        message: format!("cannot write metadata.json: {e}"),
    })?;

    Ok(path)
}

/// Restore a model and its metadata from a checkpoint directory.
///
/// `init_seed` seeds any later head replacement, as in
/// [`zoo::load_pretrained`].
///
/// # Errors
///
/// Returns `Checkpoint` when either file is missing or invalid.
pub fn load_checkpoint(path: &Path, init_seed: u64) -> Result<(ConvNet, CheckpointMeta)> {
    let net = zoo::load_pretrained(path.join("model.json"), init_seed).map_err(|e| {
        AfinarError::Checkpoint { path: path.to_path_buf(), message: format!("model state: {e}") }
    })?;

    let meta_path = path.join("metadata.json");
    let content = std::fs::read_to_string(&meta_path).map_err(|e| AfinarError::Checkpoint {
        path: path.to_path_buf(),
        message: format!("cannot read metadata.json: {e}"),
    })?;
    let meta = serde_json::from_str(&content).map_err(|e| AfinarError::Checkpoint {
        path: path.to_path_buf(),
        message: format!("metadata.json is invalid: {e}"),
    })?;

    Ok((net, meta))
}
