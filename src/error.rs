//! Error types with actionable diagnostics.
//!
//! Every variant carries enough context to fix the problem without
//! consulting external documentation. All pipeline failures are fatal:
//! the run stops at the first error instead of continuing with partial
//! state.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for afinar operations.
pub type Result<T> = std::result::Result<T, AfinarError>;

/// Errors that can occur in the fine-tuning pipeline.
///
/// Each variant includes actionable context so problems are immediately
/// visible and fixable.
#[derive(Error, Debug)]
pub enum AfinarError {
    /// Configuration file not found at expected path.
    #[error("Configuration file not found: {path}\n  → Create a config file or pass --config with a different path")]
    ConfigNotFound { path: PathBuf },

    /// Configuration file has invalid syntax.
    #[error("Invalid configuration syntax in {path}:\n  {message}\n  → Check YAML syntax at the indicated line")]
    ConfigParsing { path: PathBuf, message: String },

    /// Configuration value is invalid.
    #[error("Invalid configuration value for '{field}': {message}\n  → {suggestion}")]
    ConfigValue { field: String, message: String, suggestion: String },

    /// Dataset file not found.
    #[error("Dataset file not found: {path}\n  → Download the dataset or check the data.images/data.labels paths")]
    DatasetNotFound { path: PathBuf },

    /// Dataset file exists but cannot be decoded.
    #[error("Invalid dataset file {path}:\n  {message}\n  → The file may be truncated or not IDX format; re-download it")]
    DatasetParse { path: PathBuf, message: String },

    /// Pretrained weights file not found.
    #[error("Pretrained weights not found: {path}\n  → Check model.weights or omit it to initialize from scratch")]
    WeightsNotFound { path: PathBuf },

    /// Requested capture layer does not exist in the network.
    #[error("Unknown capture layer '{name}'\n  → Available layers: {available}")]
    UnknownLayer { name: String, available: String },

    /// Invalid tensor shape.
    #[error("Tensor shape mismatch: expected {expected:?}, got {actual:?}\n  → Check input_hw, in_channels, and the loaded weight shapes")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    /// Training step failed (e.g. loss became non-finite).
    #[error("Training failed: {message}\n  → Try a lower learning rate or a larger batch size")]
    Train { message: String },

    /// Checkpoint could not be written or read.
    #[error("Checkpoint error at {path}:\n  {message}\n  → Check free space and permissions on checkpoint_dir")]
    Checkpoint { path: PathBuf, message: String },

    /// Export bundle could not be written.
    #[error("Export failed for {path}:\n  {message}\n  → Check free space and that the parent directory exists")]
    Export { path: PathBuf, message: String },

    /// IO error with context.
    #[error("IO error: {context}\n  Cause: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Generic error for unexpected conditions.
    #[error("Internal error: {message}\n  → Please report this bug at https://github.com/paiml/afinar/issues")]
    Internal { message: String },
}

impl AfinarError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// Check if this error is user-recoverable.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::ConfigParsing { .. }
                | Self::ConfigValue { .. }
                | Self::DatasetNotFound { .. }
                | Self::DatasetParse { .. }
                | Self::WeightsNotFound { .. }
                | Self::UnknownLayer { .. }
        )
    }

    /// Get the error code for structured output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } => "E001",
            Self::ConfigParsing { .. } => "E002",
            Self::ConfigValue { .. } => "E003",
            Self::DatasetNotFound { .. } => "E010",
            Self::DatasetParse { .. } => "E011",
            Self::WeightsNotFound { .. } => "E012",
            Self::UnknownLayer { .. } => "E020",
            Self::ShapeMismatch { .. } => "E030",
            Self::Train { .. } => "E031",
            Self::Checkpoint { .. } => "E040",
            Self::Export { .. } => "E041",
            Self::Io { .. } => "E050",
            Self::Serialization { .. } => "E051",
            Self::Internal { .. } => "E999",
        }
    }
}
