//! The fine-tuning loop.
//!
//! `FineTuner` runs head-only fine-tuning: the backbone stays frozen,
//! every batch does a forward pass to the pooled feature, computes the
//! head's closed-form gradients, and lets the optimizer update the
//! flattened head parameters. Epochs run to the configured count; the
//! first failed batch or checkpoint write aborts the run.

use crate::data::{lcg_shuffle, Batch, BatchStream, DatasetSplit, Preprocess, Sample};
use crate::model::ConvNet;
use crate::optim::{Optimizer, Param};
use crate::train::checkpoint::save_checkpoint;
use crate::train::loss::cross_entropy;
use crate::{AfinarError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::path::PathBuf;
use std::time::Instant;

/// Knobs for a fine-tuning run.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Number of passes over the training set.
    pub epochs: usize,
    /// Samples per batch.
    pub batch_size: usize,
    /// Learning rate applied to the optimizer at the start of the run.
    pub lr: f32,
    /// Save a checkpoint every N epochs; 0 disables checkpoints.
    pub save_every: usize,
    /// Report metrics every N epochs; 0 disables reporting.
    pub log_interval: usize,
    /// Directory receiving `epoch-{n}` checkpoint directories.
    pub checkpoint_dir: PathBuf,
    /// Base seed for the per-epoch shuffles.
    pub seed: u64,
    /// Assemble batches on a prefetch worker thread.
    pub prefetch: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 16,
            lr: 0.01,
            save_every: 1,
            log_interval: 1,
            checkpoint_dir: PathBuf::from("checkpoints"),
            seed: 42,
            prefetch: true,
        }
    }
}

/// Metrics for a single training epoch.
#[derive(Debug, Clone)]
pub struct EpochMetrics {
    /// Epoch number (0-indexed).
    pub epoch: usize,
    /// Mean training loss over the epoch's samples.
    pub train_loss: f32,
    /// Mean loss on the frozen eval split.
    pub eval_loss: f32,
    /// Accuracy on the frozen eval split (0.0-1.0).
    pub eval_accuracy: f32,
    /// Learning rate in effect.
    pub lr: f32,
    /// Epoch wall-clock time in milliseconds.
    pub epoch_time_ms: u64,
}

/// Result of the full fine-tuning run.
#[derive(Debug, Clone)]
pub struct TrainResult {
    /// Per-epoch metrics, one entry per completed epoch.
    pub epoch_metrics: Vec<EpochMetrics>,
    /// Eval accuracy after the last epoch.
    pub final_eval_accuracy: f32,
    /// Total wall-clock time in milliseconds.
    pub total_time_ms: u64,
}

/// Head-only fine-tuning loop.
pub struct FineTuner {
    net: ConvNet,
    optimizer: Box<dyn Optimizer>,
    options: TrainOptions,
    progress: Option<Box<dyn FnMut(&EpochMetrics)>>,
}

#[allow(clippy::missing_fields_in_debug)]
impl std::fmt::Debug for FineTuner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FineTuner")
            .field("options", &self.options)
            .field("param_count", &self.net.param_count())
            .finish()
    }
}

impl FineTuner {
    /// Create a tuner that owns the model and optimizer.
    ///
    /// # Errors
    ///
    /// Returns a config error when `epochs` or `batch_size` is zero.
    pub fn new(net: ConvNet, optimizer: Box<dyn Optimizer>, options: TrainOptions) -> Result<Self> {
        if options.epochs == 0 {
            return Err(AfinarError::ConfigValue {
                field: "training.epochs".to_string(),
                message: "must be at least 1".to_string(),
                suggestion: "Use a small value like 5 to start".to_string(),
            });
        }
        if options.batch_size == 0 {
            return Err(AfinarError::ConfigValue {
                field: "training.batch_size".to_string(),
                message: "must be at least 1".to_string(),
                suggestion: "Use a value like 16".to_string(),
            });
        }
        Ok(Self { net, optimizer, options, progress: None })
    }

    /// Install a per-epoch metrics observer; called every
    /// `log_interval` epochs.
    pub fn set_progress(&mut self, f: impl FnMut(&EpochMetrics) + 'static) {
        self.progress = Some(Box::new(f));
    }

    /// The model being tuned.
    #[must_use]
    pub fn model(&self) -> &ConvNet {
        &self.net
    }

    /// Give the tuned model back.
    #[must_use]
    pub fn into_model(self) -> ConvNet {
        self.net
    }

    /// Run the full fine-tuning loop.
    ///
    /// For each epoch:
    /// 1. shuffle the training samples (seed + epoch, so reruns are
    ///    identical but epochs differ);
    /// 2. stream batches and update the head per batch;
    /// 3. evaluate on the frozen eval split;
    /// 4. checkpoint when `save_every` divides the 1-based epoch.
    ///
    /// # Errors
    ///
    /// Returns the first batch, loss, or checkpoint error; the run does
    /// not continue past a failure.
    pub fn run(&mut self, split: &DatasetSplit, preprocess: &Preprocess) -> Result<TrainResult> {
        let total_start = Instant::now();
        self.optimizer.set_lr(self.options.lr);

        let mut epoch_metrics = Vec::with_capacity(self.options.epochs);
        let mut final_eval_accuracy = 0.0;

        for epoch in 0..self.options.epochs {
            let epoch_start = Instant::now();

            let mut order = split.train.to_vec();
            lcg_shuffle(&mut order, self.options.seed.wrapping_add(epoch as u64));

            let train_loss = self.train_epoch(order, preprocess)?;
            let (eval_loss, eval_accuracy) = self.evaluate(&split.eval, preprocess)?;
            final_eval_accuracy = eval_accuracy;

            let metrics = EpochMetrics {
                epoch,
                train_loss,
                eval_loss,
                eval_accuracy,
                lr: self.optimizer.lr(),
                epoch_time_ms: epoch_start.elapsed().as_millis() as u64,
            };

            if self.options.save_every > 0 && (epoch + 1) % self.options.save_every == 0 {
                save_checkpoint(&self.options.checkpoint_dir, &self.net, &metrics)?;
            }

            if self.options.log_interval > 0 && (epoch + 1) % self.options.log_interval == 0 {
                if let Some(progress) = &mut self.progress {
                    progress(&metrics);
                }
            }

            epoch_metrics.push(metrics);
        }

        Ok(TrainResult {
            epoch_metrics,
            final_eval_accuracy,
            total_time_ms: total_start.elapsed().as_millis() as u64,
        })
    }

    /// One pass over the shuffled training samples. Returns the mean
    /// loss weighted by batch size.
    fn train_epoch(&mut self, order: Vec<Sample>, preprocess: &Preprocess) -> Result<f32> {
        let mut total_loss = 0.0f32;
        let mut total_samples = 0usize;

        let stream = BatchStream::new(
            order,
            preprocess.clone(),
            self.options.batch_size,
            self.options.prefetch,
        );
        for batch in stream {
            let batch = batch?;
            let loss = self.train_batch(&batch)?;
            total_loss += loss * batch.len() as f32;
            total_samples += batch.len();
        }

        Ok(if total_samples > 0 { total_loss / total_samples as f32 } else { 0.0 })
    }

    /// Closed-form head update for one batch.
    ///
    /// With frozen features F, logits = F·Wᵀ + b, so
    /// dW = dlogitsᵀ·F and db is the column sum of dlogits.
    fn train_batch(&mut self, batch: &Batch) -> Result<f32> {
        let features = self.net.features(&batch.images)?;

        let (loss, dlogits, mut params, k, f_dim) = {
            let (weight, bias) = self.net.head_weights();
            let logits = features.dot(&weight.t()) + bias;
            let (loss, dlogits) = cross_entropy(&logits, &batch.labels)?;
            let params = [
                Param::new(Array1::from_iter(weight.iter().copied())),
                Param::new(bias.clone()),
            ];
            (loss, dlogits, params, weight.nrows(), weight.ncols())
        };

        let dw = dlogits.t().dot(&features);
        let db = dlogits.sum_axis(Axis(0));
        params[0].set_grad(Array1::from_iter(dw.iter().copied()));
        params[1].set_grad(db);

        self.optimizer.step(&mut params);

        let [w_param, b_param] = params;
        let weight = Array2::from_shape_vec((k, f_dim), w_param.into_data().to_vec())
            .map_err(|e| AfinarError::Internal { message: format!("head weight reshape: {e}") })?;
        self.net.set_head_weights(weight, b_param.into_data())?;

        Ok(loss)
    }

    /// Forward-only metrics on the frozen eval split.
    fn evaluate(&self, eval: &[Sample], preprocess: &Preprocess) -> Result<(f32, f32)> {
        if eval.is_empty() {
            return Ok((0.0, 0.0));
        }

        let mut total_loss = 0.0f32;
        let mut correct = 0usize;
        let mut total = 0usize;

        let stream =
            BatchStream::new(eval.to_vec(), preprocess.clone(), self.options.batch_size, false);
        for batch in stream {
            let batch = batch?;
            let logits = self.net.forward(&batch.images)?;
            let (loss, _) = cross_entropy(&logits, &batch.labels)?;
            total_loss += loss * batch.len() as f32;
            for (row, &label) in logits.outer_iter().zip(&batch.labels) {
                if predicted_class(&row) == label {
                    correct += 1;
                }
            }
            total += batch.len();
        }

        Ok((total_loss / total as f32, correct as f32 / total as f32))
    }
}

/// Index of the largest logit in a row.
fn predicted_class(row: &ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (i, &v) in row.iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}
