//! The convolutional classifier.
//!
//! A small fixed-topology CNN: two 3x3 same-padding conv blocks with
//! ReLU and 2x2 max pooling, global average pooling, and a linear
//! classification head. Every stage has a stable name in
//! [`LAYER_NAMES`]; activation capture and export address layers by
//! these names only.

use crate::capture::LayerObserver;
use crate::model::layers;
use crate::{AfinarError, Result};
use ndarray::{Array, Array1, Array2, Array4, Dimension};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Layer names in forward order. `conv1`/`conv2` record the
/// pre-activation response; `pool1`/`pool2` the pooled rectified maps.
pub const LAYER_NAMES: [&str; 6] = ["conv1", "pool1", "conv2", "pool2", "global_pool", "head"];

/// The layer whose output feeds the softmax; its width is the class count.
pub const CLASSIFIER_LAYER: &str = "head";

/// Network topology and initialization parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetConfig {
    /// Input channel count.
    pub in_channels: usize,
    /// Input resolution as `(height, width)`.
    pub input_hw: (usize, usize),
    /// Output channels of the two conv blocks.
    pub conv_channels: [usize; 2],
    /// Width of the classification head.
    pub num_classes: usize,
    /// Seed for deterministic weight initialization.
    pub init_seed: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            input_hw: (32, 32),
            conv_channels: [8, 16],
            num_classes: 10,
            init_seed: 42,
        }
    }
}

impl NetConfig {
    /// Check structural constraints.
    ///
    /// # Errors
    ///
    /// Returns a config error on zero channel counts, fewer than two
    /// classes, or a resolution too small for two pooling stages.
    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 {
            return Err(AfinarError::ConfigValue {
                field: "model.in_channels".to_string(),
                message: "must be at least 1".to_string(),
                suggestion: "Use 1 for grayscale or 3 for RGB input".to_string(),
            });
        }
        if self.conv_channels.iter().any(|&c| c == 0) {
            return Err(AfinarError::ConfigValue {
                field: "model.conv_channels".to_string(),
                message: format!("channel counts must be positive, got {:?}", self.conv_channels),
                suggestion: "Use values like [8, 16]".to_string(),
            });
        }
        if self.num_classes < 2 {
            return Err(AfinarError::ConfigValue {
                field: "model.num_classes".to_string(),
                message: format!("need at least 2 classes to classify, got {}", self.num_classes),
                suggestion: "Check that the dataset labels cover more than one class".to_string(),
            });
        }
        let (h, w) = self.input_hw;
        if h < 4 || w < 4 {
            return Err(AfinarError::ConfigValue {
                field: "model.input_hw".to_string(),
                message: format!("resolution {h}x{w} is too small for two pooling stages"),
                suggestion: "Use a resolution of at least 4x4, e.g. [32, 32]".to_string(),
            });
        }
        Ok(())
    }

    /// Per-sample feature width after global average pooling.
    #[must_use]
    pub fn feature_dim(&self) -> usize {
        self.conv_channels[1]
    }

    /// Spatial resolution after `pool1`.
    fn hw_after_pool1(&self) -> (usize, usize) {
        layers::pool_output_hw(self.input_hw, 2, 2)
    }

    /// Spatial resolution after `pool2`.
    fn hw_after_pool2(&self) -> (usize, usize) {
        layers::pool_output_hw(self.hw_after_pool1(), 2, 2)
    }
}

/// The classifier network. Backbone weights are fixed after load;
/// fine-tuning touches only the head.
#[derive(Debug, Clone)]
pub struct ConvNet {
    config: NetConfig,
    conv1_w: Array4<f32>,
    conv1_b: Array1<f32>,
    conv2_w: Array4<f32>,
    conv2_b: Array1<f32>,
    head_w: Array2<f32>,
    head_b: Array1<f32>,
}

impl ConvNet {
    /// Build a network with deterministic seeded initialization.
    ///
    /// # Errors
    ///
    /// Returns a config error when `config` fails validation.
    pub fn seeded(config: NetConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.init_seed);
        let [c1, c2] = config.conv_channels;

        let (conv1_w, conv1_b) = init_conv(c1, config.in_channels, 3, &mut rng);
        let (conv2_w, conv2_b) = init_conv(c2, c1, 3, &mut rng);
        let (head_w, head_b) = init_linear(config.num_classes, c2, &mut rng);

        Ok(Self { config, conv1_w, conv1_b, conv2_w, conv2_b, head_w, head_b })
    }

    /// Assemble a network from explicit parameter arrays (weight loading).
    pub(crate) fn assemble(
        config: NetConfig,
        conv1_w: Array4<f32>,
        conv1_b: Array1<f32>,
        conv2_w: Array4<f32>,
        conv2_b: Array1<f32>,
        head_w: Array2<f32>,
        head_b: Array1<f32>,
    ) -> Result<Self> {
        config.validate()?;
        let [c1, c2] = config.conv_channels;
        check_shape(conv1_w.shape(), &[c1, config.in_channels, 3, 3])?;
        check_shape(conv1_b.shape(), &[c1])?;
        check_shape(conv2_w.shape(), &[c2, c1, 3, 3])?;
        check_shape(conv2_b.shape(), &[c2])?;
        check_shape(head_w.shape(), &[config.num_classes, c2])?;
        check_shape(head_b.shape(), &[config.num_classes])?;
        Ok(Self { config, conv1_w, conv1_b, conv2_w, conv2_b, head_w, head_b })
    }

    /// Network configuration.
    #[must_use]
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// All layer names in forward order.
    #[must_use]
    pub fn layer_names() -> &'static [&'static str] {
        &LAYER_NAMES
    }

    /// True when `name` is a capturable layer.
    #[must_use]
    pub fn has_layer(name: &str) -> bool {
        LAYER_NAMES.contains(&name)
    }

    /// Flattened per-sample output width of a named layer.
    ///
    /// # Errors
    ///
    /// Returns `UnknownLayer` for names outside [`LAYER_NAMES`].
    pub fn output_dim(&self, layer: &str) -> Result<usize> {
        let cfg = &self.config;
        let [c1, c2] = cfg.conv_channels;
        let (h, w) = cfg.input_hw;
        let (h1, w1) = cfg.hw_after_pool1();
        let (h2, w2) = cfg.hw_after_pool2();
        match layer {
            "conv1" => Ok(c1 * h * w),
            "pool1" => Ok(c1 * h1 * w1),
            "conv2" => Ok(c2 * h1 * w1),
            "pool2" => Ok(c2 * h2 * w2),
            "global_pool" => Ok(c2),
            "head" => Ok(cfg.num_classes),
            _ => Err(AfinarError::UnknownLayer {
                name: layer.to_string(),
                available: LAYER_NAMES.join(", "),
            }),
        }
    }

    /// Total parameter count, for startup logging.
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.conv1_w.len()
            + self.conv1_b.len()
            + self.conv2_w.len()
            + self.conv2_b.len()
            + self.head_w.len()
            + self.head_b.len()
    }

    /// Named parameter tensors in serialization order, flattened.
    pub(crate) fn param_tensors(&self) -> Vec<(&'static str, Vec<usize>, Vec<f32>)> {
        vec![
            tensor_entry("conv1.weight", &self.conv1_w),
            tensor_entry("conv1.bias", &self.conv1_b),
            tensor_entry("conv2.weight", &self.conv2_w),
            tensor_entry("conv2.bias", &self.conv2_b),
            tensor_entry("head.weight", &self.head_w),
            tensor_entry("head.bias", &self.head_b),
        ]
    }

    /// Plain forward pass to logits (`N×num_classes`).
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` when the input does not match the
    /// configured channel count and resolution.
    pub fn forward(&self, x: &Array4<f32>) -> Result<Array2<f32>> {
        self.forward_impl(x, None)
    }

    /// Frozen-backbone forward to pooled features (`N×feature_dim`).
    pub fn features(&self, x: &Array4<f32>) -> Result<Array2<f32>> {
        self.backbone_impl(x, None)
    }

    /// Wrap this model for observed forward passes.
    #[must_use]
    pub fn observed(&self, observer: LayerObserver) -> crate::capture::Observed<'_> {
        crate::capture::Observed::new(self, observer)
    }

    /// Current head parameters as `(weight OUT×IN, bias OUT)`.
    #[must_use]
    pub fn head_weights(&self) -> (&Array2<f32>, &Array1<f32>) {
        (&self.head_w, &self.head_b)
    }

    /// Overwrite the head parameters (optimizer write-back).
    pub(crate) fn set_head_weights(&mut self, weight: Array2<f32>, bias: Array1<f32>) -> Result<()> {
        check_shape(weight.shape(), &[self.config.num_classes, self.config.feature_dim()])?;
        check_shape(bias.shape(), &[self.config.num_classes])?;
        self.head_w = weight;
        self.head_b = bias;
        Ok(())
    }

    /// Replace the classification head for a new label space, leaving
    /// the backbone untouched. The head draws from a fresh seeded
    /// stream, so the same pretrained state plus the same dataset give
    /// the same starting point.
    ///
    /// # Errors
    ///
    /// Returns a config error when `num_classes < 2`.
    pub fn with_head(mut self, num_classes: usize) -> Result<Self> {
        self.config.num_classes = num_classes;
        self.config.validate()?;
        let mut rng = StdRng::seed_from_u64(self.config.init_seed.wrapping_add(1));
        let (head_w, head_b) = init_linear(num_classes, self.config.feature_dim(), &mut rng);
        self.head_w = head_w;
        self.head_b = head_b;
        Ok(self)
    }

    /// Shared forward path; recording is the only difference between
    /// plain and observed passes.
    pub(crate) fn forward_impl(
        &self,
        x: &Array4<f32>,
        mut observer: Option<&mut LayerObserver>,
    ) -> Result<Array2<f32>> {
        let pooled = self.backbone_impl(x, observer.as_deref_mut())?;
        let logits = layers::linear(&pooled, &self.head_w, &self.head_b);
        record(&mut observer, "head", &logits);
        Ok(logits)
    }

    fn backbone_impl(
        &self,
        x: &Array4<f32>,
        mut observer: Option<&mut LayerObserver>,
    ) -> Result<Array2<f32>> {
        self.check_input(x)?;
        let conv1 = layers::conv2d(x, &self.conv1_w, &self.conv1_b, 1);
        record(&mut observer, "conv1", &conv1);
        let pool1 = layers::maxpool2(&layers::relu(&conv1));
        record(&mut observer, "pool1", &pool1);
        let conv2 = layers::conv2d(&pool1, &self.conv2_w, &self.conv2_b, 1);
        record(&mut observer, "conv2", &conv2);
        let pool2 = layers::maxpool2(&layers::relu(&conv2));
        record(&mut observer, "pool2", &pool2);
        let pooled = layers::global_avg_pool(&pool2);
        record(&mut observer, "global_pool", &pooled);
        Ok(pooled)
    }

    fn check_input(&self, x: &Array4<f32>) -> Result<()> {
        let (_, c, h, w) = x.dim();
        let (ih, iw) = self.config.input_hw;
        if c != self.config.in_channels || (h, w) != (ih, iw) {
            return Err(AfinarError::ShapeMismatch {
                expected: vec![self.config.in_channels, ih, iw],
                actual: vec![c, h, w],
            });
        }
        Ok(())
    }
}

/// Store a layer output in the observer when that layer is observed.
fn record<D: Dimension>(
    observer: &mut Option<&mut LayerObserver>,
    name: &str,
    tensor: &Array<f32, D>,
) {
    if let Some(obs) = observer.as_deref_mut() {
        if obs.observes(name) {
            obs.record(name, tensor.clone().into_dyn());
        }
    }
}

fn tensor_entry<D: Dimension>(
    name: &'static str,
    tensor: &Array<f32, D>,
) -> (&'static str, Vec<usize>, Vec<f32>) {
    (name, tensor.shape().to_vec(), tensor.iter().copied().collect())
}

fn check_shape(actual: &[usize], expected: &[usize]) -> Result<()> {
    if actual != expected {
        return Err(AfinarError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

fn init_conv(oc: usize, ic: usize, k: usize, rng: &mut StdRng) -> (Array4<f32>, Array1<f32>) {
    let fan_in = (ic * k * k) as f32;
    let scale = (2.0 / fan_in).sqrt();
    let w = Array4::from_shape_fn((oc, ic, k, k), |_| rng.random::<f32>() * scale - scale / 2.0);
    (w, Array1::zeros(oc))
}

fn init_linear(out_dim: usize, in_dim: usize, rng: &mut StdRng) -> (Array2<f32>, Array1<f32>) {
    let scale = (2.0 / in_dim as f32).sqrt();
    let w = Array2::from_shape_fn((out_dim, in_dim), |_| rng.random::<f32>() * scale - scale / 2.0);
    (w, Array1::zeros(out_dim))
}
