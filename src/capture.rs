//! Activation capture.
//!
//! Capture is an explicit capability, not hidden instrumentation. The
//! caller builds a [`LayerObserver`] naming the layers it wants, wraps
//! the model with [`Observed`], runs forward passes, and detaches the
//! wrapper to take the recorded tensors. The model is never modified:
//! the wrapper holds a shared reference, and the observed path runs the
//! same code as the plain path with recording as the only difference.

use crate::model::ConvNet;
use crate::{AfinarError, Result};
use ndarray::{Array2, Array4, ArrayD};
use std::collections::BTreeMap;

/// Caller-owned recorder mapping layer names to their most recent
/// output tensor.
#[derive(Debug, Clone)]
pub struct LayerObserver {
    /// Observed layer names in forward order, deduplicated.
    observed: Vec<String>,
    captures: BTreeMap<String, ArrayD<f32>>,
}

impl LayerObserver {
    /// Create an observer for the given layer names.
    ///
    /// Names are validated against the model's layer registry; the
    /// observed set is kept in forward order with duplicates dropped.
    ///
    /// # Errors
    ///
    /// Returns `UnknownLayer` (listing the valid names) when any
    /// requested name is not a model layer.
    pub fn new<I, S>(layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requested: Vec<String> = layers.into_iter().map(|s| s.as_ref().to_string()).collect();
        for name in &requested {
            if !ConvNet::has_layer(name) {
                return Err(AfinarError::UnknownLayer {
                    name: name.clone(),
                    available: ConvNet::layer_names().join(", "),
                });
            }
        }
        let observed = ConvNet::layer_names()
            .iter()
            .filter(|n| requested.iter().any(|r| r == **n))
            .map(|n| (*n).to_string())
            .collect();
        Ok(Self { observed, captures: BTreeMap::new() })
    }

    /// Observed layer names in forward order.
    #[must_use]
    pub fn layers(&self) -> &[String] {
        &self.observed
    }

    /// True when `name` is in the observed set.
    #[must_use]
    pub fn observes(&self, name: &str) -> bool {
        self.observed.iter().any(|n| n == name)
    }

    /// The most recent capture for `name`, if a pass has produced one.
    #[must_use]
    pub fn capture(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.captures.get(name)
    }

    /// All captures recorded so far.
    #[must_use]
    pub fn captures(&self) -> &BTreeMap<String, ArrayD<f32>> {
        &self.captures
    }

    /// Drop recorded tensors, keeping the observed set.
    pub fn clear(&mut self) {
        self.captures.clear();
    }

    /// Store a layer output, replacing any previous capture.
    pub(crate) fn record(&mut self, name: &str, tensor: ArrayD<f32>) {
        self.captures.insert(name.to_string(), tensor);
    }
}

/// A model wrapped for observed forward passes.
pub struct Observed<'m> {
    model: &'m ConvNet,
    observer: LayerObserver,
}

impl<'m> Observed<'m> {
    /// Attach an observer to a model.
    #[must_use]
    pub fn new(model: &'m ConvNet, observer: LayerObserver) -> Self {
        Self { model, observer }
    }

    /// Forward pass that records observed layer outputs.
    ///
    /// Computes exactly what [`ConvNet::forward`] computes.
    ///
    /// # Errors
    ///
    /// Same contract as the plain forward pass.
    pub fn forward(&mut self, x: &Array4<f32>) -> Result<Array2<f32>> {
        self.model.forward_impl(x, Some(&mut self.observer))
    }

    /// The wrapped model.
    #[must_use]
    pub fn model(&self) -> &ConvNet {
        self.model
    }

    /// The observer and its captures so far.
    #[must_use]
    pub fn observer(&self) -> &LayerObserver {
        &self.observer
    }

    /// Consume the wrapper, returning the observer with its captures.
    /// The model is left exactly as it was.
    #[must_use]
    pub fn detach(self) -> LayerObserver {
        self.observer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetConfig;
    use ndarray::Array4;

    fn net() -> ConvNet {
        let config = NetConfig {
            in_channels: 1,
            input_hw: (8, 8),
            conv_channels: [2, 3],
            num_classes: 4,
            init_seed: 11,
        };
        ConvNet::seeded(config).expect("valid config")
    }

    fn input(fill: f32) -> Array4<f32> {
        Array4::from_shape_fn((2, 1, 8, 8), |(b, _, y, x)| {
            fill + (b * 64 + y * 8 + x) as f32 * 1e-3
        })
    }

    #[test]
    fn test_unknown_layer_rejected_with_alternatives() {
        let err = LayerObserver::new(["linear1"]).err().expect("unknown layer must fail");
        let msg = err.to_string();
        assert!(msg.contains("linear1"));
        assert!(msg.contains("conv1, pool1, conv2, pool2, global_pool, head"));
    }

    #[test]
    fn test_layers_deduplicated_in_forward_order() {
        let obs = LayerObserver::new(["head", "global_pool", "global_pool", "conv1"])
            .expect("valid layers");
        assert_eq!(obs.layers(), ["conv1", "global_pool", "head"]);
    }

    #[test]
    fn test_observed_forward_equals_plain_forward() {
        let model = net();
        let x = input(0.2);
        let plain = model.forward(&x).expect("forward");

        let mut wrapped = model.observed(LayerObserver::new(["global_pool"]).unwrap());
        let observed = wrapped.forward(&x).expect("observed forward");

        assert_eq!(plain, observed);
    }

    #[test]
    fn test_capture_equals_direct_computation() {
        let model = net();
        let x = input(0.5);

        let mut wrapped = model.observed(LayerObserver::new(["global_pool", "head"]).unwrap());
        let logits = wrapped.forward(&x).expect("observed forward");
        let obs = wrapped.detach();

        let features = model.features(&x).expect("features");
        assert_eq!(
            obs.capture("global_pool").expect("captured"),
            &features.into_dyn()
        );
        assert_eq!(obs.capture("head").expect("captured"), &logits.into_dyn());
    }

    #[test]
    fn test_capture_keeps_most_recent_pass() {
        let model = net();
        let first = input(0.1);
        let second = input(0.9);

        let mut wrapped = model.observed(LayerObserver::new(["global_pool"]).unwrap());
        wrapped.forward(&first).expect("first pass");
        let after_first = wrapped.observer().capture("global_pool").unwrap().clone();
        wrapped.forward(&second).expect("second pass");
        let after_second = wrapped.detach();

        let expected = model.features(&second).expect("features").into_dyn();
        assert_eq!(after_second.capture("global_pool").unwrap(), &expected);
        assert_ne!(after_second.capture("global_pool").unwrap(), &after_first);
    }

    #[test]
    fn test_all_layers_observable_simultaneously() {
        let model = net();
        let mut wrapped = model.observed(LayerObserver::new(ConvNet::layer_names()).unwrap());
        wrapped.forward(&input(0.3)).expect("observed forward");
        let obs = wrapped.detach();

        assert_eq!(obs.capture("conv1").unwrap().shape(), &[2, 2, 8, 8]);
        assert_eq!(obs.capture("pool1").unwrap().shape(), &[2, 2, 4, 4]);
        assert_eq!(obs.capture("conv2").unwrap().shape(), &[2, 3, 4, 4]);
        assert_eq!(obs.capture("pool2").unwrap().shape(), &[2, 3, 2, 2]);
        assert_eq!(obs.capture("global_pool").unwrap().shape(), &[2, 3]);
        assert_eq!(obs.capture("head").unwrap().shape(), &[2, 4]);
    }

    #[test]
    fn test_detach_reattach_cycles_reproduce_captures() {
        let model = net();
        let x = input(0.4);
        let mut observer = LayerObserver::new(["pool2"]).unwrap();
        let mut reference = None;

        for _ in 0..3 {
            let mut wrapped = model.observed(observer);
            wrapped.forward(&x).expect("observed forward");
            observer = wrapped.detach();

            let captured = observer.capture("pool2").unwrap().clone();
            match &reference {
                None => reference = Some(captured),
                Some(expected) => assert_eq!(&captured, expected),
            }
        }
    }

    #[test]
    fn test_unobserved_layers_are_not_recorded() {
        let model = net();
        let mut wrapped = model.observed(LayerObserver::new(["head"]).unwrap());
        wrapped.forward(&input(0.2)).expect("observed forward");
        let obs = wrapped.detach();

        assert!(obs.capture("conv1").is_none());
        assert!(obs.capture("global_pool").is_none());
        assert_eq!(obs.captures().len(), 1);
    }

    #[test]
    fn test_clear_keeps_observed_set() {
        let model = net();
        let mut wrapped = model.observed(LayerObserver::new(["head"]).unwrap());
        wrapped.forward(&input(0.2)).expect("observed forward");
        let mut obs = wrapped.detach();

        obs.clear();
        assert!(obs.capture("head").is_none());
        assert!(obs.observes("head"));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::model::NetConfig;
    use proptest::prelude::*;

    fn small_net() -> ConvNet {
        let config = NetConfig {
            in_channels: 1,
            input_hw: (4, 4),
            conv_channels: [2, 2],
            num_classes: 3,
            init_seed: 5,
        };
        ConvNet::seeded(config).expect("valid config")
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_observation_never_changes_the_output(
            pixels in proptest::collection::vec(-1.0f32..1.0, 16),
        ) {
            let model = small_net();
            let x = Array4::from_shape_vec((1, 1, 4, 4), pixels).unwrap();

            let plain = model.forward(&x).unwrap();
            let mut wrapped =
                model.observed(LayerObserver::new(ConvNet::layer_names()).unwrap());
            let observed = wrapped.forward(&x).unwrap();

            prop_assert_eq!(plain, observed);
        }
    }
}
