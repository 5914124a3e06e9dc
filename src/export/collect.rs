//! Activation collection over the eval split.

use crate::capture::LayerObserver;
use crate::data::{BatchStream, Preprocess, Sample};
use crate::export::bundle::{
    DatasetActivity, LayerInfo, ModelDescription, FORMAT_VERSION,
};
use crate::model::{ConvNet, CLASSIFIER_LAYER};
use crate::{AfinarError, Result};
use ndarray::{s, ArrayD, Axis};
use std::collections::BTreeMap;

/// What to collect and how to label the resulting document.
#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Name written into the activity document.
    pub name: String,
    /// Class names, indexed by label. Must be the label space the
    /// model's head was sized from.
    pub categories: Vec<String>,
    /// Samples per forward pass.
    pub batch_size: usize,
}

/// Assemble the model-side export document for the given layers.
///
/// # Errors
///
/// Returns `UnknownLayer` when a name is not a model layer.
pub fn describe_model(
    net: &ConvNet,
    layers: &[String],
    name: impl Into<String>,
) -> Result<ModelDescription> {
    let mut infos = Vec::with_capacity(layers.len());
    for layer in layers {
        infos.push(LayerInfo { name: layer.clone(), dim: net.output_dim(layer)? });
    }
    Ok(ModelDescription {
        name: name.into(),
        format_version: FORMAT_VERSION,
        layers: infos,
        classifier_layer: CLASSIFIER_LAYER.to_string(),
    })
}

/// Stream `samples` through the model in order, capturing every
/// observed layer, and build the index-aligned activity document.
///
/// Row `i` of `images`, `labels`, and each `activations` entry all come
/// from `samples[i]`; counts match across all collections.
///
/// # Errors
///
/// Returns the first batch or forward error; shape errors if a capture
/// does not cover the batch.
pub fn collect_activity(
    net: &ConvNet,
    observer: LayerObserver,
    samples: &[Sample],
    preprocess: &Preprocess,
    description: &ModelDescription,
    options: &CollectOptions,
) -> Result<DatasetActivity> {
    let mut observed = net.observed(observer);
    let layer_names: Vec<String> = observed.observer().layers().to_vec();

    let mut images: Vec<Vec<f32>> = Vec::with_capacity(samples.len());
    let mut labels: Vec<usize> = Vec::with_capacity(samples.len());
    let mut activations: BTreeMap<String, Vec<Vec<f32>>> = layer_names
        .iter()
        .map(|n| (n.clone(), Vec::with_capacity(samples.len())))
        .collect();

    let stream = BatchStream::new(
        samples.to_vec(),
        preprocess.clone(),
        options.batch_size.max(1),
        false,
    );
    for batch in stream {
        let batch = batch?;
        observed.forward(&batch.images)?;

        for i in 0..batch.len() {
            images.push(batch.images.slice(s![i, .., .., ..]).iter().copied().collect());
            labels.push(batch.labels[i]);
        }
        for name in &layer_names {
            let captured = observed.observer().capture(name).ok_or_else(|| {
                AfinarError::Internal {
                    message: format!("layer '{name}' was observed but never recorded"),
                }
            })?;
            let rows = activations.get_mut(name).ok_or_else(|| AfinarError::Internal {
                message: format!("no row collection for layer '{name}'"),
            })?;
            append_rows(rows, captured, batch.len())?;
        }
    }

    let (c, h, w) = preprocess.output_shape();
    Ok(DatasetActivity {
        name: options.name.clone(),
        format_version: FORMAT_VERSION,
        model: description.name.clone(),
        categories: options.categories.clone(),
        image_shape: vec![c, h, w],
        images,
        labels,
        activations,
        created_at: chrono::Utc::now().to_rfc3339(),
    })
}

/// Split a captured batch tensor along axis 0 into flattened rows.
fn append_rows(rows: &mut Vec<Vec<f32>>, tensor: &ArrayD<f32>, expected: usize) -> Result<()> {
    let n = tensor.shape().first().copied().unwrap_or(0);
    if n != expected {
        return Err(AfinarError::ShapeMismatch { expected: vec![expected], actual: vec![n] });
    }
    for row in tensor.axis_iter(Axis(0)) {
        rows.push(row.iter().copied().collect());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetConfig;
    use ndarray::Array3;

    fn net() -> ConvNet {
        let config = NetConfig {
            in_channels: 1,
            input_hw: (8, 8),
            conv_channels: [2, 3],
            num_classes: 2,
            init_seed: 21,
        };
        ConvNet::seeded(config).expect("valid config")
    }

    /// Distinct constant images so rows can be traced back to samples.
    fn samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                Sample::new(Array3::from_elem((1, 8, 8), i as f32 / n as f32), i % 2)
            })
            .collect()
    }

    fn preprocess() -> Preprocess {
        Preprocess::new(1, (8, 8), vec![0.5], vec![0.5]).expect("valid preprocess")
    }

    fn options(batch_size: usize) -> CollectOptions {
        CollectOptions {
            name: "unit-activity".to_string(),
            categories: vec!["even".to_string(), "odd".to_string()],
            batch_size,
        }
    }

    #[test]
    fn test_describe_model_lists_layer_widths() {
        let model = net();
        let layers = vec!["global_pool".to_string(), "head".to_string()];
        let desc = describe_model(&model, &layers, "m").expect("valid layers");

        assert_eq!(desc.format_version, FORMAT_VERSION);
        assert_eq!(desc.classifier_layer, "head");
        assert_eq!(desc.layers.len(), 2);
        assert_eq!(desc.layers[0], LayerInfo { name: "global_pool".to_string(), dim: 3 });
        assert_eq!(desc.layers[1], LayerInfo { name: "head".to_string(), dim: 2 });
    }

    #[test]
    fn test_describe_model_rejects_unknown_layer() {
        let model = net();
        let layers = vec!["linear1".to_string()];
        assert!(matches!(
            describe_model(&model, &layers, "m"),
            Err(AfinarError::UnknownLayer { .. })
        ));
    }

    #[test]
    fn test_rows_are_index_aligned_with_samples() {
        let model = net();
        let samples = samples(7);
        let prep = preprocess();
        let observer =
            LayerObserver::new(["global_pool", "head"]).expect("valid layers");
        let desc = describe_model(&model, observer.layers(), "m").expect("valid layers");

        let activity = collect_activity(&model, observer, &samples, &prep, &desc, &options(3))
            .expect("collection succeeds");

        assert_eq!(activity.len(), 7);
        assert_eq!(activity.images.len(), 7);
        assert_eq!(activity.activations["global_pool"].len(), 7);
        assert_eq!(activity.activations["head"].len(), 7);
        assert_eq!(activity.model, "m");
        assert_eq!(activity.image_shape, vec![1, 8, 8]);

        for (i, sample) in samples.iter().enumerate() {
            assert_eq!(activity.labels[i], sample.label);
            let expected: Vec<f32> = prep.apply(&sample.image).iter().copied().collect();
            assert_eq!(activity.images[i], expected);
        }
    }

    #[test]
    fn test_activation_rows_have_layer_widths() {
        let model = net();
        let samples = samples(4);
        let observer = LayerObserver::new(["pool2", "head"]).expect("valid layers");
        let desc = describe_model(&model, observer.layers(), "m").expect("valid layers");

        let activity =
            collect_activity(&model, observer, &samples, &preprocess(), &desc, &options(2))
                .expect("collection succeeds");

        for row in &activity.activations["pool2"] {
            assert_eq!(row.len(), model.output_dim("pool2").expect("known layer"));
        }
        for row in &activity.activations["head"] {
            assert_eq!(row.len(), 2);
        }
    }

    #[test]
    fn test_batch_size_does_not_change_rows() {
        let model = net();
        let samples = samples(6);
        let prep = preprocess();
        let desc = describe_model(&model, &["head".to_string()], "m").expect("valid layers");

        let collect = |bs: usize| {
            let observer = LayerObserver::new(["head"]).expect("valid layers");
            collect_activity(&model, observer, &samples, &prep, &desc, &options(bs))
                .expect("collection succeeds")
        };

        let by_one = collect(1);
        let by_four = collect(4);
        assert_eq!(by_one.labels, by_four.labels);
        for (a, b) in by_one.activations["head"].iter().zip(&by_four.activations["head"]) {
            for (x, y) in a.iter().zip(b) {
                assert!((x - y).abs() < 1e-5, "rows differ: {x} vs {y}");
            }
        }
    }

    #[test]
    fn test_empty_sample_list_gives_empty_documents() {
        let model = net();
        let observer = LayerObserver::new(["head"]).expect("valid layers");
        let desc = describe_model(&model, observer.layers(), "m").expect("valid layers");

        let activity = collect_activity(&model, observer, &[], &preprocess(), &desc, &options(4))
            .expect("collection succeeds");
        assert!(activity.is_empty());
        assert!(activity.activations["head"].is_empty());
    }
}
