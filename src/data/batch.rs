//! Batch assembly and streaming.
//!
//! `BatchStream` yields preprocessed batches over a sample sequence in
//! order, either inline or through a single prefetch worker feeding a
//! bounded channel. Both modes produce the identical batch sequence;
//! the worker only moves load-and-preprocess work off the training
//! thread. An assembly failure is surfaced as a fatal `Err` item and
//! ends the stream; batches are never silently skipped.

use crate::data::{Preprocess, Sample};
use crate::{AfinarError, Result};
use ndarray::{s, Array4};
use std::sync::mpsc;
use std::thread;

/// Bound on batches queued ahead of the consumer.
const PREFETCH_DEPTH: usize = 2;

/// A batch of preprocessed images in `N×C×H×W` layout with labels.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Preprocessed images, one row per sample.
    pub images: Array4<f32>,
    /// Ground-truth class indices, index-aligned with `images`.
    pub labels: Vec<usize>,
}

impl Batch {
    /// Create a batch from images and index-aligned labels.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` when the image count differs from the
    /// label count.
    pub fn new(images: Array4<f32>, labels: Vec<usize>) -> Result<Self> {
        if images.shape()[0] != labels.len() {
            return Err(AfinarError::ShapeMismatch {
                expected: vec![labels.len()],
                actual: vec![images.shape()[0]],
            });
        }
        Ok(Self { images, labels })
    }

    /// Number of samples in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True when the batch holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Assemble one preprocessed batch from a slice of samples.
///
/// # Errors
///
/// Returns `ShapeMismatch` when a sample's image has a zero dimension;
/// preprocessing cannot resample an empty image.
pub fn assemble_batch(samples: &[Sample], preprocess: &Preprocess) -> Result<Batch> {
    let (c, h, w) = preprocess.output_shape();
    let mut images = Array4::zeros((samples.len(), c, h, w));
    let mut labels = Vec::with_capacity(samples.len());
    for (i, sample) in samples.iter().enumerate() {
        if sample.image.is_empty() {
            return Err(AfinarError::ShapeMismatch {
                expected: vec![c, h, w],
                actual: sample.image.shape().to_vec(),
            });
        }
        let processed = preprocess.apply(&sample.image);
        images.slice_mut(s![i, .., .., ..]).assign(&processed);
        labels.push(sample.label);
    }
    Batch::new(images, labels)
}

/// Ordered stream of preprocessed batches.
pub struct BatchStream {
    inner: StreamInner,
}

enum StreamInner {
    Inline {
        samples: Vec<Sample>,
        preprocess: Preprocess,
        batch_size: usize,
        pos: usize,
    },
    Prefetch {
        rx: Option<mpsc::Receiver<Result<Batch>>>,
        handle: Option<thread::JoinHandle<()>>,
    },
}

impl BatchStream {
    /// Stream batches over `samples` in order.
    ///
    /// With `prefetch`, assembly runs on one worker thread ahead of the
    /// consumer, bounded by [`PREFETCH_DEPTH`]; otherwise it runs inline
    /// on the calling thread. A trailing partial batch is yielded as-is.
    #[must_use]
    pub fn new(
        samples: Vec<Sample>,
        preprocess: Preprocess,
        batch_size: usize,
        prefetch: bool,
    ) -> Self {
        let batch_size = batch_size.max(1);
        if !prefetch {
            return Self {
                inner: StreamInner::Inline { samples, preprocess, batch_size, pos: 0 },
            };
        }

        let (tx, rx) = mpsc::sync_channel(PREFETCH_DEPTH);
        let handle = thread::spawn(move || {
            for chunk in samples.chunks(batch_size) {
                let item = assemble_batch(chunk, &preprocess);
                let failed = item.is_err();
                if tx.send(item).is_err() {
                    return; // consumer dropped the stream
                }
                if failed {
                    return; // fail fast: nothing follows the first error
                }
            }
        });
        Self { inner: StreamInner::Prefetch { rx: Some(rx), handle: Some(handle) } }
    }
}

impl Iterator for BatchStream {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            StreamInner::Inline { samples, preprocess, batch_size, pos } => {
                if *pos >= samples.len() {
                    return None;
                }
                let end = (*pos + *batch_size).min(samples.len());
                let item = assemble_batch(&samples[*pos..end], preprocess);
                *pos = if item.is_err() { samples.len() } else { end };
                Some(item)
            }
            StreamInner::Prefetch { rx, .. } => rx.as_ref()?.recv().ok(),
        }
    }
}

impl Drop for BatchStream {
    fn drop(&mut self) {
        if let StreamInner::Prefetch { rx, handle } = &mut self.inner {
            // Closing the channel unblocks a worker waiting to send.
            drop(rx.take());
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn preprocess() -> Preprocess {
        Preprocess::new(1, (4, 4), vec![0.0], vec![1.0]).expect("valid preprocess")
    }

    fn tagged_samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                let image = Array3::from_elem((1, 4, 4), i as f32 / n as f32);
                Sample::new(image, i)
            })
            .collect()
    }

    #[test]
    fn test_batch_rejects_label_count_mismatch() {
        let images = Array4::zeros((3, 1, 4, 4));
        let result = Batch::new(images, vec![0, 1]);
        assert!(matches!(result, Err(AfinarError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_empty_image_is_an_assembly_error() {
        let samples = vec![Sample::new(Array3::zeros((1, 0, 0)), 0)];

        let result = assemble_batch(&samples, &preprocess());
        assert!(matches!(result, Err(AfinarError::ShapeMismatch { .. })));

        // The stream yields the same error as its only item.
        let mut stream = BatchStream::new(samples, preprocess(), 4, false);
        let item = stream.next().expect("one failed item");
        assert!(matches!(item, Err(AfinarError::ShapeMismatch { .. })));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_inline_stream_order_and_sizes() {
        let stream = BatchStream::new(tagged_samples(7), preprocess(), 3, false);
        let batches: Vec<Batch> = stream.map(|b| b.expect("assembly succeeds")).collect();

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].labels, [0, 1, 2]);
        assert_eq!(batches[1].labels, [3, 4, 5]);
        assert_eq!(batches[2].labels, [6]);
        assert_eq!(batches[0].images.shape(), &[3, 1, 4, 4]);
        assert_eq!(batches[2].images.shape(), &[1, 1, 4, 4]);
    }

    #[test]
    fn test_prefetch_matches_inline_sequence() {
        let inline: Vec<Batch> = BatchStream::new(tagged_samples(10), preprocess(), 4, false)
            .map(|b| b.expect("assembly succeeds"))
            .collect();
        let fetched: Vec<Batch> = BatchStream::new(tagged_samples(10), preprocess(), 4, true)
            .map(|b| b.expect("assembly succeeds"))
            .collect();

        assert_eq!(inline.len(), fetched.len());
        for (a, b) in inline.iter().zip(&fetched) {
            assert_eq!(a.labels, b.labels);
            assert_eq!(a.images, b.images);
        }
    }

    #[test]
    fn test_batch_rows_are_preprocessed_samples() {
        let p = Preprocess::new(1, (4, 4), vec![0.5], vec![2.0]).expect("valid preprocess");
        let samples = tagged_samples(3);
        let expected = p.apply(&samples[1].image);

        let batches: Vec<Batch> = BatchStream::new(samples, p, 2, false)
            .map(|b| b.expect("assembly succeeds"))
            .collect();

        assert_eq!(batches[0].images.slice(s![1, .., .., ..]), expected.view());
    }

    #[test]
    fn test_empty_sample_list_yields_no_batches() {
        let mut stream = BatchStream::new(Vec::new(), preprocess(), 4, false);
        assert!(stream.next().is_none());

        let mut stream = BatchStream::new(Vec::new(), preprocess(), 4, true);
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_dropping_prefetch_stream_early_does_not_hang() {
        let mut stream = BatchStream::new(tagged_samples(64), preprocess(), 1, true);
        let first = stream.next().expect("at least one batch").expect("assembly succeeds");
        assert_eq!(first.labels, [0]);
        drop(stream);
    }
}
