//! Deterministic train/eval splitting.
//!
//! The split is created once at startup and never re-sampled: the eval
//! set stays frozen across epochs so accuracy numbers are comparable.

use crate::data::{Dataset, Sample};
use crate::{AfinarError, Result};

/// An immutable, disjoint partition of a dataset.
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    /// Samples the tuner may shuffle and batch.
    pub train: Vec<Sample>,
    /// Frozen evaluation samples, in split order.
    pub eval: Vec<Sample>,
}

impl DatasetSplit {
    /// Total number of samples across both halves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.train.len() + self.eval.len()
    }

    /// True when both halves are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.train.is_empty() && self.eval.is_empty()
    }
}

/// Split a dataset into disjoint train/eval sets.
///
/// Indices are shuffled with a seeded Fisher-Yates pass, then
/// `eval_count = ceil(n * eval_fraction)` clamped to `[1, n-1]` samples
/// go to eval and the rest to train. Deterministic for a given seed.
/// The fraction is f64 so round fractions stay exact (10 samples at 0.2
/// give 8/2, not 7/3).
///
/// # Errors
///
/// Returns a config error when `eval_fraction` is outside `(0, 1)` or
/// the dataset has fewer than 2 samples.
pub fn split_dataset(dataset: &Dataset, eval_fraction: f64, seed: u64) -> Result<DatasetSplit> {
    if !(eval_fraction > 0.0 && eval_fraction < 1.0) {
        return Err(AfinarError::ConfigValue {
            field: "data.eval_fraction".to_string(),
            message: format!("must be in (0, 1), got {eval_fraction}"),
            suggestion: "Use a value like 0.2".to_string(),
        });
    }
    let n = dataset.len();
    if n < 2 {
        return Err(AfinarError::ConfigValue {
            field: "data".to_string(),
            message: format!("need at least 2 samples to create a train/eval split, got {n}"),
            suggestion: "Provide a larger dataset".to_string(),
        });
    }

    let mut indices: Vec<usize> = (0..n).collect();
    lcg_shuffle(&mut indices, seed);

    let eval_count = ((n as f64) * eval_fraction).ceil() as usize;
    let eval_count = eval_count.clamp(1, n - 1);

    let data = dataset.samples();
    let eval = indices[..eval_count].iter().map(|&i| data[i].clone()).collect();
    let train = indices[eval_count..].iter().map(|&i| data[i].clone()).collect();

    Ok(DatasetSplit { train, eval })
}

/// Fisher-Yates shuffle with an LCG PRNG for determinism.
pub(crate) fn lcg_shuffle<T>(items: &mut [T], seed: u64) {
    let mut rng_state = seed;
    for i in (1..items.len()).rev() {
        rng_state = rng_state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let j = (rng_state >> 33) as usize % (i + 1);
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// Dataset whose sample at index i carries label i, so split halves
    /// can be compared by content.
    fn tagged_dataset(n: usize) -> Dataset {
        let samples = (0..n).map(|i| Sample::new(Array3::zeros((1, 2, 2)), i)).collect();
        Dataset::new(samples)
    }

    #[test]
    fn test_ten_samples_at_fifth_gives_eight_two() {
        let split = split_dataset(&tagged_dataset(10), 0.2, 42).expect("valid split");
        assert_eq!(split.train.len(), 8);
        assert_eq!(split.eval.len(), 2);
    }

    #[test]
    fn test_split_is_deterministic_per_seed() {
        let ds = tagged_dataset(20);
        let a = split_dataset(&ds, 0.3, 7).expect("valid split");
        let b = split_dataset(&ds, 0.3, 7).expect("valid split");

        let tags = |xs: &[Sample]| xs.iter().map(|s| s.label).collect::<Vec<_>>();
        assert_eq!(tags(&a.train), tags(&b.train));
        assert_eq!(tags(&a.eval), tags(&b.eval));
    }

    #[test]
    fn test_different_seeds_differ() {
        let ds = tagged_dataset(50);
        let a = split_dataset(&ds, 0.3, 1).expect("valid split");
        let b = split_dataset(&ds, 0.3, 2).expect("valid split");

        let tags = |xs: &[Sample]| xs.iter().map(|s| s.label).collect::<Vec<_>>();
        assert_ne!(tags(&a.eval), tags(&b.eval));
    }

    #[test]
    fn test_tiny_fraction_still_reserves_one_eval_sample() {
        let split = split_dataset(&tagged_dataset(5), 0.01, 42).expect("valid split");
        assert_eq!(split.eval.len(), 1);
        assert_eq!(split.train.len(), 4);
    }

    #[test]
    fn test_large_fraction_keeps_one_train_sample() {
        let split = split_dataset(&tagged_dataset(5), 0.99, 42).expect("valid split");
        assert_eq!(split.train.len(), 1);
        assert_eq!(split.eval.len(), 4);
    }

    #[test]
    fn test_fraction_bounds_rejected() {
        let ds = tagged_dataset(10);
        assert!(split_dataset(&ds, 0.0, 42).is_err());
        assert!(split_dataset(&ds, 1.0, 42).is_err());
        assert!(split_dataset(&ds, -0.1, 42).is_err());
        assert!(split_dataset(&ds, f64::NAN, 42).is_err());
    }

    #[test]
    fn test_too_small_dataset_rejected() {
        assert!(split_dataset(&tagged_dataset(0), 0.2, 42).is_err());
        assert!(split_dataset(&tagged_dataset(1), 0.2, 42).is_err());
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let mut items: Vec<usize> = (0..100).collect();
        lcg_shuffle(&mut items, 123);

        let mut sorted = items.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());
        assert_ne!(items, (0..100).collect::<Vec<_>>());
    }
}
