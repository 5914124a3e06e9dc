//! Softmax cross-entropy over a batch of logits.

use crate::{AfinarError, Result};
use ndarray::Array2;

/// Mean cross-entropy loss and its gradient with respect to the logits.
///
/// Softmax subtracts the per-row maximum before exponentiating, so
/// large logits cannot overflow. The gradient is the closed form
/// `(softmax - one_hot) / n`.
///
/// # Errors
///
/// Returns `ShapeMismatch` when the label count differs from the batch
/// size, and `Train` when a label is out of range or the loss comes out
/// non-finite. A non-finite loss always aborts; it is never clamped or
/// skipped.
pub fn cross_entropy(logits: &Array2<f32>, labels: &[usize]) -> Result<(f32, Array2<f32>)> {
    let (n, k) = logits.dim();
    if labels.len() != n {
        return Err(AfinarError::ShapeMismatch {
            expected: vec![n],
            actual: vec![labels.len()],
        });
    }
    if n == 0 {
        return Err(AfinarError::Train {
            message: "cannot compute loss over an empty batch".to_string(),
        });
    }

    let mut grad = Array2::zeros((n, k));
    let mut total = 0.0f32;

    for (i, row) in logits.outer_iter().enumerate() {
        let label = labels[i];
        if label >= k {
            return Err(AfinarError::Train {
                message: format!("label {label} out of range for {k} classes (sample {i} in batch)"),
            });
        }

        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let exp: Vec<f32> = row.iter().map(|&v| (v - max).exp()).collect();
        let sum: f32 = exp.iter().sum();

        // loss_i = -log softmax(label) = -(z_label - max - log sum)
        total -= row[label] - max - sum.ln();

        for (j, &e) in exp.iter().enumerate() {
            let p = e / sum;
            let target = if j == label { 1.0 } else { 0.0 };
            grad[[i, j]] = (p - target) / n as f32;
        }
    }

    let loss = total / n as f32;
    if !loss.is_finite() {
        return Err(AfinarError::Train {
            message: format!("loss is {loss} over a batch of {n}"),
        });
    }
    Ok((loss, grad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr2, Axis};

    #[test]
    fn test_uniform_logits_give_log_k() {
        let logits = Array2::zeros((3, 4));
        let (loss, _) = cross_entropy(&logits, &[0, 1, 2]).expect("valid batch");
        assert_relative_eq!(loss, 4.0f32.ln(), epsilon = 1e-6);
    }

    #[test]
    fn test_confident_correct_prediction_has_small_loss() {
        let logits = arr2(&[[10.0, 0.0, 0.0]]);
        let (loss, _) = cross_entropy(&logits, &[0]).expect("valid batch");
        assert!(loss < 1e-3, "loss was {loss}");
    }

    #[test]
    fn test_gradient_rows_sum_to_zero() {
        let logits = arr2(&[[1.0, -2.0, 0.5], [0.0, 3.0, -1.0]]);
        let (_, grad) = cross_entropy(&logits, &[2, 0]).expect("valid batch");
        for row in grad.axis_iter(Axis(0)) {
            assert_relative_eq!(row.sum(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_gradient_pulls_target_up_and_rest_down() {
        let logits = arr2(&[[0.2, 0.1, -0.3]]);
        let (_, grad) = cross_entropy(&logits, &[1]).expect("valid batch");
        assert!(grad[[0, 1]] < 0.0);
        assert!(grad[[0, 0]] > 0.0);
        assert!(grad[[0, 2]] > 0.0);
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let logits = arr2(&[[0.3, -0.7, 1.1], [0.0, 0.4, -0.2]]);
        let labels = [2usize, 0];
        let (_, grad) = cross_entropy(&logits, &labels).expect("valid batch");

        let eps = 1e-3f32;
        for i in 0..2 {
            for j in 0..3 {
                let mut plus = logits.clone();
                plus[[i, j]] += eps;
                let mut minus = logits.clone();
                minus[[i, j]] -= eps;
                let (lp, _) = cross_entropy(&plus, &labels).expect("valid batch");
                let (lm, _) = cross_entropy(&minus, &labels).expect("valid batch");
                let numeric = (lp - lm) / (2.0 * eps);
                assert_relative_eq!(grad[[i, j]], numeric, epsilon = 2e-3);
            }
        }
    }

    #[test]
    fn test_huge_logits_stay_finite() {
        let logits = arr2(&[[10_000.0, 0.0], [0.0, 10_000.0]]);
        let (loss, grad) = cross_entropy(&logits, &[0, 1]).expect("valid batch");
        assert!(loss.is_finite());
        assert!(grad.iter().all(|v| v.is_finite()));
        assert!(loss < 1e-3);
    }

    #[test]
    fn test_label_count_mismatch_rejected() {
        let logits = Array2::zeros((2, 3));
        assert!(matches!(
            cross_entropy(&logits, &[0]),
            Err(AfinarError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_out_of_range_label_rejected() {
        let logits = Array2::zeros((1, 3));
        let err = cross_entropy(&logits, &[3]).err().expect("label 3 of 3 must fail");
        assert!(matches!(err, AfinarError::Train { .. }));
        assert!(err.to_string().contains("label 3"));
    }

    #[test]
    fn test_nan_logits_are_fatal() {
        let logits = arr2(&[[f32::NAN, 0.0]]);
        let err = cross_entropy(&logits, &[0]).err().expect("NaN must fail");
        assert!(matches!(err, AfinarError::Train { .. }));
    }

    #[test]
    fn test_empty_batch_rejected() {
        let logits = Array2::zeros((0, 3));
        assert!(cross_entropy(&logits, &[]).is_err());
    }
}
