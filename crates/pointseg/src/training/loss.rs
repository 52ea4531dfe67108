//! Segmentation loss, the feature-transform penalty, and accuracy.
//!
//! All functions are generic over `B: Backend` and operate on burn tensors.

use burn::prelude::*;

use crate::model::identity_batch;

/// Floor for the squared norm before `sqrt`, so an exactly orthogonal
/// transform gets a zero gradient instead of NaN.
const NORM_FLOOR: f64 = 1e-16;

/// Negative log-likelihood over per-point log-probabilities.
///
/// - `log_probs`: `(points, num_classes)`
/// - `targets`: `(points,)`, 0-indexed class ids
///
/// Returns the mean over points as a `(1,)` tensor.
pub fn nll_loss<B: Backend>(log_probs: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let n = targets.dims()[0];
    log_probs.gather(1, targets.reshape([n, 1])).mean().neg()
}

/// Orthogonality penalty for a batch of transforms `A`, `(batch, d, d)`:
/// the Frobenius norm of `A·Aᵀ - I`, averaged over the batch.
pub fn feature_transform_regularizer<B: Backend>(trans: Tensor<B, 3>) -> Tensor<B, 1> {
    let [batch, d, _] = trans.dims();
    let device = trans.device();
    let gram = trans.clone().matmul(trans.swap_dims(1, 2));
    let diff = gram - identity_batch::<B>(batch, d, &device);
    diff.powf_scalar(2.0)
        .sum_dim(2)
        .sum_dim(1)
        .clamp_min(NORM_FLOOR)
        .sqrt()
        .mean()
}

/// Number of points whose arg-max class equals the target.
pub fn correct_predictions<B: Backend>(
    log_probs: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> usize {
    let n = targets.dims()[0];
    let correct: i64 = log_probs
        .argmax(1)
        .reshape([n])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct.max(0) as usize
}

/// Fraction of correct points. Zero points gives 0.
pub fn accuracy(correct: usize, total_points: usize) -> f64 {
    if total_points == 0 {
        0.0
    } else {
        correct as f64 / total_points as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_nll_picks_target_log_prob() {
        let device = Default::default();
        let log_probs = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[-0.1_f32, -2.0], [-3.0, -0.2]]),
            &device,
        );
        let targets =
            Tensor::<TestBackend, 1, Int>::from_data(TensorData::from([0_i64, 1]), &device);

        let loss: f32 = nll_loss(log_probs, targets).into_scalar().elem();
        assert!((loss - 0.15).abs() < 1e-6, "expected 0.15, got {loss}");
    }

    #[test]
    fn test_regularizer_zero_for_orthogonal() {
        let device = Default::default();
        // 90° rotation and identity are both orthogonal.
        let trans = Tensor::<TestBackend, 3>::from_data(
            TensorData::from([[[0.0_f32, -1.0], [1.0, 0.0]], [[1.0, 0.0], [0.0, 1.0]]]),
            &device,
        );
        let penalty: f32 = feature_transform_regularizer(trans).into_scalar().elem();
        assert!(penalty.abs() < 1e-6, "got {penalty}");
    }

    #[test]
    fn test_regularizer_frobenius_of_deviation() {
        let device = Default::default();
        // A = 2I (2x2): A·Aᵀ - I = 3I, Frobenius norm = 3·sqrt(2).
        let trans = Tensor::<TestBackend, 3>::from_data(
            TensorData::from([[[2.0_f32, 0.0], [0.0, 2.0]]]),
            &device,
        );
        let penalty: f32 = feature_transform_regularizer(trans).into_scalar().elem();
        let expected = 3.0 * 2.0_f32.sqrt();
        assert!((penalty - expected).abs() < 1e-5, "expected {expected}, got {penalty}");
    }

    #[test]
    fn test_regularizer_has_gradient() {
        let device = Default::default();
        let trans = Tensor::<TestAutodiffBackend, 3>::from_data(
            TensorData::from([[[1.5_f32, 0.2], [0.1, 0.7]]]),
            &device,
        )
        .require_grad();
        let grads = feature_transform_regularizer(trans.clone()).backward();
        let g: Vec<f32> = trans.grad(&grads).unwrap().into_data().iter::<f32>().collect();
        assert!(g.iter().all(|v| v.is_finite()));
        assert!(g.iter().any(|v| v.abs() > 0.0));
    }

    #[test]
    fn test_regularizer_gradient_finite_at_identity() {
        let device = Default::default();
        let trans = Tensor::<TestAutodiffBackend, 3>::from_data(
            TensorData::from([[[1.0_f32, 0.0], [0.0, 1.0]]]),
            &device,
        )
        .require_grad();
        let grads = feature_transform_regularizer(trans.clone()).backward();
        let g: Vec<f32> = trans.grad(&grads).unwrap().into_data().iter::<f32>().collect();
        assert!(g.iter().all(|v| v.is_finite()), "got {g:?}");
        assert!(g.iter().all(|v| v.abs() < 1e-6), "got {g:?}");
    }

    #[test]
    fn test_correct_predictions_and_accuracy() {
        let device = Default::default();
        let log_probs = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[-0.1_f32, -2.0], [-0.1, -2.0], [-3.0, -0.2], [-3.0, -0.2]]),
            &device,
        );
        let targets =
            Tensor::<TestBackend, 1, Int>::from_data(TensorData::from([0_i64, 1, 1, 0]), &device);
        let correct = correct_predictions(log_probs, targets);
        assert_eq!(correct, 2);
        assert!((accuracy(correct, 4) - 0.5).abs() < 1e-12);
        assert_eq!(accuracy(0, 0), 0.0);
    }
}
