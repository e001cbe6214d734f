use ndarray::{Array2, ArrayView2};

use crate::Result;

/// A loss over a batch of predictions and their class labels.
pub trait LossFn {
    /// Returns the loss averaged over the batch.
    fn loss(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> Result<f32>;

    /// Returns the gradient of `loss` with respect to `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> Result<Array2<f32>>;
}
