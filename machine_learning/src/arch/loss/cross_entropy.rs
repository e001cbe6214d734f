use ndarray::{Array2, ArrayView2, Axis};

use super::LossFn;
use crate::{MlErr, Result};

/// Softmax followed by the negative log likelihood of the true class.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    /// Returns a new `CrossEntropy`.
    pub fn new() -> Self {
        Self
    }

    fn check(y_pred: &ArrayView2<f32>, labels: &[usize]) -> Result<()> {
        if y_pred.nrows() != labels.len() || labels.is_empty() {
            return Err(MlErr::SizeMismatch {
                what: "predictions and labels",
                got: labels.len(),
                expected: y_pred.nrows().max(1),
            });
        }

        let classes = y_pred.ncols();
        match labels.iter().find(|&&label| label >= classes) {
            Some(&label) => Err(MlErr::InvalidLabel { label, classes }),
            None => Ok(()),
        }
    }

    /// Row-wise softmax, shifted by each row's max to keep `exp` finite.
    fn softmax(y_pred: ArrayView2<f32>) -> Array2<f32> {
        let mut p = y_pred.to_owned();

        for mut row in p.axis_iter_mut(Axis(0)) {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row /= sum;
        }

        p
    }
}

impl LossFn for CrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> Result<f32> {
        Self::check(&y_pred, labels)?;

        let total: f32 = y_pred
            .axis_iter(Axis(0))
            .zip(labels)
            .map(|(row, &label)| {
                let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                let log_sum = row.iter().map(|v| (v - max).exp()).sum::<f32>().ln();
                max + log_sum - row[label]
            })
            .sum();

        Ok(total / labels.len() as f32)
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, labels: &[usize]) -> Result<Array2<f32>> {
        Self::check(&y_pred, labels)?;

        let batch = labels.len() as f32;
        let mut d = Self::softmax(y_pred);

        for (mut row, &label) in d.axis_iter_mut(Axis(0)).zip(labels) {
            row[label] -= 1.;
            row /= batch;
        }

        Ok(d)
    }
}
