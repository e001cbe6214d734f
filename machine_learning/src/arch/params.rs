use crate::{MlErr, Result};

/// Flat storage for the parameters of a module and the gradient accumulated for them.
///
/// Layers view consecutive slices of both buffers in layer order, each one laid out as
/// its weights followed by its biases.
#[derive(Debug, Clone)]
pub struct ParamBuffer {
    weights: Box<[f32]>,
    grad: Box<[f32]>,
}

impl ParamBuffer {
    /// Creates a new `ParamBuffer` of `len` zeroed parameters.
    pub fn zeros(len: usize) -> Self {
        Self {
            weights: vec![0.; len].into_boxed_slice(),
            grad: vec![0.; len].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    /// Borrows the weights and the gradient at the same time.
    ///
    /// # Returns
    /// A tuple with a view of the weights and a mutable view of the gradient.
    pub fn split_mut(&mut self) -> (&[f32], &mut [f32]) {
        (&self.weights, &mut self.grad)
    }

    /// Borrows the gradient and the weights for an update.
    pub fn for_update(&mut self) -> (&[f32], &mut [f32]) {
        (&self.grad, &mut self.weights)
    }

    /// Resets the accumulated gradient.
    pub fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }

    /// Overwrites the weights with `weights`.
    ///
    /// # Returns
    /// An error if the amount of given weights differs from the buffer's.
    pub fn load(&mut self, weights: &[f32]) -> Result<()> {
        if weights.len() != self.weights.len() {
            return Err(MlErr::SizeMismatch {
                what: "loaded parameters",
                got: weights.len(),
                expected: self.weights.len(),
            });
        }

        self.weights.copy_from_slice(weights);
        Ok(())
    }
}
