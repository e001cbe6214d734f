use ndarray::{linalg, prelude::*};

use super::{check_cols, check_len};
use crate::{MlErr, Result, arch::activations::ActFn};

/// A fully connected layer, `a = act_fn(x · w + b)`.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Option<Array2<f32>>,
    z: Option<Array2<f32>>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The amount of inputs and outputs of the layer.
    /// * `act_fn` - An optional activation applied to the output.
    ///
    /// # Returns
    /// A new `Dense` instance.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
            x: None,
            z: None,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn in_len(&self) -> usize {
        self.dim.0
    }

    pub fn out_len(&self) -> usize {
        self.dim.1
    }

    /// Computes the output of the layer, keeping what backpropagation needs.
    ///
    /// # Arguments
    /// * `params` - This layer's weights followed by its biases.
    /// * `x` - A `(batch, in_len)` input.
    ///
    /// # Returns
    /// The `(batch, out_len)` output.
    pub fn forward(&mut self, params: &[f32], x: Array2<f32>) -> Result<Array2<f32>> {
        check_cols("dense input", &x, self.dim.0)?;
        let (w, b) = self.view_params(params)?;

        let mut z = x.dot(&w);
        z += &b;
        self.x = Some(x);

        let Some(act_fn) = self.act_fn else {
            return Ok(z);
        };

        let a = z.mapv(|z| act_fn.f(z));
        self.z = Some(z);
        Ok(a)
    }

    /// Backpropagates `d` through the layer, adding this layer's gradient into `grad`.
    ///
    /// # Arguments
    /// * `params` - This layer's weights followed by its biases.
    /// * `grad` - Where to accumulate the gradient of the parameters.
    /// * `d` - The gradient of the loss with respect to this layer's output.
    ///
    /// # Returns
    /// The gradient of the loss with respect to this layer's input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let x = self.x.take().ok_or(MlErr::MissingForward { layer: "dense" })?;
        check_cols("dense output gradient", &d, self.dim.1)?;
        check_len("dense output gradient rows", d.nrows(), x.nrows())?;

        if let Some(act_fn) = self.act_fn {
            let z = self.z.take().ok_or(MlErr::MissingForward { layer: "dense" })?;
            d.zip_mut_with(&z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &x.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        check_len("dense gradient", grad.len(), self.size)?;
        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        check_len("dense parameters", params.len(), self.size)?;
        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size])?;
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..])?;
        Ok((weights, biases))
    }
}
