use ndarray::Array2;
use rand::Rng;
use rand_distr::Uniform;

use super::layers::Layer;
use crate::{MlErr, Result};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance or an error if two consecutive layers don't fit together.
    pub fn new<I>(layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = Layer>,
    {
        let layers: Vec<_> = layers.into_iter().collect();

        for pair in layers.windows(2) {
            if pair[0].out_len() != pair[1].in_len() {
                return Err(MlErr::SizeMismatch {
                    what: "consecutive layers",
                    got: pair[1].in_len(),
                    expected: pair[0].out_len(),
                });
            }
        }

        Ok(Self { layers })
    }

    /// Returns the amount of parameters in the model.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    pub fn in_len(&self) -> usize {
        self.layers.first().map(Layer::in_len).unwrap_or_default()
    }

    pub fn out_len(&self) -> usize {
        self.layers.last().map(Layer::out_len).unwrap_or_default()
    }

    /// Samples every layer's parameters from `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
    ///
    /// # Arguments
    /// * `params` - The flat parameters of the whole model.
    /// * `rng` - The source of randomness.
    pub fn init_params<R: Rng>(&self, params: &mut [f32], rng: &mut R) -> Result<()> {
        self.check_size(params.len())?;
        let mut rest = params;

        for layer in &self.layers {
            let (params, tail) = std::mem::take(&mut rest).split_at_mut(layer.size());
            rest = tail;

            let Some(fan_in) = layer.fan_in() else {
                continue;
            };

            let bound = 1. / (fan_in as f32).sqrt();
            let distribution = Uniform::new(-bound, bound)?;
            params.iter_mut().for_each(|p| *p = rng.sample(&distribution));
        }

        Ok(())
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The flat parameters of the whole model.
    /// * `x` - The input data.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    pub fn forward(&mut self, params: &[f32], mut x: Array2<f32>) -> Result<Array2<f32>> {
        self.check_size(params.len())?;
        let mut rest = params;

        for layer in self.layers.iter_mut() {
            let (params, tail) = rest.split_at(layer.size());
            rest = tail;
            x = layer.forward(params, x)?;
        }

        Ok(x)
    }

    /// Makes a backward pass through the network, adding the gradient into `grad`.
    ///
    /// # Arguments
    /// * `params` - The flat parameters of the whole model.
    /// * `grad` - The flat gradient of the whole model.
    /// * `d` - The gradient of the loss with respect to the last output.
    ///
    /// # Returns
    /// The gradient of the loss with respect to the input of the model.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        self.check_size(params.len())?;
        self.check_size(grad.len())?;
        let mut end = params.len();

        for layer in self.layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(d)
    }

    fn check_size(&self, got: usize) -> Result<()> {
        let expected = self.size();
        if got != expected {
            return Err(MlErr::SizeMismatch {
                what: "model parameters",
                got,
                expected,
            });
        }

        Ok(())
    }
}
