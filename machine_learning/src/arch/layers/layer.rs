use ndarray::Array2;

use super::{Conv2d, ConvGeometry, Dense, MaxPool2d};
use crate::{Result, arch::activations::ActFn};

/// Any of the layers a `Sequential` can be built from.
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
    Conv2d(Conv2d),
    MaxPool2d(MaxPool2d),
}

impl Layer {
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self::Dense(Dense::new(dim, act_fn))
    }

    pub fn conv2d(geometry: ConvGeometry, act_fn: Option<ActFn>) -> Result<Self> {
        Ok(Self::Conv2d(Conv2d::new(geometry, act_fn)?))
    }

    pub fn max_pool2d(channels: usize, in_hw: (usize, usize), kernel: usize) -> Result<Self> {
        Ok(Self::MaxPool2d(MaxPool2d::new(channels, in_hw, kernel)?))
    }

    /// Returns the amount of parameters of this layer.
    pub fn size(&self) -> usize {
        match self {
            Self::Dense(l) => l.size(),
            Self::Conv2d(l) => l.size(),
            Self::MaxPool2d(_) => 0,
        }
    }

    /// Returns the amount of inputs feeding each output, if the layer has parameters.
    pub fn fan_in(&self) -> Option<usize> {
        match self {
            Self::Dense(l) => Some(l.in_len()),
            Self::Conv2d(l) => Some(l.fan_in()),
            Self::MaxPool2d(_) => None,
        }
    }

    pub fn in_len(&self) -> usize {
        match self {
            Self::Dense(l) => l.in_len(),
            Self::Conv2d(l) => l.in_len(),
            Self::MaxPool2d(l) => l.in_len(),
        }
    }

    pub fn out_len(&self) -> usize {
        match self {
            Self::Dense(l) => l.out_len(),
            Self::Conv2d(l) => l.out_len(),
            Self::MaxPool2d(l) => l.out_len(),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: Array2<f32>) -> Result<Array2<f32>> {
        match self {
            Self::Dense(l) => l.forward(params, x),
            Self::Conv2d(l) => l.forward(params, x),
            Self::MaxPool2d(l) => l.forward(x),
        }
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Self::Dense(l) => l.backward(params, grad, d),
            Self::Conv2d(l) => l.backward(params, grad, d),
            Self::MaxPool2d(l) => l.backward(d),
        }
    }
}
