use super::{Optimizer, check_sizes};
use crate::Result;

/// Adam without bias correction.
///
/// The moving averages start at zero and are used as they are, so the first steps are
/// shorter than in the corrected variant:
///
/// ```text
/// m <- b1 * m + (1 - b1) * g
/// v <- b2 * v + (1 - b2) * g^2
/// p <- p - lr / (sqrt(v) + eps) * m
/// ```
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    m: Box<[f32]>,
    v: Box<[f32]>,
}

impl Adam {
    pub const DEFAULT_LEARNING_RATE: f32 = 1e-3;
    pub const DEFAULT_BETA1: f32 = 0.9;
    pub const DEFAULT_BETA2: f32 = 0.999;
    pub const DEFAULT_EPSILON: f32 = 1e-8;

    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2` - Decay rates of the gradient and squared gradient averages.
    /// * `epsilon` - Keeps the division finite when the squared gradient average is zero.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            m: vec![0.; len].into_boxed_slice(),
            v: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;
        check_sizes(&self.m, params)?;

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
            .for_each(|(((p, g), m), v)| {
                *m = b1 * *m + (1. - b1) * g;
                *v = b2 * *v + (1. - b2) * g * g;
                *p -= lr / (v.sqrt() + eps) * *m;
            });

        Ok(())
    }
}
