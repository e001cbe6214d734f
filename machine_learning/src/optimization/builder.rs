use comms::specs::OptimizerSpec;

use super::{Adam, GradientDescent, GradientDescentWithMomentum, Optimizer};

/// Builds `Optimizer`s given a specification.
#[derive(Debug, Default, Clone, Copy)]
pub struct OptimizerBuilder;

impl OptimizerBuilder {
    /// Creates a new `OptimizerBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new `Optimizer` following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification of the optimizer.
    /// * `len` - The amount of parameters it will update.
    ///
    /// # Returns
    /// The optimizer, boxed so it can be chosen at runtime and moved between tasks.
    pub fn build(&self, spec: OptimizerSpec, len: usize) -> Box<dyn Optimizer + Send> {
        match spec {
            OptimizerSpec::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(len, learning_rate, beta1, beta2, epsilon)),
            OptimizerSpec::GradientDescent { learning_rate } => {
                Box::new(GradientDescent::new(learning_rate))
            }
            OptimizerSpec::GradientDescentWithMomentum {
                learning_rate,
                momentum,
            } => Box::new(GradientDescentWithMomentum::new(
                len,
                learning_rate,
                momentum,
            )),
        }
    }
}
