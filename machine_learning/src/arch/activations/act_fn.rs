/// An element-wise activation function fused at the end of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActFn {
    Relu,
}

use ActFn::*;

impl ActFn {
    /// Applies the function to a pre-activation value.
    pub fn f(&self, x: f32) -> f32 {
        match self {
            Relu => x.max(0.),
        }
    }

    /// Returns the derivative evaluated at the pre-activation value `x`.
    pub fn df(&self, x: f32) -> f32 {
        match self {
            Relu => {
                if x > 0. {
                    1.
                } else {
                    0.
                }
            }
        }
    }
}
