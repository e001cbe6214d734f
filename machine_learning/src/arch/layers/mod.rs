mod conv2d;
mod dense;
mod layer;
mod max_pool;

use ndarray::Array2;

use crate::{MlErr, Result};

pub use conv2d::{Conv2d, ConvGeometry};
pub use dense::Dense;
pub use layer::Layer;
pub use max_pool::MaxPool2d;

/// Checks that `x` has `expected` columns.
fn check_cols(what: &'static str, x: &Array2<f32>, expected: usize) -> Result<()> {
    if x.ncols() != expected {
        return Err(MlErr::SizeMismatch {
            what,
            got: x.ncols(),
            expected,
        });
    }

    Ok(())
}

/// Checks that a parameter or gradient slice has exactly `expected` elements.
fn check_len(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(MlErr::SizeMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}
