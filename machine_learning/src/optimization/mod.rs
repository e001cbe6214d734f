mod adam;
mod builder;
mod gradient_descent;
mod gradient_descent_with_momentum;
mod optimizer;

pub use adam::Adam;
pub use builder::OptimizerBuilder;
pub use gradient_descent::GradientDescent;
pub use gradient_descent_with_momentum::GradientDescentWithMomentum;
pub use optimizer::Optimizer;

use crate::{MlErr, Result};

fn check_sizes(grad: &[f32], params: &[f32]) -> Result<()> {
    if grad.len() != params.len() {
        return Err(MlErr::SizeMismatch {
            what: "gradient and parameters",
            got: grad.len(),
            expected: params.len(),
        });
    }

    Ok(())
}
