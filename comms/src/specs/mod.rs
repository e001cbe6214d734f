mod module;
mod optimizer;

pub use module::{ModuleKind, ModuleSpec};
pub use optimizer::OptimizerSpec;
