pub mod activations;
pub mod layers;
pub mod loss;
mod module;
mod params;
mod sequential;

pub use module::Module;
pub use params::ParamBuffer;
pub use sequential::Sequential;
