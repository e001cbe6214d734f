pub mod error;
mod hosted;
pub mod worker;

pub use error::{Result, WorkerErr};
pub use hosted::HostedModule;
pub use worker::{Worker, run};
