mod autograd;
pub mod error;
mod optimizer;
mod parallel_net;
pub mod rpc;
mod session;

pub use autograd::{AutogradContext, DistAutograd};
pub use error::{OrchestratorError, Result};
pub use optimizer::DistributedOptimizer;
pub use parallel_net::ParallelNet;
pub use rpc::{NetAgent, RRef, RpcAgent};
pub use session::{DistTrainer, evaluate, run, run_session};
