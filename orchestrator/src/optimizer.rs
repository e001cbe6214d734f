use comms::specs::OptimizerSpec;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{AutogradContext, RRef, Result, RpcAgent};

/// An optimizer spread over the owners of a model's parameters.
///
/// Every owner keeps its own optimizer state next to the parameters, stepping only
/// ships the context id around.
#[derive(Debug)]
pub struct DistributedOptimizer {
    spec: OptimizerSpec,
    params: Vec<RRef>,
}

impl DistributedOptimizer {
    /// Creates a new `DistributedOptimizer`.
    ///
    /// # Arguments
    /// * `agent` - The session's rpc agent.
    /// * `spec` - The update rule every owner applies.
    /// * `params` - References to the modules holding the parameters to optimize.
    pub async fn new<R, W>(
        agent: &mut RpcAgent<R, W>,
        spec: OptimizerSpec,
        params: Vec<RRef>,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        for rref in &params {
            agent.create_optimizer(rref, spec).await?;
        }

        Ok(Self { spec, params })
    }

    pub fn spec(&self) -> OptimizerSpec {
        self.spec
    }

    /// Updates every parameter with the gradients gathered in `ctx`.
    pub async fn step<R, W>(&self, agent: &mut RpcAgent<R, W>, ctx: &AutogradContext) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        for rref in &self.params {
            agent.step(rref, ctx.id()).await?;
        }

        Ok(())
    }
}
