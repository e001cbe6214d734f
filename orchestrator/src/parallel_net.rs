use comms::{
    msg::NO_GRAD,
    specs::{ModuleKind, ModuleSpec},
};
use log::info;
use ndarray::Array2;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{AutogradContext, OrchestratorError, RRef, Result, RpcAgent};

const CONV_OWNER: &str = "worker1";
const FC_OWNER: &str = "worker2";

/// The convolutional network split in two remote halves, the convolutional front and the
/// fully connected head.
#[derive(Debug, Clone)]
pub struct ParallelNet {
    subnet_conv: RRef,
    subnet_fc: RRef,
}

impl ParallelNet {
    /// Instantiates both halves, the front on `worker1` and the head on `worker2`.
    ///
    /// A session without `worker2` keeps both halves on `worker1`.
    ///
    /// # Arguments
    /// * `agent` - The session's rpc agent.
    /// * `in_channels` - The channels of the input images.
    /// * `num_classes` - The amount of logits of the output.
    /// * `seed` - Seeds the initialization of both halves.
    pub async fn new<R, W>(
        agent: &mut RpcAgent<R, W>,
        in_channels: usize,
        num_classes: usize,
        seed: Option<u64>,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if !agent.has_peer(CONV_OWNER) {
            return Err(OrchestratorError::UnknownPeer(CONV_OWNER.to_string()));
        }

        let fc_owner = if agent.has_peer(FC_OWNER) {
            FC_OWNER
        } else {
            CONV_OWNER
        };

        let conv = ModuleSpec {
            kind: ModuleKind::SubNetConv { in_channels },
            seed,
        };
        let fc = ModuleSpec {
            kind: ModuleKind::SubNetFc { num_classes },
            seed: seed.map(|s| s.wrapping_add(1)),
        };

        let subnet_conv = agent.remote(CONV_OWNER, conv).await?;
        let subnet_fc = agent.remote(fc_owner, fc).await?;
        info!("placed the network on {CONV_OWNER} and {fc_owner}");

        Ok(Self {
            subnet_conv,
            subnet_fc,
        })
    }

    /// Chains both halves within `ctx`.
    pub async fn forward<R, W>(
        &self,
        agent: &mut RpcAgent<R, W>,
        ctx: &mut AutogradContext,
        x: &Array2<f32>,
    ) -> Result<Array2<f32>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let features = ctx.forward(agent, &self.subnet_conv, x).await?;
        ctx.forward(agent, &self.subnet_fc, &features).await
    }

    /// Chains both halves without recording anything for backward.
    pub async fn infer<R, W>(
        &self,
        agent: &mut RpcAgent<R, W>,
        x: &Array2<f32>,
    ) -> Result<Array2<f32>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let features = agent.forward(&self.subnet_conv, NO_GRAD, x).await?;
        agent.forward(&self.subnet_fc, NO_GRAD, &features).await
    }

    /// Returns references to every module holding parameters of the network.
    pub fn parameter_rrefs(&self) -> Vec<RRef> {
        vec![self.subnet_conv.clone(), self.subnet_fc.clone()]
    }

    /// Pulls the parameters of both halves, laid out as those of the whole network.
    pub async fn parameters<R, W>(&self, agent: &mut RpcAgent<R, W>) -> Result<Vec<f32>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut params = agent.pull_params(&self.subnet_conv).await?;
        params.extend(agent.pull_params(&self.subnet_fc).await?);
        Ok(params)
    }

    /// Returns the amount of parameters of both halves.
    pub async fn size<R, W>(&self, agent: &mut RpcAgent<R, W>) -> Result<usize>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let conv = agent.parameter_count(&self.subnet_conv).await?;
        let fc = agent.parameter_count(&self.subnet_fc).await?;
        Ok(conv + fc)
    }
}
