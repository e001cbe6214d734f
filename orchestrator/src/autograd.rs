use std::collections::BTreeSet;

use comms::msg::ContextId;
use log::debug;
use ndarray::Array2;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{RRef, Result, RpcAgent};

/// Hands out distributed autograd contexts with unique ids.
#[derive(Debug)]
pub struct DistAutograd {
    next_id: ContextId,
}

impl Default for DistAutograd {
    fn default() -> Self {
        Self::new()
    }
}

impl DistAutograd {
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    /// Opens a new context, ids start at 1 since 0 means no recording.
    pub fn context(&mut self) -> AutogradContext {
        let id = self.next_id;
        self.next_id += 1;

        AutogradContext {
            id,
            tape: Vec::new(),
            participants: BTreeSet::new(),
        }
    }
}

/// The remote passes of one forward/backward round.
///
/// Forwards run through a context are recorded on its tape, `backward` replays the tape
/// backwards chaining the input gradient of each module into the previous one.
#[derive(Debug)]
pub struct AutogradContext {
    id: ContextId,
    tape: Vec<RRef>,
    participants: BTreeSet<String>,
}

impl AutogradContext {
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Returns the modules whose forward hasn't been backpropagated yet, in call order.
    pub fn tape(&self) -> &[RRef] {
        &self.tape
    }

    /// Runs the remote module over `x` and records the pass.
    pub async fn forward<R, W>(
        &mut self,
        agent: &mut RpcAgent<R, W>,
        rref: &RRef,
        x: &Array2<f32>,
    ) -> Result<Array2<f32>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let y = agent.forward(rref, self.id, x).await?;
        self.tape.push(rref.clone());
        self.participants.insert(rref.owner().to_string());
        Ok(y)
    }

    /// Backpropagates the loss gradient `d` through every recorded pass.
    ///
    /// Each remote module adds its parameters' gradient to the ones it keeps for this
    /// context, to be consumed by `DistributedOptimizer::step`.
    ///
    /// # Returns
    /// The gradient with respect to the first recorded pass' input.
    pub async fn backward<R, W>(
        &mut self,
        agent: &mut RpcAgent<R, W>,
        d: Array2<f32>,
    ) -> Result<Array2<f32>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut d = d;

        while let Some(rref) = self.tape.pop() {
            d = agent.backward(&rref, self.id, &d).await?;
        }

        Ok(d)
    }

    /// Makes every peer that took part drop what it kept for this context.
    pub async fn release<R, W>(self, agent: &mut RpcAgent<R, W>) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        for peer in &self.participants {
            agent.release(peer, self.id).await?;
        }

        debug!(ctx = self.id; "released context");
        Ok(())
    }
}
