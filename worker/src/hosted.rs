use std::collections::HashMap;

use comms::msg::{ContextId, ModuleId, NO_GRAD};
use log::debug;
use machine_learning::{arch::Module, optimization::Optimizer};
use ndarray::Array2;

use crate::{Result, WorkerErr};

/// A module living on this worker, with the gradients each autograd context left on it.
pub struct HostedModule {
    id: ModuleId,
    module: Module,
    optimizer: Option<Box<dyn Optimizer + Send>>,
    contexts: HashMap<ContextId, Box<[f32]>>,
    recorded: Option<ContextId>,
}

impl HostedModule {
    pub fn new(id: ModuleId, module: Module) -> Self {
        Self {
            id,
            module,
            optimizer: None,
            contexts: HashMap::new(),
            recorded: None,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Sets the optimizer that `step` updates the parameters with, replacing any previous one.
    pub fn set_optimizer(&mut self, optimizer: Box<dyn Optimizer + Send>) {
        self.optimizer = Some(optimizer);
    }

    /// Runs the module, recording the pass under `ctx` unless it's `NO_GRAD`.
    ///
    /// Only the latest pass can be backpropagated, a new forward replaces the record.
    pub fn forward(&mut self, ctx: ContextId, x: Array2<f32>) -> Result<Array2<f32>> {
        self.recorded = None;
        let y = self.module.forward(x)?;
        self.recorded = (ctx != NO_GRAD).then_some(ctx);
        Ok(y)
    }

    /// Backpropagates through the pass recorded for `ctx`, adding the parameters' gradient to
    /// the ones already gathered in that context.
    ///
    /// # Returns
    /// The gradient with respect to the module's input.
    pub fn backward(&mut self, ctx: ContextId, d: Array2<f32>) -> Result<Array2<f32>> {
        match self.recorded {
            Some(recorded) if recorded == ctx => self.recorded = None,
            Some(recorded) => {
                return Err(WorkerErr::StaleContext {
                    module: self.id,
                    ctx,
                    recorded,
                });
            }
            None => {
                return Err(WorkerErr::UnknownContext {
                    module: self.id,
                    ctx,
                });
            }
        }

        self.module.zero_grad();
        let dx = self.module.backward(d)?;

        let size = self.module.size();
        let grad = self
            .contexts
            .entry(ctx)
            .or_insert_with(|| vec![0.; size].into_boxed_slice());

        grad.iter_mut()
            .zip(self.module.grad())
            .for_each(|(acc, g)| *acc += g);

        Ok(dx)
    }

    /// Updates the parameters with the gradient gathered in `ctx` and forgets it.
    ///
    /// # Returns
    /// Whether there was a gradient to apply.
    pub fn step(&mut self, ctx: ContextId) -> Result<bool> {
        let optimizer = self
            .optimizer
            .as_mut()
            .ok_or(WorkerErr::MissingOptimizer(self.id))?;

        let Some(grad) = self.contexts.remove(&ctx) else {
            debug!(module = self.id, ctx = ctx; "nothing to step with");
            return Ok(false);
        };

        self.module.apply(optimizer, &grad)?;
        Ok(true)
    }

    /// Drops whatever `ctx` left on this module.
    pub fn release(&mut self, ctx: ContextId) {
        if self.recorded == Some(ctx) {
            self.recorded = None;
        }

        self.contexts.remove(&ctx);
    }

    /// Returns the amount of contexts holding gradients.
    pub fn live_contexts(&self) -> usize {
        self.contexts.len()
    }
}
