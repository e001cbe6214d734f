use log::{debug, info};

use super::{Accuracy, LoggedLoss, LossWindow, TrainReport, TrainingConfig, correct_predictions};
use crate::{
    Result,
    arch::{Module, loss::LossFn},
    dataset::{DataLoader, Dataset, MNIST_CLASSES},
    optimization::{Optimizer, OptimizerBuilder},
};

/// Trains a `Module` in a single process. Contains the loss and the optimizer that go
/// along with the module.
pub struct Trainer<L, O>
where
    L: LossFn,
    O: Optimizer,
{
    loss_fn: L,
    optimizer: O,
    epochs: usize,
    log_every: usize,
}

impl<L, O> Trainer<L, O>
where
    L: LossFn,
    O: Optimizer,
{
    /// Returns a new `Trainer`.
    ///
    /// # Arguments
    /// * `loss_fn` - Measures the difference between the module's output and the labels.
    /// * `optimizer` - Dictates how to update the parameters after each batch.
    /// * `epochs` - The amount of passes over the training set.
    /// * `log_every` - Iterations between loss reports.
    pub fn new(loss_fn: L, optimizer: O, epochs: usize, log_every: usize) -> Self {
        Self {
            loss_fn,
            optimizer,
            epochs,
            log_every: log_every.max(1),
        }
    }

    /// Runs every epoch of training: forward, loss, zero grad, backward and step per batch.
    ///
    /// # Arguments
    /// * `module` - The module to train.
    /// * `loader` - The training batches.
    ///
    /// # Returns
    /// The losses reported along the way.
    pub fn train(&mut self, module: &mut Module, loader: &mut DataLoader) -> Result<TrainReport> {
        info!("Start training ...");

        let mut report = TrainReport {
            epochs: self.epochs,
            ..Default::default()
        };
        let mut window = LossWindow::new();

        for epoch in 1..=self.epochs {
            for (i, batch) in loader.batches().enumerate() {
                let y_pred = module.forward(batch.x)?;
                let loss = self.loss_fn.loss(y_pred.view(), &batch.labels)?;
                let d = self.loss_fn.loss_prime(y_pred.view(), &batch.labels)?;

                module.zero_grad();
                module.backward(d)?;
                module.step(&mut self.optimizer)?;

                window.push(loss);
                report.iterations += 1;

                let iter = i + 1;
                if iter % self.log_every != 0 {
                    continue;
                }

                if let Some(loss) = window.flush() {
                    info!("epoch: {epoch}, iters: {iter:5}, loss: {loss:.3}");
                    report.losses.push(LoggedLoss { epoch, iter, loss });
                }
            }

            info!("Finished epoch: {epoch:3} / {:3}", self.epochs);
        }

        info!("Training Finished!");
        Ok(report)
    }
}

/// Measures how many samples of `loader` the module classifies correctly.
pub fn evaluate(module: &mut Module, loader: &mut DataLoader) -> Result<Accuracy> {
    info!("testing ...");
    let mut accuracy = Accuracy::default();

    for batch in loader.batches() {
        let y_pred = module.forward(batch.x)?;
        accuracy.add(
            correct_predictions(y_pred.view(), &batch.labels),
            batch.labels.len(),
        );
    }

    info!("Test set: {accuracy}");
    Ok(accuracy)
}

/// Trains the whole network on the MNIST training split and tests it on the test split.
///
/// # Arguments
/// * `config` - The session's hyper parameters and data location.
///
/// # Returns
/// The training report and the test accuracy.
pub fn run_local<L: LossFn>(
    config: &TrainingConfig,
    loss_fn: L,
) -> Result<(TrainReport, Accuracy)> {
    config.validate()?;

    let train_set = Dataset::mnist(&config.data_path, true)?;
    let test_set = Dataset::mnist(&config.data_path, false)?;

    let mut module = Module::net(train_set.shape().channels, MNIST_CLASSES, config.seed)?;
    debug!(params = module.size(); "built the network");

    let optimizer = OptimizerBuilder::new().build(config.optimizer, module.size());
    let mut trainer = Trainer::new(loss_fn, optimizer, config.epochs, config.log_every);

    let mut train_loader =
        DataLoader::new(&train_set, config.train_batch()?, config.shuffle, config.seed);
    let report = trainer.train(&mut module, &mut train_loader)?;

    let mut test_loader = DataLoader::new(&test_set, config.test_batch()?, false, None);
    let accuracy = evaluate(&mut module, &mut test_loader)?;

    Ok((report, accuracy))
}
