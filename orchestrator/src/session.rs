use log::{debug, info};
use machine_learning::{
    arch::loss::{CrossEntropy, LossFn},
    dataset::{DataLoader, Dataset, MNIST_CLASSES},
    training::{Accuracy, LoggedLoss, LossWindow, TrainReport, TrainingConfig, correct_predictions},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};

use crate::{DistAutograd, DistributedOptimizer, ParallelNet, Result, RpcAgent, rpc::NetAgent};

/// Trains a `ParallelNet`, each batch within its own distributed autograd context.
pub struct DistTrainer<L: LossFn> {
    loss_fn: L,
    epochs: usize,
    log_every: usize,
    autograd: DistAutograd,
}

impl<L: LossFn> DistTrainer<L> {
    /// Returns a new `DistTrainer`.
    ///
    /// # Arguments
    /// * `loss_fn` - Measures the difference between the network's output and the labels.
    /// * `epochs` - The amount of passes over the training set.
    /// * `log_every` - Iterations between loss reports.
    pub fn new(loss_fn: L, epochs: usize, log_every: usize) -> Self {
        Self {
            loss_fn,
            epochs,
            log_every: log_every.max(1),
            autograd: DistAutograd::new(),
        }
    }

    /// Runs every epoch of training: remote forward, loss, distributed backward, distributed
    /// step and context release per batch.
    ///
    /// # Returns
    /// The losses reported along the way.
    pub async fn train<R, W>(
        &mut self,
        agent: &mut RpcAgent<R, W>,
        net: &ParallelNet,
        optimizer: &DistributedOptimizer,
        loader: &mut DataLoader<'_>,
    ) -> Result<TrainReport>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("Start training ...");

        let mut report = TrainReport {
            epochs: self.epochs,
            ..Default::default()
        };
        let mut window = LossWindow::new();

        for epoch in 1..=self.epochs {
            for (i, batch) in loader.batches().enumerate() {
                let mut ctx = self.autograd.context();

                let y_pred = net.forward(agent, &mut ctx, &batch.x).await?;
                let loss = self.loss_fn.loss(y_pred.view(), &batch.labels)?;
                let d = self.loss_fn.loss_prime(y_pred.view(), &batch.labels)?;

                ctx.backward(agent, d).await?;
                optimizer.step(agent, &ctx).await?;
                ctx.release(agent).await?;

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

/// Measures how many samples of `loader` the remote network classifies correctly.
pub async fn evaluate<R, W>(
    agent: &mut RpcAgent<R, W>,
    net: &ParallelNet,
    loader: &mut DataLoader<'_>,
) -> Result<Accuracy>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("testing ...");
    let mut accuracy = Accuracy::default();

    for batch in loader.batches() {
        let y_pred = net.infer(agent, &batch.x).await?;
        accuracy.add(
            correct_predictions(y_pred.view(), &batch.labels),
            batch.labels.len(),
        );
    }

    info!("Test set: {accuracy}");
    Ok(accuracy)
}

/// Places the network on the agent's peers, trains it and tests it.
///
/// # Arguments
/// * `agent` - An agent already connected to the workers.
/// * `config` - The session's hyper parameters.
/// * `train_set` - The samples to train with.
/// * `test_set` - The samples to test with.
///
/// # Returns
/// The training report and the test accuracy.
pub async fn run_session<R, W>(
    agent: &mut RpcAgent<R, W>,
    config: &TrainingConfig,
    train_set: &Dataset,
    test_set: &Dataset,
) -> Result<(TrainReport, Accuracy)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    config.validate()?;

    let channels = train_set.shape().channels;
    let net = ParallelNet::new(agent, channels, MNIST_CLASSES, config.seed).await?;
    let size = net.size(agent).await?;
    debug!(params = size; "built the parallel network");

    let optimizer =
        DistributedOptimizer::new(agent, config.optimizer, net.parameter_rrefs()).await?;
    let mut trainer = DistTrainer::new(CrossEntropy, config.epochs, config.log_every);

    let mut train_loader =
        DataLoader::new(train_set, config.train_batch()?, config.shuffle, config.seed);
    let report = trainer
        .train(agent, &net, &optimizer, &mut train_loader)
        .await?;

    let mut test_loader = DataLoader::new(test_set, config.test_batch()?, false, None);
    let accuracy = evaluate(agent, &net, &mut test_loader).await?;

    Ok((report, accuracy))
}

/// Leads a whole distributed session: waits for the workers, trains and tests on MNIST
/// and shuts the workers down, even if training failed.
///
/// # Arguments
/// * `listener` - Where the workers connect to.
/// * `world_size` - The amount of processes in the session, the leader included.
/// * `config` - The session's hyper parameters and data location.
pub async fn run(
    listener: TcpListener,
    world_size: usize,
    config: &TrainingConfig,
) -> Result<(TrainReport, Accuracy)> {
    config.validate()?;

    info!(world_size = world_size; "waiting for workers to join");
    let mut agent = NetAgent::init(&listener, world_size).await?;

    let outcome = async {
        let train_set = Dataset::mnist(&config.data_path, true)?;
        let test_set = Dataset::mnist(&config.data_path, false)?;
        run_session(&mut agent, config, &train_set, &test_set).await
    }
    .await;

    agent.shutdown().await?;
    outcome
}
