use std::{num::NonZeroUsize, path::PathBuf};

use comms::specs::OptimizerSpec;
use machine_learning::{
    arch::{
        Module,
        loss::{CrossEntropy, LossFn},
    },
    dataset::{Dataset, ImageShape},
    optimization::GradientDescent,
    tensor::row_major,
    training::TrainingConfig,
};
use ndarray::Array2;
use orchestrator::{
    DistAutograd, DistributedOptimizer, OrchestratorError, ParallelNet, RpcAgent, run_session,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::{
    io::{self, DuplexStream, ReadHalf, WriteHalf},
    net::TcpListener,
    task::JoinHandle,
};
use worker::Worker;

type Agent = RpcAgent<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// An agent connected to `workers` in-process workers named `worker1`, `worker2`, ...
fn session(workers: usize) -> (Agent, Vec<JoinHandle<worker::Result<()>>>) {
    let mut agent = Agent::new();
    let mut handles = Vec::new();

    for rank in 1..=workers {
        let (stream1, stream2) = io::duplex(1 << 16);
        let (rx1, tx1) = io::split(stream1);
        let (rx2, tx2) = io::split(stream2);
        let (mut wk_rx, mut wk_tx) = comms::channel(rx1, tx1);
        let (rx, tx) = comms::channel(rx2, tx2);

        handles.push(tokio::spawn(async move {
            let mut worker = Worker::new(rank);
            worker.serve(&mut wk_rx, &mut wk_tx).await
        }));

        agent.add_peer(format!("worker{rank}"), rx, tx).unwrap();
    }

    (agent, handles)
}

async fn finish(agent: Agent, handles: Vec<JoinHandle<worker::Result<()>>>) {
    agent.shutdown().await.unwrap();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

fn images(rows: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, 28 * 28), |_| rng.random_range(0.0..1.0))
}

fn assert_close(a: &[f32], b: &[f32], what: &str) {
    assert_eq!(a.len(), b.len(), "{what} lengths differ");
    for (i, (a, b)) in a.iter().zip(b).enumerate() {
        assert!((a - b).abs() < 1e-5, "{what}[{i}]: {a} vs {b}");
    }
}

#[tokio::test]
async fn distributed_round_matches_the_local_net() {
    let (mut agent, handles) = session(2);

    let net = ParallelNet::new(&mut agent, 1, 10, Some(3)).await.unwrap();
    let owners: Vec<_> = net
        .parameter_rrefs()
        .iter()
        .map(|rref| rref.owner().to_string())
        .collect();
    assert_eq!(owners, ["worker1", "worker2"]);

    let mut local = Module::net(1, 10, None).unwrap();
    assert_eq!(net.size(&mut agent).await.unwrap(), local.size());
    local
        .load_parameters(&net.parameters(&mut agent).await.unwrap())
        .unwrap();

    let x = images(4, 0);
    let labels = [0, 3, 7, 9];

    let mut autograd = DistAutograd::new();
    let mut ctx = autograd.context();
    let y = net.forward(&mut agent, &mut ctx, &x).await.unwrap();
    assert_eq!(ctx.tape().len(), 2);

    let y_local = local.forward(x.clone()).unwrap();
    assert_close(&row_major(&y), &row_major(&y_local), "logits");

    let d = CrossEntropy.loss_prime(y.view(), &labels).unwrap();
    let dx = ctx.backward(&mut agent, d.clone()).await.unwrap();
    assert!(ctx.tape().is_empty());

    local.zero_grad();
    let dx_local = local.backward(d).unwrap();
    assert_close(&row_major(&dx), &row_major(&dx_local), "input gradient");

    let spec = OptimizerSpec::GradientDescent { learning_rate: 0.1 };
    let optimizer = DistributedOptimizer::new(&mut agent, spec, net.parameter_rrefs())
        .await
        .unwrap();
    optimizer.step(&mut agent, &ctx).await.unwrap();
    ctx.release(&mut agent).await.unwrap();

    local.step(&mut GradientDescent::new(0.1)).unwrap();
    let trained = net.parameters(&mut agent).await.unwrap();
    assert_close(&trained, local.parameters(), "parameters");

    finish(agent, handles).await;
}

#[tokio::test]
async fn two_process_world_keeps_both_halves_on_worker1() {
    let (mut agent, handles) = session(1);

    let net = ParallelNet::new(&mut agent, 1, 10, Some(1)).await.unwrap();
    assert!(
        net.parameter_rrefs()
            .iter()
            .all(|rref| rref.owner() == "worker1")
    );

    let spec = OptimizerSpec::adam(1e-3);
    let optimizer = DistributedOptimizer::new(&mut agent, spec, net.parameter_rrefs())
        .await
        .unwrap();
    let before = net.parameters(&mut agent).await.unwrap();

    let mut autograd = DistAutograd::new();
    let mut ctx = autograd.context();
    let y = net.forward(&mut agent, &mut ctx, &images(2, 1)).await.unwrap();
    let d = CrossEntropy.loss_prime(y.view(), &[1, 2]).unwrap();
    ctx.backward(&mut agent, d).await.unwrap();
    optimizer.step(&mut agent, &ctx).await.unwrap();
    ctx.release(&mut agent).await.unwrap();

    assert_ne!(net.parameters(&mut agent).await.unwrap(), before);
    finish(agent, handles).await;
}

#[tokio::test]
async fn inference_leaves_nothing_to_step_with() {
    let (mut agent, handles) = session(2);
    let net = ParallelNet::new(&mut agent, 1, 10, Some(2)).await.unwrap();

    let spec = OptimizerSpec::GradientDescent { learning_rate: 1.0 };
    let optimizer = DistributedOptimizer::new(&mut agent, spec, net.parameter_rrefs())
        .await
        .unwrap();
    let before = net.parameters(&mut agent).await.unwrap();

    let y = net.infer(&mut agent, &images(3, 2)).await.unwrap();
    assert_eq!(y.dim(), (3, 10));

    let ctx = DistAutograd::new().context();
    optimizer.step(&mut agent, &ctx).await.unwrap();
    assert_eq!(net.parameters(&mut agent).await.unwrap(), before);

    finish(agent, handles).await;
}

#[tokio::test]
async fn remote_failures_surface_as_errors() {
    let (mut agent, handles) = session(1);

    let net = ParallelNet::new(&mut agent, 1, 10, None).await.unwrap();
    let rrefs = net.parameter_rrefs();
    let conv = &rrefs[0];

    // No optimizer was created for it yet.
    let err = agent.step(conv, 1).await.unwrap_err();
    assert!(
        matches!(&err, OrchestratorError::Remote { peer, .. } if peer == "worker1"),
        "{err}"
    );

    let narrow = Array2::zeros((1, 10));
    let err = agent.forward(conv, 1, &narrow).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Remote { .. }), "{err}");

    // The channel survives failed calls.
    let y = net.infer(&mut agent, &images(1, 3)).await.unwrap();
    assert_eq!(y.dim(), (1, 10));

    let err = agent.release("worker7", 1).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownPeer(_)));

    finish(agent, handles).await;
}

#[tokio::test]
async fn placement_needs_worker1() {
    let mut agent = Agent::new();
    let err = ParallelNet::new(&mut agent, 1, 10, None).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownPeer(name) if name == "worker1"));
}

/// Images lit in one of four quadrants, labelled by the quadrant.
///
/// Kept in step with the fixture of the same name in the `machine_learning` tests.
fn quadrants(n: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut images = Array2::zeros((n, 28 * 28));
    let mut labels = Vec::with_capacity(n);

    for (i, mut image) in images.rows_mut().into_iter().enumerate() {
        let label = i % 4;
        let (oy, ox) = ((label / 2) * 14, (label % 2) * 14);

        for y in 0..14 {
            for x in 0..14 {
                image[(oy + y) * 28 + ox + x] = rng.random_range(0.5..1.0);
            }
        }

        labels.push(label);
    }

    let shape = ImageShape {
        channels: 1,
        height: 28,
        width: 28,
    };
    Dataset::new(images, labels, shape).unwrap()
}

fn small_config() -> TrainingConfig {
    TrainingConfig {
        data_path: PathBuf::from("unused"),
        batch_size: 10,
        test_batch_size: 8,
        epochs: 2,
        log_every: 2,
        seed: Some(0),
        ..TrainingConfig::distributed()
    }
}

#[tokio::test]
async fn session_trains_and_tests_the_parallel_net() {
    let (mut agent, handles) = session(2);
    let config = small_config();
    assert_eq!(config.train_batch().unwrap(), NonZeroUsize::new(10).unwrap());

    let (train_set, test_set) = (quadrants(40, 0), quadrants(20, 1));
    let (report, accuracy) = run_session(&mut agent, &config, &train_set, &test_set)
        .await
        .unwrap();

    assert_eq!(report.epochs, 2);
    assert_eq!(report.iterations, 8);
    assert_eq!(report.losses.len(), 4);
    assert!(report.losses.iter().all(|l| l.loss.is_finite()));
    assert_eq!(accuracy.total, 20);

    finish(agent, handles).await;
}

#[tokio::test]
async fn workers_join_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let workers: Vec<_> = (1..=2)
        .map(|rank| {
            let addr = addr.clone();
            tokio::spawn(async move { worker::run(rank, &addr).await })
        })
        .collect();

    let mut agent = orchestrator::NetAgent::init(&listener, 3).await.unwrap();
    let mut names: Vec<_> = agent.peer_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, ["worker1", "worker2"]);

    let config = TrainingConfig {
        epochs: 1,
        ..small_config()
    };
    let (report, accuracy) =
        run_session(&mut agent, &config, &quadrants(20, 2), &quadrants(8, 3))
            .await
            .unwrap();
    assert_eq!(report.iterations, 2);
    assert_eq!(accuracy.total, 8);

    agent.shutdown().await.unwrap();
    for handle in workers {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn a_world_needs_workers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let err = orchestrator::NetAgent::init(&listener, 1).await.err().unwrap();
    assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
}
