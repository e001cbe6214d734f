use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, NO_GRAD, Payload},
    specs::{ModuleKind, ModuleSpec, OptimizerSpec},
};
use tokio::io::{self, DuplexStream, ReadHalf, WriteHalf};
use worker::Worker;

type Rx = OnoReceiver<ReadHalf<DuplexStream>>;
type Tx = OnoSender<WriteHalf<DuplexStream>>;

fn channel_pair() -> ((Rx, Tx), (Rx, Tx)) {
    let (stream1, stream2) = io::duplex(1 << 16);
    let (rx1, tx1) = io::split(stream1);
    let (rx2, tx2) = io::split(stream2);
    let chan1 = comms::channel(rx1, tx1);
    let chan2 = comms::channel(rx2, tx2);
    (chan1, chan2)
}

/// Spawns a worker serving one end of a channel, returning the other.
fn spawn_worker(rank: usize) -> (Rx, Tx, tokio::task::JoinHandle<worker::Result<()>>) {
    let ((mut wk_rx, mut wk_tx), (rx, tx)) = channel_pair();
    let handle = tokio::spawn(async move {
        let mut worker = Worker::new(rank);
        worker.serve(&mut wk_rx, &mut wk_tx).await
    });

    (rx, tx, handle)
}

async fn control(rx: &mut Rx, tx: &mut Tx, cmd: Command) -> Result<Command, String> {
    tx.send(&Msg::Control(cmd)).await.unwrap();
    let mut buf: Vec<f32> = Vec::new();

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Control(reply) => Ok(reply),
        Msg::Err(e) => Err(e.into_owned()),
        other => panic!("unexpected reply {other:?}"),
    }
}

async fn tensor(rx: &mut Rx, tx: &mut Tx, msg: Msg<'_>) -> Result<(usize, Vec<f32>), String> {
    tx.send(&msg).await.unwrap();
    let mut buf: Vec<f32> = Vec::new();

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Data(Payload::Tensor { rows, data }) => Ok((rows, data.to_vec())),
        Msg::Err(e) => Err(e.into_owned()),
        other => panic!("unexpected reply {other:?}"),
    }
}

async fn params(rx: &mut Rx, tx: &mut Tx, module: u32) -> Vec<f32> {
    tx.send(&Msg::Control(Command::PullParams { module }))
        .await
        .unwrap();
    let mut buf: Vec<f32> = Vec::new();

    match rx.recv_into(&mut buf).await.unwrap() {
        Msg::Data(Payload::Params(params)) => params.to_vec(),
        other => panic!("unexpected reply {other:?}"),
    }
}

fn fc_spec() -> ModuleSpec {
    ModuleSpec {
        kind: ModuleKind::SubNetFc { num_classes: 10 },
        seed: Some(7),
    }
}

#[tokio::test]
async fn worker_hosts_and_trains_a_module() {
    let (mut rx, mut tx, handle) = spawn_worker(1);

    let create = Command::CreateModule {
        module: 3,
        spec: fc_spec(),
    };
    assert_eq!(control(&mut rx, &mut tx, create).await, Ok(Command::Ack));

    let info = Command::ParameterInfo { module: 3 };
    assert_eq!(
        control(&mut rx, &mut tx, info).await,
        Ok(Command::ParameterCount {
            module: 3,
            len: 49330
        })
    );

    let optimizer = Command::CreateOptimizer {
        module: 3,
        spec: OptimizerSpec::GradientDescent { learning_rate: 0.1 },
    };
    assert_eq!(control(&mut rx, &mut tx, optimizer).await, Ok(Command::Ack));

    let before = params(&mut rx, &mut tx, 3).await;
    assert_eq!(before.len(), 49330);

    let x = vec![0.25; 2 * 400];
    let forward = Msg::Data(Payload::Forward {
        module: 3,
        ctx: 1,
        rows: 2,
        data: &x,
    });
    let (rows, y) = tensor(&mut rx, &mut tx, forward).await.unwrap();
    assert_eq!((rows, y.len()), (2, 20));

    let d = vec![1.0; 20];
    let backward = Msg::Data(Payload::Backward {
        module: 3,
        ctx: 1,
        rows: 2,
        data: &d,
    });
    let (rows, dx) = tensor(&mut rx, &mut tx, backward).await.unwrap();
    assert_eq!((rows, dx.len()), (2, 800));

    let step = Command::Step { module: 3, ctx: 1 };
    assert_eq!(control(&mut rx, &mut tx, step).await, Ok(Command::Ack));

    let after = params(&mut rx, &mut tx, 3).await;
    assert_ne!(before, after);

    // The gradient was consumed, stepping again changes nothing.
    let step = Command::Step { module: 3, ctx: 1 };
    assert_eq!(control(&mut rx, &mut tx, step).await, Ok(Command::Ack));
    assert_eq!(params(&mut rx, &mut tx, 3).await, after);

    assert_eq!(
        control(&mut rx, &mut tx, Command::Disconnect).await,
        Ok(Command::Disconnect)
    );
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn failures_are_replied_and_serving_goes_on() {
    let (mut rx, mut tx, handle) = spawn_worker(2);

    let err = control(&mut rx, &mut tx, Command::PullParams { module: 9 })
        .await
        .unwrap_err();
    assert!(err.contains('9'), "{err}");

    let create = Command::CreateModule {
        module: 1,
        spec: fc_spec(),
    };
    assert_eq!(control(&mut rx, &mut tx, create.clone()).await, Ok(Command::Ack));
    assert!(control(&mut rx, &mut tx, create).await.is_err());

    let d = vec![1.0; 10];
    let backward = Msg::Data(Payload::Backward {
        module: 1,
        ctx: 4,
        rows: 1,
        data: &d,
    });
    assert!(tensor(&mut rx, &mut tx, backward).await.is_err());

    let step = Command::Step { module: 1, ctx: 4 };
    assert!(control(&mut rx, &mut tx, step).await.is_err());

    // Inference passes aren't recorded and can't be backpropagated.
    let x = vec![0.5; 400];
    let forward = Msg::Data(Payload::Forward {
        module: 1,
        ctx: NO_GRAD,
        rows: 1,
        data: &x,
    });
    assert!(tensor(&mut rx, &mut tx, forward).await.is_ok());
    let backward = Msg::Data(Payload::Backward {
        module: 1,
        ctx: NO_GRAD,
        rows: 1,
        data: &d,
    });
    assert!(tensor(&mut rx, &mut tx, backward).await.is_err());

    let wrong_width = vec![0.5; 399];
    let forward = Msg::Data(Payload::Forward {
        module: 1,
        ctx: 5,
        rows: 1,
        data: &wrong_width,
    });
    assert!(tensor(&mut rx, &mut tx, forward).await.is_err());

    assert_eq!(
        control(&mut rx, &mut tx, Command::ReleaseContext { ctx: 5 }).await,
        Ok(Command::Ack)
    );
    assert!(control(&mut rx, &mut tx, Command::Ack).await.is_err());

    assert_eq!(
        control(&mut rx, &mut tx, Command::Disconnect).await,
        Ok(Command::Disconnect)
    );
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn leader_hanging_up_ends_serving_with_an_error() {
    let (rx, tx, handle) = spawn_worker(1);
    drop((rx, tx));

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, worker::WorkerErr::Io(_)));
}
