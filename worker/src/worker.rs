use std::{collections::HashMap, io, time::Duration};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, ContextId, ModuleId, Msg, Payload},
};
use log::{debug, info, warn};
use machine_learning::{
    arch::Module,
    optimization::OptimizerBuilder,
    tensor::{from_rows, row_major},
};
use ndarray::Array2;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::{HostedModule, Result, WorkerErr};

const CONNECT_ATTEMPTS: usize = 120;
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// What a request is answered with.
enum Reply {
    Ack,
    Count { module: ModuleId, len: usize },
    Params(ModuleId),
    Tensor(Array2<f32>),
    Disconnect,
}

/// Hosts modules created by the leader and runs the passes it requests on them.
pub struct Worker {
    rank: usize,
    modules: HashMap<ModuleId, HostedModule>,
}

impl Worker {
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            modules: HashMap::new(),
        }
    }

    /// The name the leader addresses this worker by.
    pub fn name(&self) -> String {
        format!("worker{}", self.rank)
    }

    /// Serves the leader's requests until it says goodbye.
    ///
    /// Every request gets exactly one reply, failures that aren't I/O related are
    /// reported back as `Msg::Err` and serving goes on.
    ///
    /// # Arguments
    /// * `rx` - Receiving end of the leader channel.
    /// * `tx` - Sending end of the leader channel.
    ///
    /// # Errors
    /// Returns `WorkerErr::Io` if the channel fails.
    pub async fn serve<R, W>(
        &mut self,
        rx: &mut OnoReceiver<R>,
        tx: &mut OnoSender<W>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut rx_buf: Vec<f32> = Vec::new();

        loop {
            let msg: Msg = rx.recv_into(&mut rx_buf).await?;

            let reply = match self.handle(msg) {
                Ok(reply) => reply,
                Err(WorkerErr::Io(e)) => return Err(e.into()),
                Err(e) => {
                    warn!(rank = self.rank; "request failed: {e}");
                    tx.send(&Msg::err(e)).await?;
                    continue;
                }
            };

            match reply {
                Reply::Ack => tx.send(&Msg::Control(Command::Ack)).await?,
                Reply::Count { module, len } => {
                    let msg = Msg::Control(Command::ParameterCount { module, len });
                    tx.send(&msg).await?;
                }
                Reply::Params(id) => {
                    let params = self.hosted(id)?.module().parameters();
                    tx.send(&Msg::Data(Payload::Params(params))).await?;
                }
                Reply::Tensor(t) => {
                    let data = row_major(&t);
                    let msg = Msg::Data(Payload::Tensor {
                        rows: t.nrows(),
                        data: &data,
                    });
                    tx.send(&msg).await?;
                }
                Reply::Disconnect => {
                    info!(rank = self.rank; "leader disconnected");
                    tx.send(&Msg::Control(Command::Disconnect)).await?;
                    return Ok(());
                }
            }
        }
    }

    fn handle(&mut self, msg: Msg<'_>) -> Result<Reply> {
        match msg {
            Msg::Data(Payload::Forward {
                module,
                ctx,
                rows,
                data,
            }) => {
                let x = from_rows(rows, data)?;
                let y = self.hosted_mut(module)?.forward(ctx, x)?;
                Ok(Reply::Tensor(y))
            }
            Msg::Data(Payload::Backward {
                module,
                ctx,
                rows,
                data,
            }) => {
                let d = from_rows(rows, data)?;
                let dx = self.hosted_mut(module)?.backward(ctx, d)?;
                Ok(Reply::Tensor(dx))
            }
            Msg::Control(cmd) => self.handle_command(cmd),
            other => Err(WorkerErr::UnexpectedMessage(format!("{other:?}"))),
        }
    }

    fn handle_command(&mut self, cmd: Command) -> Result<Reply> {
        match cmd {
            Command::CreateModule { module, spec } => {
                if self.modules.contains_key(&module) {
                    return Err(WorkerErr::ModuleExists(module));
                }

                let hosted = Module::from_spec(&spec)?;
                info!(
                    rank = self.rank, module = module, params = hosted.size();
                    "created {:?}", spec.kind
                );
                self.modules.insert(module, HostedModule::new(module, hosted));
                Ok(Reply::Ack)
            }
            Command::CreateOptimizer { module, spec } => {
                let hosted = self.hosted_mut(module)?;
                let optimizer = OptimizerBuilder::new().build(spec, hosted.module().size());
                hosted.set_optimizer(optimizer);
                debug!(module = module; "optimizer set to {spec:?}");
                Ok(Reply::Ack)
            }
            Command::ParameterInfo { module } => {
                let len = self.hosted(module)?.module().size();
                Ok(Reply::Count { module, len })
            }
            Command::PullParams { module } => {
                self.hosted(module)?;
                Ok(Reply::Params(module))
            }
            Command::Step { module, ctx } => {
                self.hosted_mut(module)?.step(ctx)?;
                Ok(Reply::Ack)
            }
            Command::ReleaseContext { ctx } => {
                self.release(ctx);
                Ok(Reply::Ack)
            }
            Command::Disconnect => Ok(Reply::Disconnect),
            other => Err(WorkerErr::UnexpectedMessage(format!("{other:?}"))),
        }
    }

    fn release(&mut self, ctx: ContextId) {
        for hosted in self.modules.values_mut() {
            hosted.release(ctx);
        }
    }

    fn hosted(&self, id: ModuleId) -> Result<&HostedModule> {
        self.modules.get(&id).ok_or(WorkerErr::UnknownModule(id))
    }

    fn hosted_mut(&mut self, id: ModuleId) -> Result<&mut HostedModule> {
        self.modules.get_mut(&id).ok_or(WorkerErr::UnknownModule(id))
    }
}

/// Connects to the leader, retrying while it isn't listening yet.
async fn connect(master_addr: &str) -> io::Result<TcpStream> {
    let mut attempt = 1;

    loop {
        match TcpStream::connect(master_addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                debug!(attempt = attempt; "leader not reachable yet: {e}");
                attempt += 1;
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Joins the session led by `master_addr` as `worker{rank}` and serves it until it ends.
///
/// # Arguments
/// * `rank` - This process' rank, must not be the leader's.
/// * `master_addr` - The `host:port` the leader listens on.
pub async fn run(rank: usize, master_addr: &str) -> Result<()> {
    let stream = connect(master_addr).await?;
    stream.set_nodelay(true)?;
    info!(rank = rank, master = master_addr; "connected to the leader");

    let (rx, tx) = stream.into_split();
    let (mut rx, mut tx) = comms::channel(rx, tx);

    let mut worker = Worker::new(rank);
    let join = Msg::Control(Command::Join {
        rank,
        name: worker.name(),
    });
    tx.send(&join).await?;

    worker.serve(&mut rx, &mut tx).await?;
    tx.shutdown().await?;
    Ok(())
}
