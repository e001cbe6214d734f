use std::{collections::BTreeMap, io};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, ContextId, ModuleId, Msg, Payload},
    specs::{ModuleSpec, OptimizerSpec},
};
use log::{debug, info};
use machine_learning::tensor::{from_rows, row_major};
use ndarray::Array2;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpListener,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

use crate::{OrchestratorError, Result};

/// A reference to a module owned by a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RRef {
    owner: String,
    module: ModuleId,
}

impl RRef {
    /// The name of the peer holding the module.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }
}

/// The framed channel to a peer.
struct Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
    rx_buf: Vec<f32>,
}

impl<R, W> Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Sends `msg` and waits for its reply.
    async fn request(&mut self, msg: &Msg<'_>) -> io::Result<Msg<'_>> {
        self.tx.send(msg).await?;
        self.rx.recv_into(&mut self.rx_buf).await
    }
}

struct Peer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    name: String,
    link: Link<R, W>,
}

impl<R, W> Peer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Sends `msg` and waits for its reply, a `Msg::Err` reply becomes an error.
    async fn request(&mut self, msg: &Msg<'_>) -> Result<Msg<'_>> {
        let Self { name, link } = self;
        remote_err(name, link.request(msg).await?)
    }

    async fn control(&mut self, cmd: Command) -> Result<Command> {
        let Self { name, link } = self;

        match remote_err(name, link.request(&Msg::Control(cmd)).await?)? {
            Msg::Control(reply) => Ok(reply),
            other => Err(unexpected(name, &other)),
        }
    }

    async fn ack(&mut self, cmd: Command) -> Result<()> {
        match self.control(cmd).await? {
            Command::Ack => Ok(()),
            other => Err(unexpected(&self.name, &other)),
        }
    }

    async fn tensor(&mut self, msg: Msg<'_>) -> Result<Array2<f32>> {
        let Self { name, link } = self;

        match remote_err(name, link.request(&msg).await?)? {
            Msg::Data(Payload::Tensor { rows, data }) => Ok(from_rows(rows, data)?),
            other => Err(unexpected(name, &other)),
        }
    }
}

fn remote_err<'a>(peer: &str, reply: Msg<'a>) -> Result<Msg<'a>> {
    match reply {
        Msg::Err(e) => Err(OrchestratorError::Remote {
            peer: peer.to_string(),
            msg: e.into_owned(),
        }),
        reply => Ok(reply),
    }
}

fn unexpected(peer: &str, msg: &impl std::fmt::Debug) -> OrchestratorError {
    OrchestratorError::UnexpectedReply {
        peer: peer.to_string(),
        msg: format!("{msg:?}"),
    }
}

/// The leader's end of every peer connection in the session.
///
/// Calls are synchronous, each one waits for the peer's reply before returning.
pub struct RpcAgent<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    peers: BTreeMap<String, Peer<R, W>>,
    next_module: ModuleId,
}

/// An agent whose peers are connected through tcp.
pub type NetAgent = RpcAgent<OwnedReadHalf, OwnedWriteHalf>;

impl NetAgent {
    /// Waits for every other process in the world to join the session.
    ///
    /// # Arguments
    /// * `listener` - Where the leader listens for workers.
    /// * `world_size` - The amount of processes in the session, the leader included.
    ///
    /// # Returns
    /// An agent connected to `world_size - 1` workers.
    pub async fn init(listener: &TcpListener, world_size: usize) -> Result<Self> {
        if world_size < 2 {
            return Err(OrchestratorError::InvalidConfig(format!(
                "a world of {world_size} process(es) has no workers to place modules on"
            )));
        }

        let mut agent = Self::new();

        while agent.peers.len() < world_size - 1 {
            let (stream, addr) = listener.accept().await?;
            stream.set_nodelay(true)?;

            let (rx, tx) = stream.into_split();
            let (mut rx, tx) = comms::channel(rx, tx);

            let mut rx_buf: Vec<f32> = Vec::new();
            let Msg::Control(Command::Join { rank, name }) = rx.recv_into(&mut rx_buf).await? else {
                return Err(unexpected(&addr.to_string(), &"a message other than join"));
            };

            if rank == 0 || rank >= world_size {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "{name} joined with rank {rank}, outside of a world of {world_size}"
                )));
            }

            info!(rank = rank; "{name} joined from {addr}");
            agent.add_peer(name, rx, tx)?;
        }

        Ok(agent)
    }
}

impl<R, W> Default for RpcAgent<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> RpcAgent<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates an agent without peers.
    pub fn new() -> Self {
        Self {
            peers: BTreeMap::new(),
            next_module: 1,
        }
    }

    /// Registers the channel to a peer under `name`.
    pub fn add_peer(
        &mut self,
        name: impl Into<String>,
        rx: OnoReceiver<R>,
        tx: OnoSender<W>,
    ) -> Result<()> {
        let name = name.into();
        if self.peers.contains_key(&name) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{name} joined twice"
            )));
        }

        let peer = Peer {
            name: name.clone(),
            link: Link {
                rx,
                tx,
                rx_buf: Vec::new(),
            },
        };

        self.peers.insert(name, peer);
        Ok(())
    }

    pub fn has_peer(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    /// Returns the names of the connected peers in order.
    pub fn peer_names(&self) -> impl Iterator<Item = &str> {
        self.peers.keys().map(String::as_str)
    }

    fn peer(&mut self, name: &str) -> Result<&mut Peer<R, W>> {
        self.peers
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::UnknownPeer(name.to_string()))
    }

    /// Instantiates a module on peer `to`.
    ///
    /// # Returns
    /// A reference to the remote module.
    pub async fn remote(&mut self, to: &str, spec: ModuleSpec) -> Result<RRef> {
        let module = self.next_module;
        self.peer(to)?
            .ack(Command::CreateModule { module, spec })
            .await?;

        self.next_module += 1;
        debug!(module = module, owner = to; "created remote {:?}", spec.kind);

        Ok(RRef {
            owner: to.to_string(),
            module,
        })
    }

    /// Runs the remote module over `x`, recorded under `ctx` unless it's `NO_GRAD`.
    pub async fn forward(
        &mut self,
        rref: &RRef,
        ctx: ContextId,
        x: &Array2<f32>,
    ) -> Result<Array2<f32>> {
        let data = row_major(x);
        let msg = Msg::Data(Payload::Forward {
            module: rref.module,
            ctx,
            rows: x.nrows(),
            data: &data,
        });

        self.peer(&rref.owner)?.tensor(msg).await
    }

    /// Backpropagates `d` through the pass the remote module recorded for `ctx`.
    ///
    /// # Returns
    /// The gradient with respect to that pass' input.
    pub async fn backward(
        &mut self,
        rref: &RRef,
        ctx: ContextId,
        d: &Array2<f32>,
    ) -> Result<Array2<f32>> {
        let data = row_major(d);
        let msg = Msg::Data(Payload::Backward {
            module: rref.module,
            ctx,
            rows: d.nrows(),
            data: &data,
        });

        self.peer(&rref.owner)?.tensor(msg).await
    }

    pub async fn create_optimizer(&mut self, rref: &RRef, spec: OptimizerSpec) -> Result<()> {
        let cmd = Command::CreateOptimizer {
            module: rref.module,
            spec,
        };

        self.peer(&rref.owner)?.ack(cmd).await
    }

    /// Updates the remote module with the gradient it gathered in `ctx`.
    pub async fn step(&mut self, rref: &RRef, ctx: ContextId) -> Result<()> {
        let cmd = Command::Step {
            module: rref.module,
            ctx,
        };

        self.peer(&rref.owner)?.ack(cmd).await
    }

    /// Makes peer `name` drop everything it kept for `ctx`.
    pub async fn release(&mut self, name: &str, ctx: ContextId) -> Result<()> {
        self.peer(name)?.ack(Command::ReleaseContext { ctx }).await
    }

    pub async fn parameter_count(&mut self, rref: &RRef) -> Result<usize> {
        let peer = self.peer(&rref.owner)?;

        match peer.control(Command::ParameterInfo { module: rref.module }).await? {
            Command::ParameterCount { module, len } if module == rref.module => Ok(len),
            other => Err(unexpected(&rref.owner, &other)),
        }
    }

    /// Fetches a copy of the remote module's parameters.
    pub async fn pull_params(&mut self, rref: &RRef) -> Result<Vec<f32>> {
        let peer = self.peer(&rref.owner)?;
        let msg = Msg::Control(Command::PullParams { module: rref.module });

        match peer.request(&msg).await? {
            Msg::Data(Payload::Params(params)) => Ok(params.to_vec()),
            other => Err(unexpected(&rref.owner, &other)),
        }
    }

    /// Says goodbye to every peer, waiting for each of them to acknowledge it.
    pub async fn shutdown(self) -> Result<()> {
        for (name, mut peer) in self.peers {
            match peer.control(Command::Disconnect).await? {
                Command::Disconnect => debug!("{name} disconnected"),
                other => return Err(unexpected(&name, &other)),
            }

            peer.link.tx.shutdown().await?;
        }

        info!("every peer was shut down");
        Ok(())
    }
}
