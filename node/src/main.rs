use std::io;

use log::info;
use node::NodeConfig;
use tokio::signal;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let node = NodeConfig::from_env()?;
    info!(rank = node.rank, world_size = node.world_size; "starting node");

    tokio::select! {
        ret = node::launch(&node) => ret?,
        _ = signal::ctrl_c() => {
            info!("received SIGINT");
        }
    }

    Ok(())
}
