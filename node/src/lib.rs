pub mod config;

use std::io;

use log::info;
use machine_learning::training::TrainingConfig;
use tokio::net::TcpListener;

pub use config::NodeConfig;

/// Runs this process' part of the distributed session, leading it on rank 0 and serving
/// as a worker otherwise.
pub async fn launch(node: &NodeConfig) -> io::Result<()> {
    if !node.is_leader() {
        worker::run(node.rank, &node.master()).await?;
        info!(rank = node.rank; "worker finished");
        return Ok(());
    }

    let training = config::training_config(TrainingConfig::distributed())?;
    let listener = TcpListener::bind(node.master()).await?;
    info!("leading {} processes at {}", node.world_size, node.master());

    let (report, accuracy) = orchestrator::run(listener, node.world_size, &training).await?;
    info!(
        iterations = report.iterations, correct = accuracy.correct, total = accuracy.total;
        "session finished"
    );

    Ok(())
}
