use std::io;

use log::info;
use machine_learning::{arch::loss::CrossEntropy, training::{TrainingConfig, run_local}};

fn main() -> io::Result<()> {
    env_logger::init();

    let config = node::config::training_config(TrainingConfig::local())?;
    info!(
        epochs = config.epochs, batch_size = config.batch_size;
        "training on {}", config.data_path.display()
    );

    let (report, accuracy) = run_local(&config, CrossEntropy).map_err(io::Error::other)?;
    info!(iterations = report.iterations; "{accuracy}");

    Ok(())
}
