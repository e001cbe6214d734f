mod config;
mod metrics;
mod trainer;

pub use config::TrainingConfig;
pub use metrics::{Accuracy, LoggedLoss, LossWindow, TrainReport, argmax, correct_predictions};
pub use trainer::{Trainer, evaluate, run_local};
