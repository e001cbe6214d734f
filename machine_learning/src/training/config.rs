use std::{fs, num::NonZeroUsize, path::Path, path::PathBuf};

use comms::specs::OptimizerSpec;
use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

fn default_log_every() -> usize {
    20
}

fn default_shuffle() -> bool {
    true
}

/// The hyper parameters and data location of a training session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Directory holding the MNIST idx files.
    pub data_path: PathBuf,
    pub batch_size: usize,
    pub test_batch_size: usize,
    pub epochs: usize,
    pub optimizer: OptimizerSpec,
    /// Iterations between loss reports.
    #[serde(default = "default_log_every")]
    pub log_every: usize,
    /// Whether the training set is reshuffled on every epoch.
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl TrainingConfig {
    /// The single process session: batches of 200 for one epoch, Adam with a learning rate
    /// scaled by the square root of the batch size.
    pub fn local() -> Self {
        let batch_size = 200;

        Self {
            data_path: PathBuf::from("./data"),
            batch_size,
            test_batch_size: 32,
            epochs: 1,
            optimizer: OptimizerSpec::adam(5e-4 * (batch_size as f32).sqrt()),
            log_every: default_log_every(),
            shuffle: true,
            seed: None,
        }
    }

    /// The model parallel session: batches of 32 for two epochs of plain SGD.
    pub fn distributed() -> Self {
        Self {
            batch_size: 32,
            epochs: 2,
            optimizer: OptimizerSpec::GradientDescent {
                learning_rate: 0.01,
            },
            ..Self::local()
        }
    }

    /// Parses a configuration from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Checks that every size in the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("test_batch_size", self.test_batch_size),
            ("log_every", self.log_every),
        ] {
            if value == 0 {
                return Err(MlErr::InvalidConfig(format!("{name} must be positive")));
            }
        }

        let lr = self.optimizer.learning_rate();
        if !lr.is_finite() || lr <= 0. {
            return Err(MlErr::InvalidConfig(format!(
                "learning rate must be positive, got {lr}"
            )));
        }

        Ok(())
    }

    pub fn train_batch(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.batch_size)
            .ok_or_else(|| MlErr::InvalidConfig("batch_size must be positive".into()))
    }

    pub fn test_batch(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.test_batch_size)
            .ok_or_else(|| MlErr::InvalidConfig("test_batch_size must be positive".into()))
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_the_two_sessions() {
        let local = TrainingConfig::local();
        assert_eq!((local.batch_size, local.epochs), (200, 1));
        assert!((local.optimizer.learning_rate() - 5e-4 * 200f32.sqrt()).abs() < 1e-7);

        let dist = TrainingConfig::distributed();
        assert_eq!((dist.batch_size, dist.test_batch_size, dist.epochs), (32, 32, 2));
        assert_eq!(
            dist.optimizer,
            OptimizerSpec::GradientDescent {
                learning_rate: 0.01
            }
        );
    }

    #[test]
    fn json_fills_in_optional_fields() {
        let json = r#"{
            "data_path": "/tmp/mnist",
            "batch_size": 64,
            "test_batch_size": 100,
            "epochs": 3,
            "optimizer": { "gradient_descent": { "learning_rate": 0.1 } }
        }"#;

        let config = TrainingConfig::from_json(json).unwrap();
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.log_every, 20);
        assert!(config.shuffle);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let mut config = TrainingConfig::local();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let json = serde_json::to_string(&config).unwrap();
        assert!(TrainingConfig::from_json(&json).is_err());
    }
}
