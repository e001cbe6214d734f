use std::{env, io, str::FromStr};

use machine_learning::training::TrainingConfig;

const DEFAULT_WORLD_SIZE: usize = 1;
const DEFAULT_MASTER_ADDR: &str = "localhost";
const DEFAULT_MASTER_PORT: u16 = 12355;

/// Points to a JSON `TrainingConfig` replacing the preset.
pub const TRAIN_CONFIG_VAR: &str = "TRAIN_CONFIG";

/// Where this process sits in the session, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub rank: usize,
    pub world_size: usize,
    pub master_addr: String,
    pub master_port: u16,
}

impl NodeConfig {
    /// Reads `RANK`, `N_DEVICES`, `MASTER_ADDR` and `MASTER_PORT`.
    pub fn from_env() -> io::Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the configuration out of a variable lookup, only `RANK` is mandatory.
    pub fn from_vars<F>(var: F) -> io::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rank: usize = var("RANK")
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "RANK is not set"))
            .and_then(|v| parse("RANK", &v))?;

        let world_size: usize = match var("N_DEVICES") {
            Some(v) => parse("N_DEVICES", &v)?,
            None => DEFAULT_WORLD_SIZE,
        };

        let master_port: u16 = match var("MASTER_PORT") {
            Some(v) => parse("MASTER_PORT", &v)?,
            None => DEFAULT_MASTER_PORT,
        };

        let master_addr = var("MASTER_ADDR").unwrap_or_else(|| DEFAULT_MASTER_ADDR.to_string());

        if rank >= world_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("rank {rank} is outside of a world of {world_size}"),
            ));
        }

        Ok(Self {
            rank,
            world_size,
            master_addr,
            master_port,
        })
    }

    pub fn is_leader(&self) -> bool {
        self.rank == 0
    }

    /// The `host:port` the leader listens on.
    pub fn master(&self) -> String {
        format!("{}:{}", self.master_addr, self.master_port)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> io::Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid {key} {value:?}: {e}"),
        )
    })
}

/// Returns the training configuration at `TRAIN_CONFIG` if set, `preset` otherwise.
pub fn training_config(preset: TrainingConfig) -> io::Result<TrainingConfig> {
    let config = match env::var(TRAIN_CONFIG_VAR) {
        Ok(path) => TrainingConfig::from_file(path),
        Err(_) => preset.validate().map(|_| preset),
    };

    config.map_err(io::Error::other)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_fill_everything_but_the_rank() {
        let node = NodeConfig::from_vars(vars(&[("RANK", "0")])).unwrap();

        assert_eq!(
            node,
            NodeConfig {
                rank: 0,
                world_size: 1,
                master_addr: "localhost".into(),
                master_port: 12355,
            }
        );
        assert!(node.is_leader());
        assert_eq!(node.master(), "localhost:12355");
    }

    #[test]
    fn workers_read_the_whole_topology() {
        let node = NodeConfig::from_vars(vars(&[
            ("RANK", "2"),
            ("N_DEVICES", "3"),
            ("MASTER_ADDR", "10.0.0.1"),
            ("MASTER_PORT", "4000"),
        ]))
        .unwrap();

        assert!(!node.is_leader());
        assert_eq!(node.master(), "10.0.0.1:4000");
    }

    #[test]
    fn bad_topologies_are_rejected() {
        let missing = NodeConfig::from_vars(vars(&[])).unwrap_err();
        assert_eq!(missing.kind(), io::ErrorKind::NotFound);

        let garbage = NodeConfig::from_vars(vars(&[("RANK", "one")])).unwrap_err();
        assert_eq!(garbage.kind(), io::ErrorKind::InvalidInput);

        let outside = NodeConfig::from_vars(vars(&[("RANK", "3"), ("N_DEVICES", "3")]));
        assert!(outside.is_err());
    }
}
