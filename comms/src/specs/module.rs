use serde::{Deserialize, Serialize};

/// The architecture of a remotely instantiated module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// The whole convolutional network.
    Net {
        in_channels: usize,
        num_classes: usize,
    },
    /// The convolutional front of the network, ending in a flatten.
    SubNetConv { in_channels: usize },
    /// The fully connected head of the network.
    SubNetFc { num_classes: usize },
}

/// The specification for creating a module on a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub kind: ModuleKind,
    /// Seeds the parameter initialization, `None` draws from the os.
    #[serde(default)]
    pub seed: Option<u64>,
}
