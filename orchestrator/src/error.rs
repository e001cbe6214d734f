use std::{fmt, io};

use machine_learning::MlErr;

/// The orchestrator's result type.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// All errors that can occur in the orchestrator.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before training.
    InvalidConfig(String),
    /// There's no peer by that name in the session.
    UnknownPeer(String),
    /// A peer failed to handle a request and said why.
    Remote { peer: String, msg: String },
    /// A peer answered with something that doesn't match the request.
    UnexpectedReply { peer: String, msg: String },
    /// Local computation failed.
    Ml(MlErr),
    /// An underlying I/O error.
    Io(io::Error),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::UnknownPeer(name) => write!(f, "there's no peer named {name}"),
            Self::Remote { peer, msg } => write!(f, "{peer} failed: {msg}"),
            Self::UnexpectedReply { peer, msg } => {
                write!(f, "unexpected reply from {peer}: {msg}")
            }
            Self::Ml(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ml(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<MlErr> for OrchestratorError {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<OrchestratorError> for io::Error {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        }
    }
}
