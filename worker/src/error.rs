use std::{error::Error, fmt, io};

use comms::msg::{ContextId, ModuleId};
use machine_learning::MlErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Ml(MlErr),
    UnknownModule(ModuleId),
    ModuleExists(ModuleId),
    MissingOptimizer(ModuleId),
    UnknownContext {
        module: ModuleId,
        ctx: ContextId,
    },
    StaleContext {
        module: ModuleId,
        ctx: ContextId,
        recorded: ContextId,
    },
    UnexpectedMessage(String),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Ml(e) => write!(f, "{e}"),
            WorkerErr::UnknownModule(module) => write!(f, "there's no module {module}"),
            WorkerErr::ModuleExists(module) => write!(f, "module {module} already exists"),
            WorkerErr::MissingOptimizer(module) => {
                write!(f, "module {module} has no optimizer to step with")
            }
            WorkerErr::UnknownContext { module, ctx } => write!(
                f,
                "module {module} has no forward pass recorded for context {ctx}"
            ),
            WorkerErr::StaleContext {
                module,
                ctx,
                recorded,
            } => write!(
                f,
                "module {module} got a backward pass for context {ctx} but its last forward was recorded for {recorded}"
            ),
            WorkerErr::UnexpectedMessage(msg) => write!(f, "unexpected message: {msg}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MlErr> for WorkerErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
