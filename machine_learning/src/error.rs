use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use ndarray::ShapeError;
use rand_distr::uniform::Error as UniformError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    MissingForward {
        layer: &'static str,
    },
    InvalidLabel {
        label: usize,
        classes: usize,
    },
    InvalidDataset(String),
    InvalidConfig(String),
    Shape(ShapeError),
    Init(UniformError),
    Io(io::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::MissingForward { layer } => write!(
                f,
                "Tried to backpropagate through a {layer} layer without a prior forward pass"
            ),
            MlErr::InvalidLabel { label, classes } => {
                write!(f, "Label {label} is out of range for {classes} classes")
            }
            MlErr::InvalidDataset(e) => write!(f, "Invalid dataset: {e}"),
            MlErr::InvalidConfig(e) => write!(f, "Invalid training configuration: {e}"),
            MlErr::Shape(e) => write!(f, "Shape error: {e}"),
            MlErr::Init(e) => write!(f, "Failed to initialize parameters: {e}"),
            MlErr::Io(e) => write!(f, "Io error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Init(e) => Some(e),
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<UniformError> for MlErr {
    fn from(value: UniformError) -> Self {
        Self::Init(value)
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}
