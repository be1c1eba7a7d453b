use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use ndarray::ShapeError;

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, SmartErr>;

/// The crate's error type.
#[derive(Debug)]
pub enum SmartErr {
    /// Two tensors that must agree on their shape do not.
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    /// A state tensor has no trailing axis to normalize scores over.
    MissingScoreAxis { what: &'static str },
    /// An input could not be viewed with the dimensionality an evaluator expects.
    Shape(ShapeError),
    /// A configuration value is out of its valid range.
    InvalidConfig(String),
    Io(io::Error),
    Json(serde_json::Error),
}

impl Display for SmartErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmartErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch for {what}: got {got:?}, expected {expected:?}"
            ),
            SmartErr::MissingScoreAxis { what } => {
                write!(f, "{what} has no score axis, it must be at least one-dimensional")
            }
            SmartErr::Shape(e) => write!(f, "shape error: {e}"),
            SmartErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            SmartErr::Io(e) => write!(f, "io error: {e}"),
            SmartErr::Json(e) => write!(f, "invalid json: {e}"),
        }
    }
}

impl Error for SmartErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SmartErr::Shape(e) => Some(e),
            SmartErr::Io(e) => Some(e),
            SmartErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for SmartErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<io::Error> for SmartErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SmartErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Boundary conversion for binaries.
impl From<SmartErr> for io::Error {
    fn from(value: SmartErr) -> Self {
        match value {
            SmartErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
