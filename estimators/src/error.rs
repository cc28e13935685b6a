use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire estimators module.
pub type Result<T> = std::result::Result<T, EstimatorErr>;

/// The estimators module's error type.
#[derive(Debug)]
pub enum EstimatorErr {
    /// `predict` or `save` was called before `fit`.
    NotFitted,
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    EmptyInput,
    OutOfRange {
        index: usize,
        len: usize,
    },
    /// The least squares solve broke down.
    Solver(String),
    InvalidParams(String),
    UnknownEstimator(String),
    State(serde_json::Error),
}

impl Display for EstimatorErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimatorErr::NotFitted => write!(f, "the estimator has not been fitted"),
            EstimatorErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch between {a} and {b}, got {got} and expected {expected}"
            ),
            EstimatorErr::EmptyInput => write!(f, "cannot fit on an empty input"),
            EstimatorErr::OutOfRange { index, len } => {
                write!(f, "row {index} is out of range for {len} rows")
            }
            EstimatorErr::Solver(detail) => write!(f, "the least squares solve failed: {detail}"),
            EstimatorErr::InvalidParams(detail) => write!(f, "invalid parameters: {detail}"),
            EstimatorErr::UnknownEstimator(name) => {
                write!(f, "no estimator named '{name}' in the catalog")
            }
            EstimatorErr::State(e) => write!(f, "malformed estimator state: {e}"),
        }
    }
}

impl Error for EstimatorErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EstimatorErr::State(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for EstimatorErr {
    fn from(value: serde_json::Error) -> Self {
        Self::State(value)
    }
}
