use std::{error::Error, fmt, io};

use comms::specs::LocalFitFailure;
use estimators::EstimatorErr;

/// The coordinator's result type.
pub type Result<T> = std::result::Result<T, LessError>;

/// All errors that can occur while training or serving a stacked model.
#[derive(Debug)]
pub enum LessError {
    /// Invalid parameters or data, caught before anything is distributed.
    Configuration(String),
    /// Local estimators failed under the abort policy.
    LocalFit(Vec<LocalFitFailure>),
    /// Too many local estimators failed to build a model.
    InsufficientEstimators {
        survivors: usize,
        minimum: usize,
        failures: Vec<LocalFitFailure>,
    },
    /// Every worker, or a worker needed to answer, went away.
    DistributedCommunication(String),
    /// Predicting before training completed.
    NotFitted,
    /// The global estimator could not be built, fitted or evaluated.
    Estimator(EstimatorErr),
    /// A stacked model could not be encoded or decoded.
    Persistence(serde_json::Error),
    Io(io::Error),
}

impl fmt::Display for LessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "invalid configuration: {msg}"),
            Self::LocalFit(failures) => {
                write!(f, "{} local estimator(s) failed", failures.len())?;
                if let Some(first) = failures.first() {
                    write!(f, ", first: {first}")?;
                }
                Ok(())
            }
            Self::InsufficientEstimators {
                survivors, minimum, ..
            } => write!(
                f,
                "only {survivors} local estimator(s) survived, at least {minimum} required"
            ),
            Self::DistributedCommunication(msg) => write!(f, "communication failed: {msg}"),
            Self::NotFitted => write!(f, "the model has not been fitted"),
            Self::Estimator(e) => write!(f, "global estimator error: {e}"),
            Self::Persistence(e) => write!(f, "model persistence error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for LessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Estimator(e) => Some(e),
            Self::Persistence(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for LessError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<EstimatorErr> for LessError {
    fn from(e: EstimatorErr) -> Self {
        Self::Estimator(e)
    }
}

impl From<serde_json::Error> for LessError {
    fn from(e: serde_json::Error) -> Self {
        Self::Persistence(e)
    }
}
