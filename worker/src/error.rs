use std::{error::Error, fmt, io};

use estimators::EstimatorErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
///
/// Requests the worker can't serve are answered with a `WorkerFailure`
/// instead; these errors end the session.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    UnexpectedMessage { got: &'static str },
    Estimator(EstimatorErr),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::UnexpectedMessage { got } => write!(f, "unexpected message: got {got}"),
            WorkerErr::Estimator(e) => write!(f, "estimator error: {e}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Estimator(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EstimatorErr> for WorkerErr {
    fn from(value: EstimatorErr) -> Self {
        Self::Estimator(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
