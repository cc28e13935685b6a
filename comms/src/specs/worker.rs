use std::fmt;

use serde::{Deserialize, Serialize};

use super::estimator::{EstimatorSpec, EstimatorState};

/// One local estimator to be hosted by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimatorAssignment {
    pub estimator_id: usize,
    /// Dataset rows the estimator trains on.
    pub rows: Vec<usize>,
    /// Seed handed to the estimator when it is built.
    pub seed: u64,
}

/// The assignment message, the coordinator scatters one per worker and replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentSpec {
    pub worker_id: usize,
    pub estimator: EstimatorSpec,
    pub estimators: Vec<EstimatorAssignment>,
}

/// Result of fitting a single local estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    /// The estimator is usable; `center` is the mean of its training rows.
    Fitted { center: Vec<f64> },
    Failed { cause: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOutcome {
    pub estimator_id: usize,
    pub status: FitStatus,
}

/// The fit acknowledgement, one per worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub worker_id: usize,
    pub outcomes: Vec<FitOutcome>,
}

/// A local estimator that could not be fitted, or whose worker went away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFitFailure {
    pub estimator_id: usize,
    pub cause: String,
}

impl fmt::Display for LocalFitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local estimator {} failed: {}", self.estimator_id, self.cause)
    }
}

/// The points a prediction request is evaluated on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Points {
    /// Rows of the dataset the worker already holds.
    Dataset { rows: Vec<usize> },
    /// New rows, sent right after the request as a row-major `Points` payload.
    Inline { nrows: usize, ncols: usize },
}

impl Points {
    pub fn len(&self) -> usize {
        match self {
            Self::Dataset { rows } => rows.len(),
            Self::Inline { nrows, .. } => *nrows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The prediction request message.
///
/// The worker answers with a single `Predictions` payload holding one block of
/// `points.len()` values per estimator, in the order of `estimators`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictSpec {
    pub estimators: Vec<usize>,
    pub points: Points,
}

/// Re-deploys previously exported estimators onto a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreSpec {
    pub worker_id: usize,
    pub estimators: Vec<EstimatorState>,
}

/// A request the worker refused to serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerFailure {
    NotFitted { estimator_id: usize },
    UnknownEstimator { estimator_id: usize },
    DuplicateEstimator { estimator_id: usize },
    NoDataset,
    Rejected { detail: String },
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFitted { estimator_id } => {
                write!(f, "estimator {estimator_id} is not fitted")
            }
            Self::UnknownEstimator { estimator_id } => {
                write!(f, "estimator {estimator_id} is not hosted here")
            }
            Self::DuplicateEstimator { estimator_id } => {
                write!(f, "estimator {estimator_id} is already hosted here")
            }
            Self::NoDataset => write!(f, "no dataset loaded"),
            Self::Rejected { detail } => write!(f, "request rejected: {detail}"),
        }
    }
}
