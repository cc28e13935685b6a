pub mod dataset;
pub mod estimator;
pub mod worker;

pub use dataset::DatasetSpec;
pub use estimator::{EstimatorSpec, EstimatorState};
pub use worker::{
    AssignmentSpec, EstimatorAssignment, FitOutcome, FitReport, FitStatus, LocalFitFailure,
    Points, PredictSpec, RestoreSpec, WorkerFailure,
};
