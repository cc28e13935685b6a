pub mod catalog;
pub mod dataset;
pub mod distance;
pub mod error;
mod linalg;
pub mod linear;
pub mod mean;
pub mod regressor;

pub use catalog::Catalog;
pub use dataset::Dataset;
pub use error::{EstimatorErr, Result};
pub use linear::LinearRegression;
pub use mean::MeanRegressor;
pub use regressor::Regressor;
