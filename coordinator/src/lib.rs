mod assignment;
pub mod config;
pub mod error;
pub mod matrix;
pub mod model;
pub mod placement;
pub mod sampling;
mod session;
mod stacking;

use std::sync::Arc;

use estimators::Catalog;
use ndarray::{Array1, ArrayView1, ArrayView2};

pub use assignment::SubsetAssignment;
pub use config::{FailurePolicy, LessConfig, SamplerConfig, SubsetSize, Weighting};
pub use error::{LessError, Result};
pub use model::{Predictor, Replication, StackedModel};
pub use placement::Placement;
pub use session::{Session, SessionState};

/// Trains a stacked model on `workers` in-process workers.
///
/// # Arguments
/// * `features` - One row per sample.
/// * `targets` - One label per row.
/// * `config` - The training parameters.
/// * `workers` - The amount of workers to spread the local estimators over.
///
/// # Errors
/// Returns a `LessError` if the inputs are invalid or training fails.
pub fn fit(
    features: ArrayView2<f64>,
    targets: ArrayView1<f64>,
    config: &LessConfig,
    workers: usize,
) -> Result<StackedModel> {
    log::info!("starting {workers} local worker(s)");
    let mut session = Session::local(workers, Arc::new(Catalog::new()))?;
    let model = session.fit(features, targets, config);
    session.shutdown();
    model
}

/// Predicts with a trained model in process, without any worker.
pub fn predict(model: &StackedModel, points: ArrayView2<f64>) -> Result<Array1<f64>> {
    model.predictor(&Catalog::new())?.predict(points)
}
