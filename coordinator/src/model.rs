use std::{collections::HashMap, fs, path::Path};

use comms::specs::{EstimatorSpec, EstimatorState, LocalFitFailure};
use estimators::{Catalog, Regressor};
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::{LessError, Result, SubsetAssignment, config::Weighting, stacking};

/// One independent run of the LESS pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replication {
    /// Estimator ids to their training rows.
    pub assignment: SubsetAssignment,
    /// The amount of subsets built, failed ones included.
    pub nsubsets: usize,
    /// The estimators feeding the global estimator, in column order.
    pub survivors: Vec<usize>,
    pub excluded: Vec<LocalFitFailure>,
    /// One row per survivor.
    pub centers: Array2<f64>,
    /// The fitted global estimator, `None` with a single subset.
    pub global: Option<serde_json::Value>,
}

/// A trained LESS model.
///
/// Immutable once trained. It can be saved, loaded, re-deployed on a worker
/// pool or evaluated in process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackedModel {
    pub nfeatures: usize,
    pub weighting: Weighting,
    pub global_spec: EstimatorSpec,
    pub replications: Vec<Replication>,
    /// The fitted state of every surviving local estimator, by ascending id.
    pub locals: Vec<EstimatorState>,
}

impl StackedModel {
    /// The ids of every surviving local estimator over all replications.
    pub fn survivors(&self) -> impl Iterator<Item = usize> + '_ {
        self.replications
            .iter()
            .flat_map(|rep| rep.survivors.iter().copied())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let model: Self = serde_json::from_str(json)?;
        model.check()?;
        Ok(model)
    }

    /// Writes the model as JSON to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?)?;
        debug!("model saved to {}", path.display());
        Ok(())
    }

    /// Reads a model previously written by `save`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Builds an in-process predictor out of the model.
    ///
    /// # Arguments
    /// * `catalog` - Must know every estimator kind the model was trained with.
    pub fn predictor(&self, catalog: &Catalog) -> Result<Predictor> {
        let locals = self
            .locals
            .iter()
            .map(|state| -> Result<(usize, Box<dyn Regressor>)> {
                let model = catalog.restore(&state.spec, state.state.clone())?;
                Ok((state.estimator_id, model))
            })
            .collect::<Result<_>>()?;

        Ok(Predictor {
            model: self.clone(),
            locals,
            globals: self.globals(catalog)?,
        })
    }

    /// Restores the global estimator of every replication.
    pub(crate) fn globals(&self, catalog: &Catalog) -> Result<Vec<Option<Box<dyn Regressor>>>> {
        self.replications
            .iter()
            .map(|rep| -> Result<Option<Box<dyn Regressor>>> {
                match &rep.global {
                    Some(state) => Ok(Some(catalog.restore(&self.global_spec, state.clone())?)),
                    None => Ok(None),
                }
            })
            .collect()
    }

    /// Checks that every survivor has a center and a fitted state.
    pub(crate) fn check(&self) -> Result<()> {
        for rep in &self.replications {
            if rep.centers.nrows() != rep.survivors.len() || rep.centers.ncols() != self.nfeatures {
                return Err(LessError::Configuration(format!(
                    "model holds {}x{} centers for {} survivors of {} features",
                    rep.centers.nrows(),
                    rep.centers.ncols(),
                    rep.survivors.len(),
                    self.nfeatures
                )));
            }
        }

        for id in self.survivors() {
            if !self.locals.iter().any(|state| state.estimator_id == id) {
                return Err(LessError::Configuration(format!(
                    "model has no state for local estimator {id}"
                )));
            }
        }

        Ok(())
    }

    /// Checks that `points` can be predicted on.
    pub(crate) fn check_points(&self, points: ArrayView2<f64>) -> Result<()> {
        if points.ncols() != self.nfeatures {
            return Err(LessError::Configuration(format!(
                "points have {} features, the model was trained on {}",
                points.ncols(),
                self.nfeatures
            )));
        }

        if points.iter().any(|v| !v.is_finite()) {
            return Err(LessError::Configuration("points hold non-finite values".into()));
        }

        Ok(())
    }

    /// Combines local predictions into the final ones, averaging the replications.
    ///
    /// # Arguments
    /// * `points` - The points predicted on.
    /// * `globals` - The restored global estimators, one per replication.
    /// * `local` - The predictions of every survivor on `points`.
    pub(crate) fn assemble(
        &self,
        points: ArrayView2<f64>,
        globals: &[Option<Box<dyn Regressor>>],
        local: &HashMap<usize, Vec<f64>>,
    ) -> Result<Array1<f64>> {
        let nrows = points.nrows();
        let mut total = Array1::zeros(nrows);

        for (rep, global) in self.replications.iter().zip(globals) {
            let mut predictions = Array2::zeros((nrows, rep.survivors.len()));
            for (mut column, id) in predictions.columns_mut().into_iter().zip(&rep.survivors) {
                let values = local.get(id).ok_or_else(|| {
                    LessError::DistributedCommunication(format!(
                        "no predictions from local estimator {id}"
                    ))
                })?;
                column.assign(&ArrayView1::from(values.as_slice()));
            }

            let design = stacking::design(
                points,
                predictions.view(),
                rep.centers.view(),
                self.weighting,
                rep.nsubsets,
            );
            total += &stacking::combine(design.view(), global.as_deref())?;
        }

        Ok(total / self.replications.len().max(1) as f64)
    }
}

/// Evaluates a stacked model without any worker.
pub struct Predictor {
    model: StackedModel,
    locals: HashMap<usize, Box<dyn Regressor>>,
    globals: Vec<Option<Box<dyn Regressor>>>,
}

impl Predictor {
    pub fn model(&self) -> &StackedModel {
        &self.model
    }

    /// Predicts one value per row of `points`.
    pub fn predict(&self, points: ArrayView2<f64>) -> Result<Array1<f64>> {
        self.model.check_points(points)?;
        if points.nrows() == 0 {
            return Ok(Array1::zeros(0));
        }

        let local: HashMap<usize, Vec<f64>> = self
            .locals
            .iter()
            .map(|(&id, model)| -> Result<(usize, Vec<f64>)> {
                Ok((id, model.predict(points)?.to_vec()))
            })
            .collect::<Result<_>>()?;

        self.model.assemble(points, &self.globals, &local)
    }
}
