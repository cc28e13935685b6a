use std::{collections::BTreeMap, sync::Arc};

use comms::specs::{
    AssignmentSpec, EstimatorSpec, EstimatorState, FitOutcome, FitReport, FitStatus, Points,
    PredictSpec, RestoreSpec, WorkerFailure,
};
use estimators::{Catalog, Dataset, Regressor};
use log::{debug, info, warn};
use ndarray::{ArrayView2, CowArray, Ix2};

fn rejected(detail: impl ToString) -> WorkerFailure {
    WorkerFailure::Rejected {
        detail: detail.to_string(),
    }
}

/// A local estimator hosted by this worker.
struct Hosted {
    spec: EstimatorSpec,
    rows: Vec<usize>,
    /// `None` when the catalog couldn't build it; `status` then holds the cause.
    model: Option<Box<dyn Regressor>>,
    /// `None` until the first fit attempt.
    status: Option<FitStatus>,
}

impl Hosted {
    fn fitted(&self) -> Option<(&dyn Regressor, &[f64])> {
        match (&self.model, &self.status) {
            (Some(model), Some(FitStatus::Fitted { center })) => {
                Some((&**model, center.as_slice()))
            }
            _ => None,
        }
    }
}

/// The protocol independent state of a worker: its copy of the dataset and
/// the local estimators it hosts.
pub struct WorkerUnit {
    worker_id: usize,
    catalog: Arc<Catalog>,
    dataset: Option<Dataset>,
    hosted: BTreeMap<usize, Hosted>,
}

impl WorkerUnit {
    /// Creates a new `WorkerUnit`.
    ///
    /// # Arguments
    /// * `catalog` - Builds the estimators named in assignments.
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            worker_id: 0,
            catalog,
            dataset: None,
            hosted: BTreeMap::new(),
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// The ids of the hosted estimators, ascending.
    pub fn hosted(&self) -> Vec<usize> {
        self.hosted.keys().copied().collect()
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    /// Replaces the worker's copy of the dataset, dropping every hosted estimator.
    pub fn load_dataset(&mut self, dataset: Dataset) {
        info!(
            worker_id = self.worker_id,
            nrows = dataset.len(),
            nfeatures = dataset.nfeatures();
            "dataset loaded"
        );

        self.dataset = Some(dataset);
        self.hosted.clear();
    }

    /// Hosts the estimators listed in `spec` next to the ones already hosted.
    ///
    /// An estimator the catalog refuses to build is still hosted, and reported
    /// as failed by the next `fit`.
    ///
    /// # Returns
    /// The amount of hosted estimators.
    ///
    /// # Errors
    /// `NoDataset` before a dataset is loaded, `DuplicateEstimator` if an id is
    /// already hosted and `Rejected` if a row index is out of range. Nothing is
    /// hosted when the assignment is refused.
    pub fn assign(&mut self, spec: AssignmentSpec) -> Result<usize, WorkerFailure> {
        let dataset = self.dataset.as_ref().ok_or(WorkerFailure::NoDataset)?;
        for (i, assignment) in spec.estimators.iter().enumerate() {
            let estimator_id = assignment.estimator_id;
            let repeated = spec.estimators[..i]
                .iter()
                .any(|other| other.estimator_id == estimator_id);

            if repeated || self.hosted.contains_key(&estimator_id) {
                return Err(WorkerFailure::DuplicateEstimator { estimator_id });
            }

            dataset.check_rows(&assignment.rows).map_err(rejected)?;
        }

        self.worker_id = spec.worker_id;

        for assignment in spec.estimators {
            let (model, status) = match self.catalog.build(&spec.estimator, assignment.seed) {
                Ok(model) => (Some(model), None),
                Err(e) => {
                    warn!(
                        worker_id = self.worker_id,
                        estimator_id = assignment.estimator_id;
                        "cannot build estimator: {e}"
                    );
                    (None, Some(FitStatus::Failed { cause: e.to_string() }))
                }
            };

            self.hosted.insert(
                assignment.estimator_id,
                Hosted {
                    spec: spec.estimator.clone(),
                    rows: assignment.rows,
                    model,
                    status,
                },
            );
        }

        debug!(worker_id = self.worker_id, hosted = self.hosted.len(); "assignment accepted");
        Ok(self.hosted.len())
    }

    /// Fits every hosted estimator that hasn't been attempted yet.
    ///
    /// Each estimator is fitted at most once; later calls report the outcome of
    /// the first attempt.
    pub fn fit(&mut self) -> FitReport {
        let worker_id = self.worker_id;
        let dataset = self.dataset.as_ref();

        let outcomes = self
            .hosted
            .iter_mut()
            .map(|(&estimator_id, hosted)| {
                let status = hosted.status.get_or_insert_with(|| {
                    match fit_one(dataset, &hosted.rows, hosted.model.as_mut()) {
                        Ok(center) => {
                            debug!(
                                worker_id = worker_id,
                                estimator_id = estimator_id;
                                "estimator fitted"
                            );
                            FitStatus::Fitted { center }
                        }
                        Err(cause) => {
                            warn!(
                                worker_id = worker_id,
                                estimator_id = estimator_id;
                                "estimator failed to fit: {cause}"
                            );
                            FitStatus::Failed { cause }
                        }
                    }
                });

                FitOutcome {
                    estimator_id,
                    status: status.clone(),
                }
            })
            .collect();

        FitReport {
            worker_id,
            outcomes,
        }
    }

    /// Evaluates the requested estimators on the requested points.
    ///
    /// # Arguments
    /// * `spec` - The estimators and the points to evaluate.
    /// * `inline` - The points themselves when `spec.points` is `Points::Inline`.
    ///
    /// # Returns
    /// One block of `spec.points.len()` predictions per estimator, in the order
    /// of `spec.estimators`.
    pub fn predict(
        &self,
        spec: &PredictSpec,
        inline: Option<ArrayView2<f64>>,
    ) -> Result<Vec<f64>, WorkerFailure> {
        let points: CowArray<f64, Ix2> = match &spec.points {
            Points::Dataset { rows } => {
                let dataset = self.dataset.as_ref().ok_or(WorkerFailure::NoDataset)?;
                dataset.select_features(rows).map_err(rejected)?.into()
            }
            Points::Inline { nrows, .. } => {
                let points = inline.ok_or_else(|| rejected("inline points are missing"))?;
                if points.nrows() != *nrows {
                    return Err(rejected(format!(
                        "expected {nrows} inline points, got {}",
                        points.nrows()
                    )));
                }
                points.into()
            }
        };
        let points = points.view();

        let mut values = Vec::with_capacity(spec.estimators.len() * points.nrows());
        for &estimator_id in &spec.estimators {
            let hosted = self
                .hosted
                .get(&estimator_id)
                .ok_or(WorkerFailure::UnknownEstimator { estimator_id })?;

            let (model, _) = hosted
                .fitted()
                .ok_or(WorkerFailure::NotFitted { estimator_id })?;

            if points.nrows() == 0 {
                continue;
            }

            let predictions = model.predict(points).map_err(rejected)?;
            values.extend(predictions.iter());
        }

        Ok(values)
    }

    /// Exports the fitted state of the given estimators, in the given order.
    pub fn export(&self, estimators: &[usize]) -> Result<Vec<EstimatorState>, WorkerFailure> {
        estimators
            .iter()
            .map(|&estimator_id| {
                let hosted = self
                    .hosted
                    .get(&estimator_id)
                    .ok_or(WorkerFailure::UnknownEstimator { estimator_id })?;

                let (model, center) = hosted
                    .fitted()
                    .ok_or(WorkerFailure::NotFitted { estimator_id })?;

                Ok(EstimatorState {
                    estimator_id,
                    spec: hosted.spec.clone(),
                    center: center.to_vec(),
                    state: model.save().map_err(rejected)?,
                })
            })
            .collect()
    }

    /// Hosts previously exported estimators, already fitted, in place of the current ones.
    ///
    /// # Returns
    /// The amount of hosted estimators.
    pub fn restore(&mut self, spec: RestoreSpec) -> Result<usize, WorkerFailure> {
        let mut restored = BTreeMap::new();
        for state in spec.estimators {
            let model = self
                .catalog
                .restore(&state.spec, state.state)
                .map_err(rejected)?;

            restored.insert(
                state.estimator_id,
                Hosted {
                    spec: state.spec,
                    rows: Vec::new(),
                    model: Some(model),
                    status: Some(FitStatus::Fitted {
                        center: state.center,
                    }),
                },
            );
        }

        self.worker_id = spec.worker_id;
        self.hosted = restored;

        info!(worker_id = self.worker_id, hosted = self.hosted.len(); "estimators restored");
        Ok(self.hosted.len())
    }
}

/// Fits `model` on `rows` and returns the rows' center.
fn fit_one(
    dataset: Option<&Dataset>,
    rows: &[usize],
    model: Option<&mut Box<dyn Regressor>>,
) -> Result<Vec<f64>, String> {
    let dataset = dataset.ok_or_else(|| WorkerFailure::NoDataset.to_string())?;
    let model = model.ok_or_else(|| "estimator was never built".to_string())?;

    let (x, y) = dataset.select(rows).map_err(|e| e.to_string())?;
    model.fit(x.view(), y.view()).map_err(|e| e.to_string())?;

    let center = dataset.center_of(rows).map_err(|e| e.to_string())?;
    Ok(center.to_vec())
}

#[cfg(test)]
mod tests {
    use comms::specs::EstimatorAssignment;
    use estimators::EstimatorErr;
    use ndarray::{Array1, Array2, array};

    use super::*;

    fn dataset() -> Dataset {
        let features = Array2::from_shape_fn((6, 1), |(i, _)| i as f64);
        let targets = Array1::from_shape_fn(6, |i| 2.0 * i as f64 + 1.0);
        Dataset::new(features, targets).unwrap()
    }

    fn assignment(estimator: EstimatorSpec, subsets: &[(usize, Vec<usize>)]) -> AssignmentSpec {
        AssignmentSpec {
            worker_id: 3,
            estimator,
            estimators: subsets
                .iter()
                .map(|(estimator_id, rows)| EstimatorAssignment {
                    estimator_id: *estimator_id,
                    rows: rows.clone(),
                    seed: 0,
                })
                .collect(),
        }
    }

    fn linear() -> EstimatorSpec {
        EstimatorSpec::Linear {
            fit_intercept: true,
        }
    }

    fn unit() -> WorkerUnit {
        let mut unit = WorkerUnit::new(Arc::new(Catalog::new()));
        unit.load_dataset(dataset());
        unit
    }

    #[test]
    fn assign_without_dataset_fails() {
        let mut unit = WorkerUnit::new(Arc::new(Catalog::new()));
        let err = unit.assign(assignment(linear(), &[(0, vec![0])])).unwrap_err();
        assert_eq!(err, WorkerFailure::NoDataset);
    }

    #[test]
    fn out_of_range_rows_are_rejected() {
        let mut unit = unit();
        let err = unit.assign(assignment(linear(), &[(0, vec![0, 6])])).unwrap_err();
        assert!(matches!(err, WorkerFailure::Rejected { .. }));
    }

    #[test]
    fn fit_reports_centers_by_estimator_id() {
        let mut unit = unit();
        let hosted = unit
            .assign(assignment(linear(), &[(4, vec![0, 1, 2]), (1, vec![5])]))
            .unwrap();
        assert_eq!(hosted, 2);

        let report = unit.fit();
        assert_eq!(report.worker_id, 3);
        assert_eq!(report.outcomes.len(), 2);

        // A single row still fits, as a constant.
        assert_eq!(report.outcomes[0].estimator_id, 1);
        assert_eq!(
            report.outcomes[0].status,
            FitStatus::Fitted { center: vec![5.0] }
        );

        assert_eq!(report.outcomes[1].estimator_id, 4);
        assert_eq!(
            report.outcomes[1].status,
            FitStatus::Fitted { center: vec![1.0] }
        );
    }

    #[test]
    fn assignments_accumulate_without_duplicates() {
        let mut unit = unit();
        assert_eq!(unit.assign(assignment(linear(), &[(0, vec![0, 1])])).unwrap(), 1);
        assert_eq!(unit.assign(assignment(linear(), &[(1, vec![2, 3])])).unwrap(), 2);

        let err = unit.assign(assignment(linear(), &[(1, vec![4])])).unwrap_err();
        assert_eq!(err, WorkerFailure::DuplicateEstimator { estimator_id: 1 });
        assert_eq!(unit.hosted(), vec![0, 1]);
    }

    #[test]
    fn fit_happens_once() {
        let mut unit = unit();
        unit.assign(assignment(linear(), &[(0, vec![0, 1, 2])]))
            .unwrap();

        let first = unit.fit();
        let second = unit.fit();
        assert_eq!(first, second);
    }

    #[test]
    fn predict_before_fit_is_refused() {
        let mut unit = unit();
        unit.assign(assignment(linear(), &[(0, vec![0, 1])])).unwrap();

        let spec = PredictSpec {
            estimators: vec![0],
            points: Points::Dataset { rows: vec![0] },
        };
        assert_eq!(
            unit.predict(&spec, None).unwrap_err(),
            WorkerFailure::NotFitted { estimator_id: 0 }
        );
    }

    #[test]
    fn predictions_follow_the_requested_order() {
        let mut unit = unit();
        unit.assign(assignment(
            EstimatorSpec::Mean,
            &[(0, vec![0, 1]), (1, vec![4, 5])],
        ))
        .unwrap();
        unit.fit();

        let points = array![[0.0], [9.0]];
        let spec = PredictSpec {
            estimators: vec![1, 0],
            points: Points::Inline { nrows: 2, ncols: 1 },
        };

        let got = unit.predict(&spec, Some(points.view())).unwrap();
        assert_eq!(got, vec![10.0, 10.0, 2.0, 2.0]);
    }

    #[test]
    fn dataset_rows_and_inline_points_agree() {
        let mut unit = unit();
        unit.assign(assignment(linear(), &[(0, vec![0, 1, 2, 3])])).unwrap();
        unit.fit();

        let by_rows = PredictSpec {
            estimators: vec![0],
            points: Points::Dataset { rows: vec![5, 2] },
        };
        let inline = PredictSpec {
            estimators: vec![0],
            points: Points::Inline { nrows: 2, ncols: 1 },
        };
        let points = array![[5.0], [2.0]];

        let got = unit.predict(&by_rows, None).unwrap();
        assert_eq!(got.len(), 2);
        assert!((got[0] - 11.0).abs() < 1e-9);
        assert!((got[1] - 5.0).abs() < 1e-9);
        assert_eq!(got, unit.predict(&inline, Some(points.view())).unwrap());
    }

    #[test]
    fn empty_query_yields_nothing() {
        let mut unit = unit();
        unit.assign(assignment(linear(), &[(0, vec![0, 1, 2])])).unwrap();
        unit.fit();

        let spec = PredictSpec {
            estimators: vec![0],
            points: Points::Dataset { rows: vec![] },
        };
        assert!(unit.predict(&spec, None).unwrap().is_empty());
    }

    #[test]
    fn unbuildable_estimator_fails_its_fit() {
        let mut unit = unit();
        let spec = EstimatorSpec::Custom {
            name: "missing".into(),
            params: serde_json::Value::Null,
        };
        unit.assign(assignment(spec, &[(0, vec![0, 1])])).unwrap();

        let report = unit.fit();
        let FitStatus::Failed { cause } = &report.outcomes[0].status else {
            panic!("expected a failure, got {:?}", report.outcomes[0].status);
        };
        assert_eq!(cause, &EstimatorErr::UnknownEstimator("missing".into()).to_string());
    }

    #[test]
    fn exported_estimators_can_be_restored_elsewhere() {
        let mut unit = unit();
        unit.assign(assignment(linear(), &[(7, vec![0, 2, 4])])).unwrap();
        unit.fit();
        let states = unit.export(&[7]).unwrap();

        let mut other = WorkerUnit::new(Arc::new(Catalog::new()));
        let spec = RestoreSpec {
            worker_id: 1,
            estimators: states,
        };
        assert_eq!(other.restore(spec).unwrap(), 1);

        let points = array![[10.0]];
        let spec = PredictSpec {
            estimators: vec![7],
            points: Points::Inline { nrows: 1, ncols: 1 },
        };
        let got = other.predict(&spec, Some(points.view())).unwrap();
        assert!((got[0] - 21.0).abs() < 1e-9);
    }
}
