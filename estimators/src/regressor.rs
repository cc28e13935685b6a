use ndarray::{Array1, ArrayView1, ArrayView2};

use crate::Result;

/// A fit/predict capable regression model.
///
/// Local and global estimators are both regressors; they only differ in the
/// dimensionality of what they are fitted on.
pub trait Regressor: Send {
    /// Fits the model on `x` (one sample per row) against `y`.
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()>;

    /// Predicts one value per row of `x`.
    ///
    /// # Errors
    /// `EstimatorErr::NotFitted` if called before a successful `fit`.
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>>;

    /// Exports the fitted state.
    fn save(&self) -> Result<serde_json::Value>;

    /// Replaces the model's state with one previously produced by `save`.
    fn load(&mut self, state: serde_json::Value) -> Result<()>;
}

impl<R: Regressor + ?Sized> Regressor for Box<R> {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        (**self).fit(x, y)
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        (**self).predict(x)
    }

    fn save(&self) -> Result<serde_json::Value> {
        (**self).save()
    }

    fn load(&mut self, state: serde_json::Value) -> Result<()> {
        (**self).load(state)
    }
}

/// Checks that `x` and `y` describe the same, non empty, set of samples.
pub(crate) fn check_xy(x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(crate::EstimatorErr::SizeMismatch {
            a: "x rows",
            b: "y",
            got: y.len(),
            expected: x.nrows(),
        });
    }

    if x.nrows() == 0 {
        return Err(crate::EstimatorErr::EmptyInput);
    }

    Ok(())
}
