use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::{EstimatorErr, Regressor, Result, regressor::check_xy};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Fitted {
    mean: f64,
}

/// Predicts the mean of the targets it was fitted on, whatever the input.
#[derive(Debug, Clone, Default)]
pub struct MeanRegressor {
    fitted: Option<Fitted>,
}

impl MeanRegressor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Regressor for MeanRegressor {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        check_xy(&x, &y)?;
        let mean = y.mean().ok_or(EstimatorErr::EmptyInput)?;
        self.fitted = Some(Fitted { mean });
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        let Fitted { mean } = self.fitted.ok_or(EstimatorErr::NotFitted)?;
        Ok(Array1::from_elem(x.nrows(), mean))
    }

    fn save(&self) -> Result<serde_json::Value> {
        let fitted = self.fitted.ok_or(EstimatorErr::NotFitted)?;
        Ok(serde_json::to_value(fitted)?)
    }

    fn load(&mut self, state: serde_json::Value) -> Result<()> {
        self.fitted = Some(serde_json::from_value(state)?);
        Ok(())
    }
}
