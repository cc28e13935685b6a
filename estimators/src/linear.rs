use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::{EstimatorErr, Regressor, Result, linalg, regressor::check_xy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Fitted {
    coef: Vec<f64>,
    intercept: f64,
}

/// Least squares linear regression, optionally with an L2 (ridge) penalty.
///
/// Works on centered data when an intercept is fitted, so the intercept itself
/// is never penalized. Rank deficient subsets get the minimum norm fit.
#[derive(Debug, Clone)]
pub struct LinearRegression {
    alpha: f64,
    fit_intercept: bool,
    fitted: Option<Fitted>,
}

impl LinearRegression {
    /// Creates an ordinary least squares model.
    pub fn new(fit_intercept: bool) -> Self {
        Self {
            alpha: 0.0,
            fit_intercept,
            fitted: None,
        }
    }

    /// Creates a ridge model.
    ///
    /// # Errors
    /// `EstimatorErr::InvalidParams` if `alpha` is negative or not finite.
    pub fn ridge(alpha: f64, fit_intercept: bool) -> Result<Self> {
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(EstimatorErr::InvalidParams(format!(
                "ridge alpha must be a finite non negative number, got {alpha}"
            )));
        }

        Ok(Self {
            alpha,
            ..Self::new(fit_intercept)
        })
    }

    /// The fitted coefficients and intercept, if any.
    pub fn coefficients(&self) -> Option<(&[f64], f64)> {
        self.fitted
            .as_ref()
            .map(|fitted| (fitted.coef.as_slice(), fitted.intercept))
    }
}

impl Regressor for LinearRegression {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        check_xy(&x, &y)?;
        let nfeatures = x.ncols();

        let (x_mean, y_mean) = if self.fit_intercept {
            let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(nfeatures));
            let y_mean = y.mean().unwrap_or(0.0);
            (x_mean, y_mean)
        } else {
            (Array1::zeros(nfeatures), 0.0)
        };

        if nfeatures == 0 {
            self.fitted = Some(Fitted {
                coef: Vec::new(),
                intercept: y_mean,
            });
            return Ok(());
        }

        let xc = &x - &x_mean;
        let yc = &y - y_mean;

        let coef = linalg::least_squares(xc.view(), yc.view(), self.alpha)?;
        let intercept = y_mean - x_mean.dot(&coef);

        self.fitted = Some(Fitted {
            coef: coef.to_vec(),
            intercept,
        });

        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        let fitted = self.fitted.as_ref().ok_or(EstimatorErr::NotFitted)?;

        if x.ncols() != fitted.coef.len() {
            return Err(EstimatorErr::SizeMismatch {
                a: "x columns",
                b: "coefficients",
                got: x.ncols(),
                expected: fitted.coef.len(),
            });
        }

        let coef = ArrayView1::from(fitted.coef.as_slice());
        Ok(x.dot(&coef) + fitted.intercept)
    }

    fn save(&self) -> Result<serde_json::Value> {
        let fitted = self.fitted.as_ref().ok_or(EstimatorErr::NotFitted)?;
        Ok(serde_json::to_value(fitted)?)
    }

    fn load(&mut self, state: serde_json::Value) -> Result<()> {
        self.fitted = Some(serde_json::from_value(state)?);
        Ok(())
    }
}
