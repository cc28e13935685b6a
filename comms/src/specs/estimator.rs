use serde::{Deserialize, Serialize};

/// Selects the regression algorithm behind a local or global estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EstimatorSpec {
    /// Ordinary least squares.
    Linear {
        #[serde(default = "default_true")]
        fit_intercept: bool,
    },
    /// Least squares with an L2 penalty on the coefficients.
    Ridge {
        alpha: f64,
        #[serde(default = "default_true")]
        fit_intercept: bool,
    },
    /// Always predicts the mean of the training targets.
    Mean,
    /// An estimator registered by name in the workers' catalog.
    Custom {
        name: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

fn default_true() -> bool {
    true
}

impl EstimatorSpec {
    /// A short name used in logs.
    pub fn name(&self) -> &str {
        match self {
            Self::Linear { .. } => "linear",
            Self::Ridge { .. } => "ridge",
            Self::Mean => "mean",
            Self::Custom { name, .. } => name,
        }
    }
}

/// The exported, fitted state of a local estimator.
///
/// `state` is opaque to everyone but the estimator that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorState {
    pub estimator_id: usize,
    pub spec: EstimatorSpec,
    pub center: Vec<f64>,
    pub state: serde_json::Value,
}
