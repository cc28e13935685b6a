use std::{fs, path::Path, time::Duration};

use comms::specs::EstimatorSpec;
use serde::{Deserialize, Serialize};

use crate::{LessError, Result, placement::Placement};

/// How many rows each local estimator trains on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsetSize {
    /// `ceil(fraction * N)` rows, `fraction` in (0, 1].
    Fraction(f64),
    /// A fixed amount of rows.
    Count(usize),
}

impl SubsetSize {
    /// The amount of rows out of `nrows`, clamped to `[1, nrows]`.
    pub fn resolve(&self, nrows: usize) -> usize {
        let size = match *self {
            Self::Fraction(fraction) => (fraction * nrows as f64).ceil() as usize,
            Self::Count(count) => count,
        };

        size.clamp(1, nrows.max(1))
    }
}

/// The subset construction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SamplerConfig {
    /// Random subsets.
    Uniform,
    /// The rows nearest to randomly drawn anchors.
    Neighbors,
    /// The clusters of a seeded k-means.
    Clustering {
        #[serde(default = "default_max_iters")]
        max_iters: usize,
    },
    /// Every subset mixes rows from every target quantile.
    Stratified {
        #[serde(default = "default_strata")]
        strata: usize,
    },
}

fn default_max_iters() -> usize {
    100
}

fn default_strata() -> usize {
    10
}

/// How local predictions are weighted before stacking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Weighting {
    /// Raw predictions.
    None,
    /// `exp(-coeff * ||x - center||)`, `coeff` defaults to `1 / K²`.
    Rbf {
        #[serde(default)]
        coeff: Option<f64>,
        #[serde(default = "default_normalize")]
        normalize: bool,
    },
}

fn default_normalize() -> bool {
    true
}

impl Default for Weighting {
    fn default() -> Self {
        Self::Rbf {
            coeff: None,
            normalize: true,
        }
    }
}

/// What to do with local estimators that fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailurePolicy {
    /// Drop their columns, unless fewer than `min_survivors` remain.
    Exclude { min_survivors: usize },
    /// Fail the whole training.
    Abort,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Exclude { min_survivors: 1 }
    }
}

/// Parameters of a LESS training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LessConfig {
    /// Amount of local estimators per replication.
    pub k: usize,
    pub subset_size: SubsetSize,
    pub sampler: SamplerConfig,
    pub local: EstimatorSpec,
    pub global: EstimatorSpec,
    pub weighting: Weighting,
    /// Fraction of rows held out to fit the global estimator on.
    pub validation: Option<f64>,
    pub replications: usize,
    pub failure: FailurePolicy,
    pub placement: Placement,
    /// Deadline for every exchange with the workers.
    pub timeout_ms: u64,
    pub seed: u64,
}

impl Default for LessConfig {
    fn default() -> Self {
        Self {
            k: 8,
            subset_size: SubsetSize::Fraction(0.2),
            sampler: SamplerConfig::Neighbors,
            local: EstimatorSpec::Linear {
                fit_intercept: true,
            },
            global: EstimatorSpec::Ridge {
                alpha: 1e-3,
                fit_intercept: true,
            },
            weighting: Weighting::default(),
            validation: None,
            replications: 1,
            failure: FailurePolicy::default(),
            placement: Placement::default(),
            timeout_ms: 30_000,
            seed: 0,
        }
    }
}

fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(LessError::Configuration(msg.into()))
}

impl LessConfig {
    /// Reads a configuration from a JSON file, missing fields take their defaults.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| LessError::Configuration(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The amount of rows held out for the global estimator out of `nrows`.
    pub fn validation_rows(&self, nrows: usize) -> usize {
        self.validation
            .map(|fraction| (fraction * nrows as f64).ceil() as usize)
            .unwrap_or(0)
    }

    /// Checks the configuration against a dataset of `nrows` rows.
    ///
    /// # Errors
    /// `LessError::Configuration` describing the first invalid parameter.
    pub fn validate(&self, nrows: usize) -> Result<()> {
        if nrows == 0 {
            return invalid("the dataset has no rows");
        }

        if self.k == 0 {
            return invalid("k must be at least 1");
        }

        match self.subset_size {
            SubsetSize::Fraction(f) if !(f > 0.0 && f <= 1.0) => {
                return invalid(format!("subset fraction must lie in (0, 1], got {f}"));
            }
            SubsetSize::Count(0) => return invalid("subset count must be at least 1"),
            _ => {}
        }

        if let Some(fraction) = self.validation {
            if !(fraction > 0.0 && fraction < 1.0) {
                return invalid(format!("validation fraction must lie in (0, 1), got {fraction}"));
            }

            let held_out = self.validation_rows(nrows);
            if held_out >= nrows {
                return invalid(format!(
                    "holding out {held_out} of {nrows} rows leaves nothing to train on"
                ));
            }
        }

        if self.replications == 0 {
            return invalid("replications must be at least 1");
        }

        if let FailurePolicy::Exclude { min_survivors } = self.failure {
            if min_survivors == 0 || min_survivors > self.k {
                return invalid(format!(
                    "min_survivors must lie in [1, k = {}], got {min_survivors}",
                    self.k
                ));
            }
        }

        if self.timeout_ms == 0 {
            return invalid("timeout_ms must be positive");
        }

        if let Weighting::Rbf {
            coeff: Some(coeff), ..
        } = self.weighting
        {
            if !(coeff.is_finite() && coeff > 0.0) {
                return invalid(format!("rbf coeff must be positive, got {coeff}"));
            }
        }

        match self.sampler {
            SamplerConfig::Clustering { max_iters: 0 } => {
                invalid("clustering needs at least one iteration")
            }
            SamplerConfig::Stratified { strata: 0 } => invalid("stratified needs at least one stratum"),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_rounds_up_and_clamps() {
        assert_eq!(SubsetSize::Fraction(0.05).resolve(100), 5);
        assert_eq!(SubsetSize::Fraction(0.051).resolve(100), 6);
        assert_eq!(SubsetSize::Count(500).resolve(100), 100);
    }

    #[test]
    fn defaults_are_valid() {
        LessConfig::default().validate(10).unwrap();
    }

    #[test]
    fn zero_k_is_rejected() {
        let config = LessConfig {
            k: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(10), Err(LessError::Configuration(_))));
    }

    #[test]
    fn subset_size_above_rows_is_valid() {
        let config = LessConfig {
            subset_size: SubsetSize::Count(1000),
            ..Default::default()
        };
        config.validate(10).unwrap();
    }

    #[test]
    fn validation_must_leave_training_rows() {
        let config = LessConfig {
            validation: Some(0.5),
            ..Default::default()
        };
        assert!(config.validate(1).is_err());
        config.validate(2).unwrap();
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config: LessConfig = serde_json::from_str(
            r#"{
                "k": 3,
                "subset_size": { "count": 20 },
                "sampler": { "kind": "clustering" },
                "failure": { "kind": "exclude", "min_survivors": 2 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.k, 3);
        assert_eq!(config.subset_size, SubsetSize::Count(20));
        assert_eq!(config.sampler, SamplerConfig::Clustering { max_iters: 100 });
        assert_eq!(config.failure, FailurePolicy::Exclude { min_survivors: 2 });
        assert_eq!(config.replications, 1);
    }
}
