use std::{collections::HashMap, fmt};

use comms::specs::EstimatorSpec;
use log::debug;
use serde_json::Value;

use crate::{EstimatorErr, LinearRegression, MeanRegressor, Regressor, Result};

type Builder = Box<dyn Fn(&Value, u64) -> Result<Box<dyn Regressor>> + Send + Sync>;

/// Maps estimator specifications onto fresh regressors.
///
/// The built-in kinds are always available; anything else has to be
/// registered under the name used by `EstimatorSpec::Custom`.
#[derive(Default)]
pub struct Catalog {
    custom: HashMap<String, Builder>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.custom.keys().collect();
        names.sort();
        f.debug_struct("Catalog").field("custom", &names).finish()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom estimator builder.
    ///
    /// # Arguments
    /// * `name` - The name used by `EstimatorSpec::Custom`, replaces any previous builder.
    /// * `builder` - Receives the spec's `params` and the seed for the estimator.
    pub fn register<F>(&mut self, name: impl Into<String>, builder: F)
    where
        F: Fn(&Value, u64) -> Result<Box<dyn Regressor>> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(estimator = name.as_str(); "registering custom estimator");
        self.custom.insert(name, Box::new(builder));
    }

    /// Returns true if `spec` can be built by this catalog.
    pub fn knows(&self, spec: &EstimatorSpec) -> bool {
        match spec {
            EstimatorSpec::Custom { name, .. } => self.custom.contains_key(name),
            _ => true,
        }
    }

    /// Builds an unfitted regressor.
    ///
    /// # Arguments
    /// * `spec` - What to build.
    /// * `seed` - Passed to custom builders; the built-in kinds are deterministic.
    ///
    /// # Errors
    /// `EstimatorErr::UnknownEstimator` for unregistered custom names, or
    /// `EstimatorErr::InvalidParams` if the parameters are rejected.
    pub fn build(&self, spec: &EstimatorSpec, seed: u64) -> Result<Box<dyn Regressor>> {
        match spec {
            EstimatorSpec::Linear { fit_intercept } => {
                Ok(Box::new(LinearRegression::new(*fit_intercept)))
            }
            EstimatorSpec::Ridge {
                alpha,
                fit_intercept,
            } => Ok(Box::new(LinearRegression::ridge(*alpha, *fit_intercept)?)),
            EstimatorSpec::Mean => Ok(Box::new(MeanRegressor::new())),
            EstimatorSpec::Custom { name, params } => {
                let builder = self
                    .custom
                    .get(name)
                    .ok_or_else(|| EstimatorErr::UnknownEstimator(name.clone()))?;

                builder(params, seed)
            }
        }
    }

    /// Builds a regressor and loads a previously saved state into it.
    pub fn restore(&self, spec: &EstimatorSpec, state: Value) -> Result<Box<dyn Regressor>> {
        let mut regressor = self.build(spec, 0)?;
        regressor.load(state)?;
        Ok(regressor)
    }
}
