use std::{env, sync::Arc};

use anyhow::{Context, bail};
use coordinator::{LessConfig, Session};
use estimators::Catalog;
use log::info;
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng, rngs::StdRng};

const NROWS: usize = 1000;
const NFEATURES: usize = 2;

/// `y = sin(x0) + 0.5 * x1` plus a little noise, `x` uniform in `[-3, 3]²`.
fn synthetic(rng: &mut StdRng, nrows: usize) -> (Array2<f64>, Array1<f64>) {
    let features = Array2::from_shape_fn((nrows, NFEATURES), |_| rng.random_range(-3.0_f64..3.0));
    let targets = features
        .rows()
        .into_iter()
        .map(|x| x[0].sin() + 0.5 * x[1] + rng.random_range(-0.05_f64..0.05))
        .collect();

    (features, targets)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let addrs: Vec<String> = env::var("WORKER_ADDRS")
        .context("WORKER_ADDRS must list the workers, comma separated")?
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(String::from)
        .collect();

    if addrs.is_empty() {
        bail!("WORKER_ADDRS holds no address");
    }

    let config = match env::var("LESS_CONFIG") {
        Ok(path) => LessConfig::from_json_path(&path)
            .with_context(|| format!("reading the config at {path}"))?,
        Err(_) => LessConfig::default(),
    };

    let mut rng = StdRng::seed_from_u64(config.seed);
    let (features, targets) = synthetic(&mut rng, NROWS);
    let (points, truth) = synthetic(&mut rng, 10);

    info!("connecting to {} worker(s)", addrs.len());
    let mut session = Session::connect(addrs, Arc::new(Catalog::new()))?;

    let model = session.fit(features.view(), targets.view(), &config)?;
    let survivors = model.survivors().count();
    info!(survivors = survivors; "model trained");

    let predictions = session.predict(points.view())?;
    for (prediction, truth) in predictions.iter().zip(&truth) {
        info!("predicted {prediction:.4}, expected {truth:.4}");
    }

    let mse = (&predictions - &truth).mapv(|e| e * e).mean().unwrap_or(0.0);
    info!("mean squared error {mse:.6}");

    session.shutdown();
    Ok(())
}
