//! Turns local predictions into the global estimator's inputs and outputs.

use estimators::{Regressor, distance};
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::{Result, config::Weighting};

/// The weight of every local estimator at every point.
///
/// # Arguments
/// * `points` - The points predicted on.
/// * `centers` - One center per column, the mean of its training subset.
/// * `weighting` - The weighting scheme.
/// * `nsubsets` - The amount of subsets built, failed ones included.
///
/// # Returns
/// A `points.nrows() x centers.nrows()` matrix. With a single subset the rows
/// are always normalized, so the combination is a weighted average.
pub(crate) fn weights(
    points: ArrayView2<f64>,
    centers: ArrayView2<f64>,
    weighting: Weighting,
    nsubsets: usize,
) -> Array2<f64> {
    let shape = (points.nrows(), centers.nrows());
    let single = nsubsets == 1;

    let (mut weights, normalize) = match weighting {
        Weighting::None => (Array2::ones(shape), single),
        Weighting::Rbf { coeff, normalize } => {
            let coeff = coeff.unwrap_or_else(|| distance::default_coeff(nsubsets));
            let mut weights = Array2::zeros(shape);
            for (mut column, center) in weights.columns_mut().into_iter().zip(centers.rows()) {
                column.assign(&distance::rbf(points, center, coeff));
            }
            (weights, normalize || single)
        }
    };

    if normalize {
        distance::normalize_rows(&mut weights);
    }

    weights
}

/// The stacked design matrix, every local prediction scaled by its weight.
pub(crate) fn design(
    points: ArrayView2<f64>,
    predictions: ArrayView2<f64>,
    centers: ArrayView2<f64>,
    weighting: Weighting,
    nsubsets: usize,
) -> Array2<f64> {
    weights(points, centers, weighting, nsubsets) * &predictions
}

/// Maps a design matrix to final predictions.
///
/// Without a global estimator the weighted predictions are summed.
pub(crate) fn combine(design: ArrayView2<f64>, global: Option<&dyn Regressor>) -> Result<Array1<f64>> {
    match global {
        Some(global) => Ok(global.predict(design)?),
        None => Ok(design.sum_axis(Axis(1))),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn single_subset_is_a_plain_average() {
        let points = array![[0.0], [5.0]];
        let centers = array![[1.0]];
        let predictions = array![[3.0], [7.0]];

        let design = design(
            points.view(),
            predictions.view(),
            centers.view(),
            Weighting::None,
            1,
        );
        assert_eq!(combine(design.view(), None).unwrap(), array![3.0, 7.0]);
    }

    #[test]
    fn rbf_weights_favor_the_nearest_center() {
        let points = array![[0.0], [10.0]];
        let centers = array![[0.0], [10.0]];
        let w = weights(
            points.view(),
            centers.view(),
            Weighting::Rbf {
                coeff: Some(1.0),
                normalize: true,
            },
            2,
        );

        assert!(w[[0, 0]] > 0.99 && w[[1, 1]] > 0.99);
        assert!((w.row(0).sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unnormalized_weights_are_raw_kernel_values() {
        let points = array![[3.0]];
        let centers = array![[0.0], [1.0]];
        let w = weights(
            points.view(),
            centers.view(),
            Weighting::Rbf {
                coeff: Some(0.5),
                normalize: false,
            },
            2,
        );

        assert!((w[[0, 0]] - (-1.5f64).exp()).abs() < 1e-12);
        assert!((w[[0, 1]] - (-1.0f64).exp()).abs() < 1e-12);
    }
}
