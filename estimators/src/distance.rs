//! Distance based weighting of local predictions.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// The default RBF coefficient for `n_subsets` local estimators, `1 / n²`.
pub fn default_coeff(n_subsets: usize) -> f64 {
    let n = n_subsets.max(1) as f64;
    1.0 / (n * n)
}

/// Euclidean distance from every row of `points` to `center`.
pub fn euclidean(points: ArrayView2<f64>, center: ArrayView1<f64>) -> Array1<f64> {
    points.map_axis(Axis(1), |row| {
        row.iter()
            .zip(center.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    })
}

/// Radial basis weights `exp(-coeff * ||x - center||)`, one per row of `points`.
pub fn rbf(points: ArrayView2<f64>, center: ArrayView1<f64>, coeff: f64) -> Array1<f64> {
    euclidean(points, center).mapv(|d| (-coeff * d).exp())
}

/// Scales every row of `weights` to sum to one.
///
/// A row whose weights sum to zero, or to something not finite, is replaced by
/// uniform weights.
pub fn normalize_rows(weights: &mut Array2<f64>) {
    let ncols = weights.ncols();
    if ncols == 0 {
        return;
    }

    for mut row in weights.rows_mut() {
        let total: f64 = row.sum();
        if total > 0.0 && total.is_finite() {
            row.mapv_inplace(|w| w / total);
        } else {
            row.fill(1.0 / ncols as f64);
        }
    }
}
