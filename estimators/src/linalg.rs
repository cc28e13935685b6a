use linfa_linalg::svd::SVD;
use ndarray::{Array1, ArrayView1, ArrayView2};

use crate::{EstimatorErr, Result};

/// Minimizes `|x β - y|² + α |β|²` through the SVD of `x`.
///
/// Singular values below `max(σ) * ε * max(n, p)` count as zero, as in LAPACK's
/// `gelsd`, so a rank deficient `x` yields the minimum norm solution.
///
/// # Errors
/// `EstimatorErr::Solver` if the decomposition fails or the solution isn't finite.
pub(crate) fn least_squares(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    alpha: f64,
) -> Result<Array1<f64>> {
    if x.nrows() != y.len() {
        return Err(EstimatorErr::SizeMismatch {
            a: "x rows",
            b: "y",
            got: y.len(),
            expected: x.nrows(),
        });
    }

    let (u, sigma, vt) = x
        .svd(true, true)
        .map_err(|e| EstimatorErr::Solver(e.to_string()))?;
    let (Some(u), Some(vt)) = (u, vt) else {
        return Err(EstimatorErr::Solver("the decomposition has no singular vectors".into()));
    };

    let largest = sigma.iter().fold(0.0_f64, |m, s| m.max(s.abs()));
    let cutoff = largest * f64::EPSILON * x.nrows().max(x.ncols()) as f64;

    let projected = u.t().dot(&y);
    let scaled: Array1<f64> = sigma
        .iter()
        .zip(&projected)
        .map(|(&s, &b)| match s.abs() > cutoff {
            true => s * b / (s * s + alpha),
            false => 0.0,
        })
        .collect();

    let beta = vt.t().dot(&scaled);
    if beta.iter().any(|v| !v.is_finite()) {
        return Err(EstimatorErr::Solver("the solution is not finite".into()));
    }

    Ok(beta)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn assert_close(got: &Array1<f64>, expected: &[f64]) {
        assert_eq!(got.len(), expected.len());
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() < 1e-9, "got {got}, expected {expected:?}");
        }
    }

    #[test]
    fn full_rank_is_the_exact_solution() {
        let x = array![[0.0, 2.0], [3.0, 1.0], [1.0, 1.0]];
        let y = array![4.0, 5.0, 3.0];
        let beta = least_squares(x.view(), y.view(), 0.0).unwrap();
        assert_close(&beta, &[1.0, 2.0]);
    }

    #[test]
    fn rank_deficient_takes_the_minimum_norm() {
        let x = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let y = array![1.0, 2.0, 3.0];
        let beta = least_squares(x.view(), y.view(), 0.0).unwrap();
        assert_close(&beta, &[0.5, 0.5]);
    }

    #[test]
    fn zero_matrix_gives_zero_coefficients() {
        let x = array![[0.0], [0.0]];
        let y = array![1.0, 3.0];
        let beta = least_squares(x.view(), y.view(), 0.0).unwrap();
        assert_close(&beta, &[0.0]);
    }

    #[test]
    fn wide_systems_are_solved() {
        let x = array![[1.0, 0.0, 1.0]];
        let y = array![2.0];
        let beta = least_squares(x.view(), y.view(), 0.0).unwrap();
        assert_close(&beta, &[1.0, 0.0, 1.0]);
    }

    #[test]
    fn alpha_shrinks_towards_zero() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![2.0, 4.0, 6.0];
        let beta = least_squares(x.view(), y.view(), 1.0).unwrap();
        assert_close(&beta, &[28.0 / 15.0]);
    }
}
