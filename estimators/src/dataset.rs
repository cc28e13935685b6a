use std::borrow::Cow;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::{EstimatorErr, Result};

/// A feature matrix with one target per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    features: Array2<f64>,
    targets: Array1<f64>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Errors
    /// `EstimatorErr::SizeMismatch` if the amount of rows and targets differ.
    pub fn new(features: Array2<f64>, targets: Array1<f64>) -> Result<Self> {
        if features.nrows() != targets.len() {
            return Err(EstimatorErr::SizeMismatch {
                a: "feature rows",
                b: "targets",
                got: targets.len(),
                expected: features.nrows(),
            });
        }

        Ok(Self { features, targets })
    }

    /// Creates a `Dataset` out of row-major features.
    ///
    /// # Arguments
    /// * `features` - `targets.len() * nfeatures` values, row by row.
    /// * `nfeatures` - The amount of columns.
    /// * `targets` - One value per row.
    pub fn from_flat(features: Vec<f64>, nfeatures: usize, targets: Vec<f64>) -> Result<Self> {
        let nrows = targets.len();
        if features.len() != nrows * nfeatures {
            return Err(EstimatorErr::SizeMismatch {
                a: "feature values",
                b: "rows * columns",
                got: features.len(),
                expected: nrows * nfeatures,
            });
        }

        let features = Array2::from_shape_vec((nrows, nfeatures), features).map_err(|e| {
            EstimatorErr::InvalidParams(format!("features do not form a matrix: {e}"))
        })?;

        Self::new(features, Array1::from(targets))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn nfeatures(&self) -> usize {
        self.features.ncols()
    }

    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    pub fn targets(&self) -> ArrayView1<'_, f64> {
        self.targets.view()
    }

    /// The features as a row-major slice, copied only if the matrix isn't contiguous.
    pub fn flat_features(&self) -> Cow<'_, [f64]> {
        match self.features.as_slice() {
            Some(values) => Cow::Borrowed(values),
            None => Cow::Owned(self.features.iter().copied().collect()),
        }
    }

    /// Checks that every index in `rows` addresses a row of the dataset.
    pub fn check_rows(&self, rows: &[usize]) -> Result<()> {
        let len = self.len();
        match rows.iter().find(|&&row| row >= len) {
            Some(&index) => Err(EstimatorErr::OutOfRange { index, len }),
            None => Ok(()),
        }
    }

    /// Copies out the given rows, in the given order.
    ///
    /// # Errors
    /// `EstimatorErr::OutOfRange` if any index is past the last row.
    pub fn select(&self, rows: &[usize]) -> Result<(Array2<f64>, Array1<f64>)> {
        self.check_rows(rows)?;
        Ok((
            self.features.select(Axis(0), rows),
            self.targets.select(Axis(0), rows),
        ))
    }

    /// Copies out the features of the given rows.
    pub fn select_features(&self, rows: &[usize]) -> Result<Array2<f64>> {
        self.check_rows(rows)?;
        Ok(self.features.select(Axis(0), rows))
    }

    /// The mean feature vector of the given rows.
    ///
    /// # Errors
    /// `EstimatorErr::EmptyInput` if `rows` is empty.
    pub fn center_of(&self, rows: &[usize]) -> Result<Array1<f64>> {
        self.select_features(rows)?
            .mean_axis(Axis(0))
            .ok_or(EstimatorErr::EmptyInput)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn dataset() -> Dataset {
        Dataset::from_flat(
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            2,
            vec![10.0, 20.0, 30.0],
        )
        .unwrap()
    }

    #[test]
    fn mismatched_targets_are_rejected() {
        let err = Dataset::new(Array2::zeros((3, 2)), Array1::zeros(4)).unwrap_err();
        assert!(matches!(
            err,
            EstimatorErr::SizeMismatch {
                got: 4,
                expected: 3,
                ..
            }
        ));
    }

    #[test]
    fn select_keeps_the_requested_order() {
        let (x, y) = dataset().select(&[2, 0]).unwrap();
        assert_eq!(x, array![[4.0, 5.0], [0.0, 1.0]]);
        assert_eq!(y, array![30.0, 10.0]);
    }

    #[test]
    fn out_of_range_rows_are_rejected() {
        let err = dataset().select(&[0, 3]).unwrap_err();
        assert!(matches!(err, EstimatorErr::OutOfRange { index: 3, len: 3 }));
    }

    #[test]
    fn center_is_the_row_mean() {
        let center = dataset().center_of(&[0, 1, 2]).unwrap();
        assert_eq!(center, array![2.0, 3.0]);
    }
}
