use ndarray::{Array2, ArrayView2, Axis};

/// Local predictions, one row per gather target row and one column per local estimator.
///
/// Every cell starts as NaN and a column is only usable once filled.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionMatrix {
    values: Array2<f64>,
    filled: Vec<bool>,
}

impl PredictionMatrix {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            values: Array2::from_elem((nrows, ncols), f64::NAN),
            filled: vec![false; ncols],
        }
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    /// Stores the predictions of the estimator in column `col`.
    ///
    /// # Panics
    /// If `col` is out of range or `values` is not `nrows` long.
    pub fn fill_column(&mut self, col: usize, values: &[f64]) {
        assert_eq!(values.len(), self.nrows(), "column {col} has the wrong length");

        self.values
            .column_mut(col)
            .iter_mut()
            .zip(values)
            .for_each(|(cell, v)| *cell = *v);
        self.filled[col] = true;
    }

    pub fn is_filled(&self, col: usize) -> bool {
        self.filled.get(col).copied().unwrap_or(false)
    }

    /// The filled columns, ascending.
    pub fn filled_columns(&self) -> Vec<usize> {
        (0..self.ncols()).filter(|&c| self.filled[c]).collect()
    }

    /// Copies out the given columns, in the given order.
    pub fn columns(&self, cols: &[usize]) -> Array2<f64> {
        self.values.select(Axis(1), cols)
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }
}
