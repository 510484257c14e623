use super::DataError;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Evolving evaluation record of the optimization run.
///
/// Inputs and outputs are stored column-wise: `x` is `n x k` and `y` is
/// `m x k`, one column per evaluated point. Both matrices always carry the
/// same number of columns and at least one observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    x: DMatrix<f64>,
    y: DMatrix<f64>,
}

impl Dataset {
    pub fn new(x: DMatrix<f64>, y: DMatrix<f64>) -> Result<Self, DataError> {
        if x.ncols() != y.ncols() {
            return Err(DataError::ColumnMismatch {
                x_cols: x.ncols(),
                y_cols: y.ncols(),
            });
        }
        if x.ncols() == 0 {
            return Err(DataError::Empty);
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFinite("inputs"));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFinite("outputs"));
        }
        Ok(Self { x, y })
    }

    /// Dataset holding a single observation.
    pub fn single(x: DVector<f64>, y: DVector<f64>) -> Result<Self, DataError> {
        Self::new(
            DMatrix::from_column_slice(x.len(), 1, x.as_slice()),
            DMatrix::from_column_slice(y.len(), 1, y.as_slice()),
        )
    }

    pub fn n_inputs(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_outputs(&self) -> usize {
        self.y.nrows()
    }

    /// Number of observations (columns).
    pub fn len(&self) -> usize {
        self.x.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.x.ncols() == 0
    }

    pub fn inputs(&self) -> &DMatrix<f64> {
        &self.x
    }

    pub fn outputs(&self) -> &DMatrix<f64> {
        &self.y
    }

    pub fn input(&self, i: usize) -> DVector<f64> {
        self.x.column(i).into_owned()
    }

    pub fn output(&self, i: usize) -> DVector<f64> {
        self.y.column(i).into_owned()
    }

    /// Append one evaluated point, keeping the column invariant.
    pub fn push(&mut self, x: &DVector<f64>, y: &DVector<f64>) -> Result<(), DataError> {
        if x.len() != self.n_inputs() {
            return Err(DataError::DimensionMismatch {
                expected: self.n_inputs(),
                got: x.len(),
            });
        }
        if y.len() != self.n_outputs() {
            return Err(DataError::DimensionMismatch {
                expected: self.n_outputs(),
                got: y.len(),
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFinite("inputs"));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFinite("outputs"));
        }
        let k = self.len();
        self.x = self.x.clone().insert_column(k, 0.0);
        self.y = self.y.clone().insert_column(k, 0.0);
        self.x.set_column(k, x);
        self.y.set_column(k, y);
        Ok(())
    }

    /// Keep only the columns whose index satisfies `keep`, preserving the
    /// relative order of survivors. Returns `None` when nothing survives.
    pub fn retain_columns(&self, keep: &[bool]) -> Option<Self> {
        debug_assert_eq!(keep.len(), self.len());
        let survivors: Vec<usize> = (0..self.len()).filter(|&i| keep[i]).collect();
        if survivors.is_empty() {
            return None;
        }
        let mut x = DMatrix::zeros(self.n_inputs(), survivors.len());
        let mut y = DMatrix::zeros(self.n_outputs(), survivors.len());
        for (j, &i) in survivors.iter().enumerate() {
            x.set_column(j, &self.x.column(i));
            y.set_column(j, &self.y.column(i));
        }
        Some(Self { x, y })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    fn sample() -> Dataset {
        Dataset::new(dmatrix![1.0, 2.0, 3.0], dmatrix![10.0, 20.0, 30.0; 1.0, 2.0, 3.0]).unwrap()
    }

    #[test]
    fn rejects_column_mismatch() {
        let r = Dataset::new(dmatrix![1.0, 2.0], dmatrix![1.0]);
        assert!(matches!(r, Err(DataError::ColumnMismatch { .. })));
    }

    #[test]
    fn push_grows_by_one_column() {
        let mut d = sample();
        d.push(&dvector![4.0], &dvector![40.0, 4.0]).unwrap();
        assert_eq!(d.len(), 4);
        assert_eq!(d.input(3), dvector![4.0]);
        assert_eq!(d.output(3), dvector![40.0, 4.0]);
    }

    #[test]
    fn push_checks_dimensions() {
        let mut d = sample();
        assert!(d.push(&dvector![1.0, 2.0], &dvector![0.0, 0.0]).is_err());
        assert!(d.push(&dvector![1.0], &dvector![0.0]).is_err());
    }

    #[test]
    fn retain_preserves_order() {
        let d = sample();
        let kept = d.retain_columns(&[true, false, true]).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.input(0), dvector![1.0]);
        assert_eq!(kept.input(1), dvector![3.0]);
    }

    #[test]
    fn retain_nothing_is_none() {
        let d = sample();
        assert!(d.retain_columns(&[false, false, false]).is_none());
    }
}
