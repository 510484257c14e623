use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Stationary covariance functions with per-coordinate length-scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kernel {
    SquaredExponential,
    Matern52,
}

impl Kernel {
    /// Covariance between two points under length-scales `ls`.
    pub fn eval(&self, a: &DVector<f64>, b: &DVector<f64>, ls: &DVector<f64>) -> f64 {
        let r2: f64 = (0..a.len())
            .map(|i| {
                let d = (a[i] - b[i]) / ls[i];
                d * d
            })
            .sum();
        match self {
            Self::SquaredExponential => (-0.5 * r2).exp(),
            Self::Matern52 => {
                let r = (5.0 * r2).sqrt();
                (1.0 + r + r * r / 3.0) * (-r).exp()
            }
        }
    }

    /// Cross-covariance vector `k(x, X)` against training columns.
    pub fn cross(&self, x: &DVector<f64>, xs: &DMatrix<f64>, ls: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(xs.ncols(), |j, _| self.eval(x, &xs.column(j).into_owned(), ls))
    }

    /// Training covariance `k(X, X) + noise_var * I`.
    pub fn covariance(&self, xs: &DMatrix<f64>, ls: &DVector<f64>, noise_var: f64) -> DMatrix<f64> {
        let k = xs.ncols();
        let cols: Vec<DVector<f64>> = (0..k).map(|j| xs.column(j).into_owned()).collect();
        let mut out = DMatrix::zeros(k, k);
        for i in 0..k {
            for j in i..k {
                let v = self.eval(&cols[i], &cols[j], ls);
                out[(i, j)] = v;
                out[(j, i)] = v;
            }
            out[(i, i)] += noise_var;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{dmatrix, dvector};

    #[test]
    fn unit_variance_at_zero_distance() {
        let ls = dvector![1.0, 2.0];
        let x = dvector![0.3, -1.2];
        assert_abs_diff_eq!(Kernel::SquaredExponential.eval(&x, &x, &ls), 1.0);
        assert_abs_diff_eq!(Kernel::Matern52.eval(&x, &x, &ls), 1.0);
    }

    #[test]
    fn decays_with_distance() {
        let ls = dvector![1.0];
        for kernel in [Kernel::SquaredExponential, Kernel::Matern52] {
            let near = kernel.eval(&dvector![0.0], &dvector![0.5], &ls);
            let far = kernel.eval(&dvector![0.0], &dvector![3.0], &ls);
            assert!(near > far);
            assert!(far > 0.0);
        }
    }

    #[test]
    fn lengthscale_stretches_correlation() {
        let short = Kernel::SquaredExponential.eval(&dvector![0.0], &dvector![1.0], &dvector![0.5]);
        let long = Kernel::SquaredExponential.eval(&dvector![0.0], &dvector![1.0], &dvector![5.0]);
        assert!(long > short);
    }

    #[test]
    fn covariance_is_symmetric_with_noise_on_diagonal() {
        let xs = dmatrix![0.0, 1.0, 2.5];
        let ls = dvector![1.0];
        let k = Kernel::Matern52.covariance(&xs, &ls, 0.1);
        assert_abs_diff_eq!(k[(0, 0)], 1.1, epsilon = 1e-12);
        assert_abs_diff_eq!(k[(0, 2)], k[(2, 0)], epsilon = 1e-15);
    }
}
