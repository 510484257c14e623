use super::{InputMap, Kernel, MeanFn, ModelError};
use crate::priors::Prior;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

/// Starting additive jitter when the training covariance fails to factor.
pub const JITTER_START: f64 = 1e-10;
/// Jitter ladder ceiling; exceeding it is a structural failure.
pub const JITTER_MAX: f64 = 1e-4;

/// Nonparametric surrogate: independent per-output Gaussian processes
/// sharing a kernel family, each with its own length-scale vector.
#[derive(Clone)]
pub struct GpModel {
    mean: Option<MeanFn>,
    kernel: Kernel,
    /// One prior vector per output; inner length is the input dimension.
    lengthscale_priors: Vec<Vec<Prior>>,
    input_map: Option<InputMap>,
}

impl GpModel {
    pub fn new(
        mean: Option<MeanFn>,
        kernel: Kernel,
        lengthscale_priors: Vec<Vec<Prior>>,
    ) -> Result<Self, ModelError> {
        if lengthscale_priors.is_empty() {
            return Err(ModelError::InvalidModel(
                "GP model needs length-scale priors for at least one output".to_string(),
            ));
        }
        let n = lengthscale_priors[0].len();
        if n == 0 || lengthscale_priors.iter().any(|p| p.len() != n) {
            return Err(ModelError::InvalidModel(
                "length-scale prior vectors must share the input dimension".to_string(),
            ));
        }
        Ok(Self {
            mean,
            kernel,
            lengthscale_priors,
            input_map: None,
        })
    }

    pub fn n_outputs(&self) -> usize {
        self.lengthscale_priors.len()
    }

    pub fn n_inputs(&self) -> usize {
        self.lengthscale_priors[0].len()
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn mean(&self) -> Option<&MeanFn> {
        self.mean.as_ref()
    }

    pub fn has_mean(&self) -> bool {
        self.mean.is_some()
    }

    pub fn lengthscale_priors(&self) -> &[Vec<Prior>] {
        &self.lengthscale_priors
    }

    pub fn with_input_map(mut self, map: InputMap) -> Self {
        self.input_map = Some(map);
        self
    }

    pub fn input_map(&self) -> Option<InputMap> {
        self.input_map.clone()
    }

    /// Apply the discrete rewrite (identity when absent).
    pub fn map_input(&self, x: &DVector<f64>) -> DVector<f64> {
        match &self.input_map {
            Some(map) => map(x),
            None => x.clone(),
        }
    }

    /// Mean values at `x`, zero vector when the model carries no mean.
    pub fn mean_at(&self, x: &DVector<f64>) -> DVector<f64> {
        match &self.mean {
            Some(mu) => mu(x),
            None => DVector::zeros(self.n_outputs()),
        }
    }
}

/// Cholesky-factor `k`, escalating an additive diagonal jitter from
/// [`JITTER_START`] by doubling until [`JITTER_MAX`].
pub fn cholesky_with_jitter(k: &DMatrix<f64>) -> Result<Cholesky<f64, Dyn>, ModelError> {
    if let Some(chol) = k.clone().cholesky() {
        return Ok(chol);
    }
    let mut jitter = JITTER_START;
    while jitter <= JITTER_MAX {
        let mut jittered = k.clone();
        for i in 0..k.nrows() {
            jittered[(i, i)] += jitter;
        }
        if let Some(chol) = jittered.cholesky() {
            log::debug!("covariance factored after jitter {jitter:e}");
            return Ok(chol);
        }
        jitter *= 2.0;
    }
    Err(ModelError::IllConditioned { max_jitter: JITTER_MAX })
}

/// Posterior machinery of a single GP output: the Cholesky factor of the
/// noisy training covariance and the precomputed weight vector
/// `alpha = K^{-1} (y - mu0(X))`.
#[derive(Clone)]
pub struct GpOutputPosterior {
    kernel: Kernel,
    lengthscales: DVector<f64>,
    x_train: DMatrix<f64>,
    chol: Cholesky<f64, Dyn>,
    alpha: DVector<f64>,
}

impl GpOutputPosterior {
    /// Condition one output on its residuals `y_j - mu0_j(X)`.
    pub fn condition(
        kernel: Kernel,
        lengthscales: DVector<f64>,
        x_train: DMatrix<f64>,
        residuals: &DVector<f64>,
        noise_var: f64,
    ) -> Result<Self, ModelError> {
        let k = kernel.covariance(&x_train, &lengthscales, noise_var);
        let chol = cholesky_with_jitter(&k)?;
        let alpha = chol.solve(residuals);
        Ok(Self {
            kernel,
            lengthscales,
            x_train,
            chol,
            alpha,
        })
    }

    /// Posterior mean deviation from the prior mean, and posterior variance.
    /// The variance is clamped at zero against the numerical floor.
    pub fn predict(&self, x: &DVector<f64>) -> (f64, f64) {
        let kx = self.kernel.cross(x, &self.x_train, &self.lengthscales);
        let mean = kx.dot(&self.alpha);
        let solved = self.chol.solve(&kx);
        let var = self.kernel.eval(x, x, &self.lengthscales) - kx.dot(&solved);
        (mean, var.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{dmatrix, dvector};

    fn conditioned() -> GpOutputPosterior {
        let x = dmatrix![0.0, 1.0, 2.0, 3.0];
        let y = dvector![0.0, 0.8, 0.9, 0.1];
        GpOutputPosterior::condition(Kernel::SquaredExponential, dvector![1.0], x, &y, 1e-4)
            .unwrap()
    }

    #[test]
    fn interpolates_training_points_within_noise() {
        let post = conditioned();
        let (mean, var) = post.predict(&dvector![1.0]);
        assert_abs_diff_eq!(mean, 0.8, epsilon = 0.05);
        // At a training input the posterior variance is bounded by the
        // observation noise, up to jitter.
        assert!(var <= 1e-4 + 1e-8);
    }

    #[test]
    fn variance_grows_away_from_data() {
        let post = conditioned();
        let (_, var_near) = post.predict(&dvector![1.5]);
        let (_, var_far) = post.predict(&dvector![10.0]);
        assert!(var_far > var_near);
        assert!(var_far <= 1.0 + 1e-6);
    }

    #[test]
    fn variance_never_negative() {
        let post = conditioned();
        for i in 0..100 {
            let x = dvector![i as f64 * 0.07 - 1.0];
            let (_, var) = post.predict(&x);
            assert!(var >= 0.0);
        }
    }

    #[test]
    fn jitter_rescues_duplicate_columns() {
        // Two identical training points make K singular at zero noise.
        let x = dmatrix![0.5, 0.5];
        let y = dvector![1.0, 1.0];
        let post =
            GpOutputPosterior::condition(Kernel::SquaredExponential, dvector![1.0], x, &y, 0.0);
        assert!(post.is_ok());
    }

    #[test]
    fn gp_model_rejects_ragged_priors() {
        let priors = vec![
            vec![Prior::log_normal(0.0, 1.0).unwrap(); 2],
            vec![Prior::log_normal(0.0, 1.0).unwrap(); 3],
        ];
        assert!(GpModel::new(None, Kernel::SquaredExponential, priors).is_err());
    }
}
