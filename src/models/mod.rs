pub mod gp;
pub mod kernel;
pub mod parametric;
pub mod posterior;
pub mod semiparametric;

pub use gp::GpModel;
pub use kernel::Kernel;
pub use parametric::ParametricModel;
pub use posterior::Posterior;
pub use semiparametric::SemiparametricModel;

use crate::domain::Domain;
use crate::priors::Prior;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Parametric predictor `(x, theta) -> R^m`.
pub type PredictorFn = Arc<dyn Fn(&DVector<f64>, &DVector<f64>) -> DVector<f64> + Send + Sync>;

/// Deterministic mean `x -> R^m`.
pub type MeanFn = Arc<dyn Fn(&DVector<f64>) -> DVector<f64> + Send + Sync>;

/// Input rewrite applied before every predictor or kernel evaluation.
pub type InputMap = Arc<dyn Fn(&DVector<f64>) -> DVector<f64> + Send + Sync>;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Covariance matrix not positive-definite after jitter up to {max_jitter:e}")]
    IllConditioned { max_jitter: f64 },
}

/// Fitted parameter state for one posterior draw (or the MLE point).
///
/// Segments are present only when the model variant uses them; noise
/// variances are always present, one per output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitParams {
    pub theta: Option<DVector<f64>>,
    /// `n x m` matrix, column `j` holding the length-scales of output `j`.
    pub lengthscales: Option<DMatrix<f64>>,
    pub noise_var: DVector<f64>,
}

/// Surrogate model variants: a closed tagged set, mirrored by the posterior
/// construction in [`posterior`].
#[derive(Clone)]
pub enum Model {
    Parametric(ParametricModel),
    Gp(GpModel),
    Semiparametric(SemiparametricModel),
}

impl Model {
    pub fn n_outputs(&self) -> usize {
        match self {
            Self::Parametric(m) => m.n_outputs(),
            Self::Gp(m) => m.n_outputs(),
            Self::Semiparametric(m) => m.n_outputs(),
        }
    }

    pub fn theta_priors(&self) -> &[Prior] {
        match self {
            Self::Parametric(m) => m.theta_priors(),
            Self::Gp(_) => &[],
            Self::Semiparametric(m) => m.parametric().theta_priors(),
        }
    }

    pub fn lengthscale_priors(&self) -> &[Vec<Prior>] {
        match self {
            Self::Parametric(_) => &[],
            Self::Gp(m) => m.lengthscale_priors(),
            Self::Semiparametric(m) => m.gp().lengthscale_priors(),
        }
    }

    /// One-time rewrite for discrete domains: every predictor, mean and
    /// kernel evaluation sees inputs with discrete coordinates rounded, so
    /// a continuous maximizer and the stored data agree on predictions.
    pub fn discretized(self, domain: &Domain) -> Self {
        if !domain.has_discrete() {
            return self;
        }
        let d = domain.clone();
        let map: InputMap = Arc::new(move |x: &DVector<f64>| d.project_discrete(x));
        match self {
            Self::Parametric(m) => Self::Parametric(m.with_input_map(map)),
            Self::Gp(m) => Self::Gp(m.with_input_map(map)),
            Self::Semiparametric(m) => Self::Semiparametric(m.with_input_map(map)),
        }
    }

    /// Check that a parameter state matches the model's arities.
    pub fn validate_params(&self, params: &FitParams) -> Result<(), ModelError> {
        if params.noise_var.len() != self.n_outputs() {
            return Err(ModelError::InvalidModel(format!(
                "expected {} noise variance(s), got {}",
                self.n_outputs(),
                params.noise_var.len()
            )));
        }
        let expected_theta = self.theta_priors().len();
        let got_theta = params.theta.as_ref().map_or(0, |t| t.len());
        if expected_theta != got_theta {
            return Err(ModelError::InvalidModel(format!(
                "expected {expected_theta} parametric coefficient(s), got {got_theta}"
            )));
        }
        let expected_ls = self.lengthscale_priors().len();
        let got_ls = params.lengthscales.as_ref().map_or(0, |l| l.ncols());
        if expected_ls != got_ls {
            return Err(ModelError::InvalidModel(format!(
                "expected {expected_ls} length-scale column(s), got {got_ls}"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parametric(m) => f
                .debug_struct("Parametric")
                .field("n_outputs", &m.n_outputs())
                .field("n_theta", &m.theta_priors().len())
                .finish(),
            Self::Gp(m) => f
                .debug_struct("Gp")
                .field("n_outputs", &m.n_outputs())
                .field("kernel", m.kernel())
                .finish(),
            Self::Semiparametric(m) => f
                .debug_struct("Semiparametric")
                .field("n_outputs", &m.n_outputs())
                .finish(),
        }
    }
}
