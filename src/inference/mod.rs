pub mod mle;
pub mod nuts;

pub use crate::models::FitParams;
pub use mle::MleConfig;
pub use nuts::NutsConfig;

use crate::data::Dataset;
use crate::models::{Model, ModelError};
use crate::optimizers::OptimizerError;
use crate::priors::Prior;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Sampling failed: {0}")]
    SamplingFailed(String),

    #[error("Invalid inference configuration: {0}")]
    InvalidConfig(String),
}

/// Result of a parameter-inference pass: a point estimate or a pool of
/// posterior draws (chain-major order).
#[derive(Debug, Clone)]
pub enum FitOutcome {
    Mle(FitParams),
    Bayes(Vec<FitParams>),
}

impl FitOutcome {
    pub fn draws(&self) -> &[FitParams] {
        match self {
            Self::Mle(p) => std::slice::from_ref(p),
            Self::Bayes(ps) => ps,
        }
    }

    pub fn n_draws(&self) -> usize {
        self.draws().len()
    }
}

/// Inference mode, a closed tagged set implementing the `fit` capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelFitter {
    Mle(MleConfig),
    Nuts(NutsConfig),
}

impl ModelFitter {
    pub fn fit(
        &self,
        model: &Model,
        data: &Dataset,
        noise_priors: &[Prior],
    ) -> Result<FitOutcome, InferenceError> {
        match self {
            Self::Mle(config) => mle::fit_mle(config, model, data, noise_priors).map(FitOutcome::Mle),
            Self::Nuts(config) => {
                nuts::sample_nuts(config, model, data, noise_priors).map(FitOutcome::Bayes)
            }
        }
    }
}

/// Numerically safe softplus, the invertible positivity transform for
/// coordinates that must stay positive under an unconstrained optimizer or
/// sampler.
pub fn softplus(s: f64) -> f64 {
    if s > 30.0 {
        s
    } else {
        s.exp().ln_1p()
    }
}

pub fn softplus_inv(v: f64) -> f64 {
    if v > 30.0 {
        v
    } else {
        v.exp_m1().ln()
    }
}

/// Flat parameter vector layout `[theta ; vec(lambda) ; sigma2]`, segments
/// present only when the model uses them. Knows which coordinates live in
/// softplus space: noise variances always, other coordinates when their
/// prior support is `(0, inf)`.
pub(crate) struct ParamLayout {
    n_theta: usize,
    ls_rows: usize,
    ls_cols: usize,
    n_noise: usize,
    priors: Vec<Prior>,
    softplus_mask: Vec<bool>,
}

impl ParamLayout {
    pub fn of(model: &Model, noise_priors: &[Prior]) -> Self {
        let theta_priors = model.theta_priors();
        let ls_priors = model.lengthscale_priors();
        let n_theta = theta_priors.len();
        let ls_cols = ls_priors.len();
        let ls_rows = ls_priors.first().map_or(0, |p| p.len());
        let n_noise = noise_priors.len();

        let mut priors = Vec::with_capacity(n_theta + ls_rows * ls_cols + n_noise);
        priors.extend_from_slice(theta_priors);
        for col in ls_priors {
            priors.extend_from_slice(col);
        }
        priors.extend_from_slice(noise_priors);

        let n_free = priors.len();
        let mut softplus_mask = vec![false; n_free];
        for (i, prior) in priors.iter().enumerate() {
            let positive_only = {
                let (lo, hi) = prior.support();
                lo >= 0.0 && hi.is_infinite()
            };
            softplus_mask[i] = positive_only || i >= n_free - n_noise;
        }

        Self {
            n_theta,
            ls_rows,
            ls_cols,
            n_noise,
            priors,
            softplus_mask,
        }
    }

    pub fn len(&self) -> usize {
        self.priors.len()
    }

    pub fn priors(&self) -> &[Prior] {
        &self.priors
    }

    pub fn softplus_mask(&self) -> &[bool] {
        &self.softplus_mask
    }

    /// Split an unconstrained vector back into model parameters, undoing
    /// the softplus transform where it applies.
    pub fn unpack(&self, p: &DVector<f64>) -> FitParams {
        debug_assert_eq!(p.len(), self.len());
        let constrained = DVector::from_fn(p.len(), |i, _| {
            if self.softplus_mask[i] {
                softplus(p[i])
            } else {
                p[i]
            }
        });
        let theta = (self.n_theta > 0)
            .then(|| constrained.rows(0, self.n_theta).into_owned());
        let lengthscales = (self.ls_cols > 0).then(|| {
            DMatrix::from_fn(self.ls_rows, self.ls_cols, |r, c| {
                constrained[self.n_theta + c * self.ls_rows + r]
            })
        });
        let noise_var = constrained
            .rows(self.len() - self.n_noise, self.n_noise)
            .into_owned();
        FitParams {
            theta,
            lengthscales,
            noise_var,
        }
    }

    /// Draw an unconstrained start point from the priors. Positive samples
    /// map through the inverse softplus; out-of-image samples (possible for
    /// a noise prior with mass below zero) are used as-is, landing at a
    /// small positive variance.
    pub fn sample_start<R: rand::Rng>(&self, rng: &mut R) -> DVector<f64> {
        DVector::from_fn(self.len(), |i, _| {
            let v = self.priors[i].sample(rng);
            if self.softplus_mask[i] && v > 0.0 {
                softplus_inv(v)
            } else {
                v
            }
        })
    }

    /// Box constraints in the unconstrained space: softplus coordinates are
    /// free, the rest keep their prior support.
    pub fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
        let lb = DVector::from_fn(self.len(), |i, _| {
            if self.softplus_mask[i] {
                f64::NEG_INFINITY
            } else {
                self.priors[i].support().0
            }
        });
        let ub = DVector::from_fn(self.len(), |i, _| {
            if self.softplus_mask[i] {
                f64::INFINITY
            } else {
                self.priors[i].support().1
            }
        });
        (lb, ub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GpModel, Kernel, ParametricModel, PredictorFn, SemiparametricModel};
    use approx::assert_abs_diff_eq;
    use nalgebra::dvector;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn semi_model() -> Model {
        let predictor: PredictorFn = Arc::new(|x, theta| dvector![theta[0] + theta[1] * x[0]]);
        let trend = ParametricModel::new(
            predictor,
            vec![Prior::normal(0.0, 1.0).unwrap(), Prior::normal(0.0, 1.0).unwrap()],
            1,
        )
        .unwrap();
        let gp = GpModel::new(
            None,
            Kernel::SquaredExponential,
            vec![vec![Prior::log_normal(0.0, 1.0).unwrap(); 2]],
        )
        .unwrap();
        Model::Semiparametric(SemiparametricModel::new(trend, gp).unwrap())
    }

    #[test]
    fn softplus_roundtrips() {
        for v in [1e-4, 0.5, 3.0, 40.0] {
            assert_abs_diff_eq!(softplus(softplus_inv(v)), v, epsilon = 1e-9);
        }
        assert!(softplus(-20.0) > 0.0);
    }

    #[test]
    fn layout_counts_all_segments() {
        let model = semi_model();
        let noise = vec![Prior::normal(1.0, 1.0).unwrap()];
        let layout = ParamLayout::of(&model, &noise);
        // 2 theta + 2 lengthscales + 1 noise.
        assert_eq!(layout.len(), 5);
        // Normal theta coordinates stay unconstrained; LogNormal
        // length-scales and the noise coordinate live in softplus space.
        assert_eq!(layout.softplus_mask(), &[false, false, true, true, true][..]);
    }

    #[test]
    fn unpack_splits_and_transforms() {
        let model = semi_model();
        let noise = vec![Prior::normal(1.0, 1.0).unwrap()];
        let layout = ParamLayout::of(&model, &noise);
        let p = dvector![0.5, -0.5, softplus_inv(2.0), softplus_inv(3.0), softplus_inv(0.1)];
        let params = layout.unpack(&p);
        assert_eq!(params.theta.as_ref().unwrap(), &dvector![0.5, -0.5]);
        let ls = params.lengthscales.as_ref().unwrap();
        assert_abs_diff_eq!(ls[(0, 0)], 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(ls[(1, 0)], 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(params.noise_var[0], 0.1, epsilon = 1e-9);
    }

    #[test]
    fn starts_unpack_to_valid_params() {
        let model = semi_model();
        let noise = vec![Prior::normal(1.0, 1.0).unwrap()];
        let layout = ParamLayout::of(&model, &noise);
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..20 {
            let start = layout.sample_start(&mut rng);
            let params = layout.unpack(&start);
            assert!(params.noise_var[0] > 0.0);
            assert!(params.lengthscales.unwrap().iter().all(|&l| l > 0.0));
        }
    }
}
