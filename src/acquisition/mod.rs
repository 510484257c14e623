pub mod maximize;

pub use maximize::{AcquisitionMaximizer, BatchMaximizer, Maximizer};

use crate::data::{DataError, Dataset};
use crate::domain::Domain;
use crate::models::{ModelError, Posterior};
use crate::optimizers::OptimizerError;
use nalgebra::DVector;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("Expected improvement requires a fitness over the outputs")]
    MissingFitness,

    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Data(#[from] DataError),
}

/// Projection from the output vector to the scalar quality being optimized.
#[derive(Clone, Default)]
pub enum Fitness {
    /// `F(y) = c . y` with fixed coefficients; admits the closed-form EI.
    Linear(DVector<f64>),
    /// Arbitrary map; EI falls back to Monte Carlo estimation.
    NonLinear(Arc<dyn Fn(&DVector<f64>) -> f64 + Send + Sync>),
    /// No fitness; only fitness-free acquisitions apply.
    #[default]
    None,
}

impl Fitness {
    pub fn evaluate(&self, y: &DVector<f64>) -> Option<f64> {
        match self {
            Self::Linear(c) => Some(c.dot(y)),
            Self::NonLinear(f) => Some(f(y)),
            Self::None => None,
        }
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Self::Linear(_))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Debug for Fitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear(c) => f.debug_tuple("Linear").field(c).finish(),
            Self::NonLinear(_) => f.write_str("NonLinear"),
            Self::None => f.write_str("None"),
        }
    }
}

/// Expected improvement over the best admissible observed fitness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedImprovement {
    /// Monte Carlo draw count for the nonlinear or constrained path.
    pub eps_samples: usize,
    /// Incumbent used while no observed point satisfies the output
    /// constraints.
    pub best_default: f64,
}

impl Default for ExpectedImprovement {
    fn default() -> Self {
        Self {
            eps_samples: 200,
            best_default: 0.0,
        }
    }
}

impl ExpectedImprovement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_eps_samples(mut self, eps_samples: usize) -> Self {
        self.eps_samples = eps_samples;
        self
    }

    pub fn with_best_default(mut self, best_default: f64) -> Self {
        self.best_default = best_default;
        self
    }
}

/// Acquisition functions, a closed tagged set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Acquisition {
    ExpectedImprovement(ExpectedImprovement),
}

impl Default for Acquisition {
    fn default() -> Self {
        Self::ExpectedImprovement(ExpectedImprovement::default())
    }
}

fn admissible(y: &DVector<f64>, y_max: &DVector<f64>) -> bool {
    y.iter().zip(y_max.iter()).all(|(&v, &cap)| v <= cap)
}

impl Acquisition {
    /// Bind the acquisition to the current posterior and problem state.
    ///
    /// The Monte Carlo path pre-draws its standard-normal perturbations here
    /// (common random numbers), so the bound acquisition is a deterministic
    /// function of `x` and safe to maximize from parallel starts.
    pub fn prepare<R: Rng>(
        &self,
        posterior: Posterior,
        fitness: &Fitness,
        y_max: &DVector<f64>,
        domain: &Domain,
        data: &Dataset,
        rng: &mut R,
    ) -> Result<BoundAcquisition, AcquisitionError> {
        let Self::ExpectedImprovement(ei) = self;
        if fitness.is_none() {
            return Err(AcquisitionError::MissingFitness);
        }

        let best = (0..data.len())
            .filter_map(|i| {
                let y = data.output(i);
                admissible(&y, y_max)
                    .then(|| fitness.evaluate(&y))
                    .flatten()
            })
            .fold(f64::NEG_INFINITY, f64::max);
        let best = if best.is_finite() { best } else { ei.best_default };

        let constrained = y_max.iter().any(|cap| cap.is_finite());
        let analytic = fitness.is_linear() && !constrained;
        let z_draws = if analytic {
            Vec::new()
        } else {
            let m = y_max.len();
            (0..ei.eps_samples)
                .map(|_| DVector::from_fn(m, |_, _| rng.sample::<f64, _>(StandardNormal)))
                .collect()
        };

        Ok(BoundAcquisition {
            posterior,
            fitness: fitness.clone(),
            y_max: y_max.clone(),
            domain: domain.clone(),
            best,
            z_draws,
            analytic,
        })
    }
}

/// An acquisition bound to one posterior: the objective handed to the
/// maximizer, including the infeasibility gate.
pub struct BoundAcquisition {
    posterior: Posterior,
    fitness: Fitness,
    y_max: DVector<f64>,
    domain: Domain,
    best: f64,
    z_draws: Vec<DVector<f64>>,
    analytic: bool,
}

impl BoundAcquisition {
    pub fn incumbent(&self) -> f64 {
        self.best
    }

    pub fn posterior(&self) -> &Posterior {
        &self.posterior
    }

    /// Acquisition value at `x`, marginalized over posterior draws and
    /// gated to zero outside the domain. The gate judges the discrete
    /// projection of `x`, matching the rounding the discretized model
    /// applies to its predictions.
    pub fn value(&self, x: &DVector<f64>) -> f64 {
        let projected = self.domain.project_discrete(x);
        if !self.domain.in_domain(&projected) {
            return 0.0;
        }
        let samples = self.posterior.predict_samples(x);
        let total: f64 = samples
            .iter()
            .map(|(mean, var)| self.ei_single(mean, var))
            .sum();
        total / samples.len() as f64
    }

    fn ei_single(&self, mean: &DVector<f64>, var: &DVector<f64>) -> f64 {
        if self.analytic {
            let c = match &self.fitness {
                Fitness::Linear(c) => c,
                _ => unreachable!("analytic path implies linear fitness"),
            };
            let mu_f = c.dot(mean);
            let var_f: f64 = c.iter().zip(var.iter()).map(|(&ci, &vi)| ci * ci * vi).sum();
            ei_closed_form(mu_f, var_f.max(0.0).sqrt(), self.best)
        } else {
            if self.z_draws.is_empty() {
                return 0.0;
            }
            let mut acc = 0.0;
            for z in &self.z_draws {
                let y = DVector::from_fn(mean.len(), |j, _| mean[j] + var[j].sqrt() * z[j]);
                if admissible(&y, &self.y_max) {
                    if let Some(f) = self.fitness.evaluate(&y) {
                        acc += (f - self.best).max(0.0);
                    }
                }
            }
            acc / self.z_draws.len() as f64
        }
    }
}

/// `EI = s * phi(z) + (mu - best) * Phi(z)` with `z = (mu - best) / s`,
/// zero when the predictive is degenerate.
pub fn ei_closed_form(mu: f64, s: f64, best: f64) -> f64 {
    if s <= 0.0 {
        return 0.0;
    }
    let std_normal = Normal::new(0.0, 1.0).expect("standard normal");
    let z = (mu - best) / s;
    (s * std_normal.pdf(z) + (mu - best) * std_normal.cdf(z)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FitParams, GpModel, Kernel, Model};
    use crate::priors::Prior;
    use approx::assert_abs_diff_eq;
    use nalgebra::{dmatrix, dvector};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gp_posterior(data: &Dataset) -> (Model, Posterior) {
        let model = Model::Gp(
            GpModel::new(
                None,
                Kernel::SquaredExponential,
                vec![vec![Prior::log_normal(0.0, 1.0).unwrap()]],
            )
            .unwrap(),
        );
        let params = FitParams {
            theta: None,
            lengthscales: Some(dmatrix![1.0]),
            noise_var: dvector![1e-4],
        };
        let posterior = Posterior::new(&model, data, &[params]).unwrap();
        (model, posterior)
    }

    fn bind(
        data: &Dataset,
        domain: &Domain,
        fitness: &Fitness,
        y_max: &DVector<f64>,
        eps_samples: usize,
    ) -> BoundAcquisition {
        let (_, posterior) = gp_posterior(data);
        let acq = Acquisition::ExpectedImprovement(
            ExpectedImprovement::default().with_eps_samples(eps_samples),
        );
        let mut rng = StdRng::seed_from_u64(5);
        acq.prepare(posterior, fitness, y_max, domain, data, &mut rng)
            .unwrap()
    }

    #[test]
    fn closed_form_matches_known_values() {
        // Degenerate predictive.
        assert_eq!(ei_closed_form(1.0, 0.0, 0.0), 0.0);
        // Symmetric case: mu == best gives s * phi(0).
        let expected = 1.0 / (2.0 * std::f64::consts::PI).sqrt();
        assert_abs_diff_eq!(ei_closed_form(0.0, 1.0, 0.0), expected, epsilon = 1e-12);
        // Far below the incumbent EI vanishes.
        assert!(ei_closed_form(-10.0, 0.5, 0.0) < 1e-12);
    }

    #[test]
    fn ei_is_nonnegative_and_gated() {
        let data = Dataset::new(dmatrix![0.0, 1.0, 2.0], dmatrix![0.5, 0.9, 0.2]).unwrap();
        let domain = Domain::continuous(dvector![0.0], dvector![2.0]).unwrap();
        let fitness = Fitness::Linear(dvector![1.0]);
        let bound = bind(&data, &domain, &fitness, &dvector![f64::INFINITY], 64);
        for i in 0..40 {
            let x = dvector![i as f64 * 0.05];
            assert!(bound.value(&x) >= 0.0);
        }
        // Outside the box the gate returns exactly zero.
        assert_eq!(bound.value(&dvector![3.0]), 0.0);
        assert_eq!(bound.value(&dvector![-1.0]), 0.0);
    }

    #[test]
    fn monte_carlo_converges_to_closed_form() {
        let data = Dataset::new(dmatrix![0.0, 2.0], dmatrix![0.3, 0.7]).unwrap();
        let domain = Domain::continuous(dvector![0.0], dvector![2.0]).unwrap();
        let x = dvector![1.0];

        let linear = Fitness::Linear(dvector![1.0]);
        let analytic = bind(&data, &domain, &linear, &dvector![f64::INFINITY], 0);
        // Same projection expressed as a nonlinear map forces the MC path.
        let nonlinear = Fitness::NonLinear(Arc::new(|y: &DVector<f64>| y[0]));
        let sampled = bind(&data, &domain, &nonlinear, &dvector![f64::INFINITY], 40_000);

        let a = analytic.value(&x);
        let b = sampled.value(&x);
        assert!(a > 0.0);
        // O(1 / sqrt(eps_samples)) agreement.
        assert_abs_diff_eq!(a, b, epsilon = 0.05 * a.max(0.01));
    }

    #[test]
    fn incumbent_skips_inadmissible_points() {
        // Second output is capped at 0; only the first column qualifies.
        let data = Dataset::new(
            dmatrix![0.0, 1.0],
            dmatrix![0.2, 0.9; -1.0, 1.0],
        )
        .unwrap();
        let domain = Domain::continuous(dvector![0.0], dvector![1.0]).unwrap();
        let fitness = Fitness::Linear(dvector![1.0, 0.0]);
        let bound = bind(&data, &domain, &fitness, &dvector![f64::INFINITY, 0.0], 32);
        assert_abs_diff_eq!(bound.incumbent(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn missing_fitness_is_rejected() {
        let data = Dataset::new(dmatrix![0.0], dmatrix![0.0]).unwrap();
        let domain = Domain::continuous(dvector![0.0], dvector![1.0]).unwrap();
        let (_, posterior) = gp_posterior(&data);
        let mut rng = StdRng::seed_from_u64(1);
        let r = Acquisition::default().prepare(
            posterior,
            &Fitness::None,
            &dvector![f64::INFINITY],
            &domain,
            &data,
            &mut rng,
        );
        assert!(matches!(r, Err(AcquisitionError::MissingFitness)));
    }
}
