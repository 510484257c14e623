use super::{Acquisition, AcquisitionError, BoundAcquisition, Fitness};
use crate::data::Dataset;
use crate::domain::Domain;
use crate::inference::FitOutcome;
use crate::models::{Model, Posterior};
use crate::optimizers::{latin_hypercube, multistart, uniform_starts, BackendKind, OptimizerOptions};
use log::debug;
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Multistart maximization of a bound acquisition over the domain box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionMaximizer {
    /// Latin hypercube start count; a single start falls back to uniform.
    pub n_starts: usize,
    pub parallel: bool,
    pub backend: BackendKind,
    pub options: OptimizerOptions,
}

impl Default for AcquisitionMaximizer {
    fn default() -> Self {
        Self {
            n_starts: 24,
            parallel: true,
            backend: BackendKind::NelderMead,
            options: OptimizerOptions::default().with_max_iterations(200),
        }
    }
}

impl AcquisitionMaximizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_starts(mut self, n_starts: usize) -> Self {
        self.n_starts = n_starts;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.n_starts == 0 {
            return Err("acquisition maximizer needs at least one start".to_string());
        }
        self.options.validate()
    }

    /// Pick the acquisition maximizer over the domain; the winner is
    /// projected onto the discrete grid before it is returned.
    pub fn maximize<R: Rng>(
        &self,
        bound: &BoundAcquisition,
        domain: &Domain,
        rng: &mut R,
    ) -> Result<(DVector<f64>, f64), AcquisitionError> {
        let starts = if self.n_starts >= 2 {
            latin_hypercube(rng, domain.lower(), domain.upper(), self.n_starts)?
        } else {
            uniform_starts(rng, domain.lower(), domain.upper(), 1)
        };
        let obj = |x: &DVector<f64>| bound.value(x);
        let backend = self.backend.build(self.options.clone());
        let (arg, _) = multistart(
            backend.as_ref(),
            &obj,
            &starts,
            domain.lower(),
            domain.upper(),
            self.parallel,
        )?;
        let projected = domain.project_discrete(&arg);
        let value = bound.value(&projected);
        debug!("acquisition maximum {value:.6} at {projected:?}");
        Ok((projected, value))
    }
}

/// Sequential batching around an inner maximizer: after each pick the
/// posterior mean at the pick is appended to a private dataset copy as a
/// fantasy observation, steering later picks away. The visible dataset is
/// never touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMaximizer {
    pub inner: AcquisitionMaximizer,
    pub batch_size: usize,
}

impl BatchMaximizer {
    pub fn new(inner: AcquisitionMaximizer, batch_size: usize) -> Self {
        Self { inner, batch_size }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch size must be positive".to_string());
        }
        self.inner.validate()
    }
}

/// Candidate proposal strategies, a closed tagged set. Both yield an
/// `n x B` matrix of candidate columns (`B = 1` for the single maximizer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Maximizer {
    Single(AcquisitionMaximizer),
    Batch(BatchMaximizer),
}

impl Default for Maximizer {
    fn default() -> Self {
        Self::Single(AcquisitionMaximizer::default())
    }
}

impl Maximizer {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Single(m) => m.validate(),
            Self::Batch(m) => m.validate(),
        }
    }

    pub fn batch_size(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(m) => m.batch_size,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn propose<R: Rng>(
        &self,
        acquisition: &Acquisition,
        model: &Model,
        params: &FitOutcome,
        data: &Dataset,
        fitness: &Fitness,
        y_max: &DVector<f64>,
        domain: &Domain,
        rng: &mut R,
    ) -> Result<DMatrix<f64>, AcquisitionError> {
        match self {
            Self::Single(inner) => {
                let posterior = Posterior::new(model, data, params.draws())?;
                let bound = acquisition.prepare(posterior, fitness, y_max, domain, data, rng)?;
                let (x, _) = inner.maximize(&bound, domain, rng)?;
                Ok(DMatrix::from_column_slice(x.len(), 1, x.as_slice()))
            }
            Self::Batch(batch) => {
                // Fantasies accumulate only in this private copy.
                let mut fantasy_data = data.clone();
                let mut picks = DMatrix::zeros(domain.dim(), batch.batch_size);
                for b in 0..batch.batch_size {
                    let posterior = Posterior::new(model, &fantasy_data, params.draws())?;
                    let bound = acquisition.prepare(
                        posterior,
                        fitness,
                        y_max,
                        domain,
                        &fantasy_data,
                        rng,
                    )?;
                    let (x, _) = batch.inner.maximize(&bound, domain, rng)?;
                    let fantasy = bound.posterior().mean_prediction(&x);
                    fantasy_data.push(&x, &fantasy)?;
                    picks.set_column(b, &x);
                }
                Ok(picks)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FitParams, GpModel, Kernel};
    use crate::priors::Prior;
    use nalgebra::{dmatrix, dvector};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gp_model() -> Model {
        Model::Gp(
            GpModel::new(
                None,
                Kernel::SquaredExponential,
                vec![vec![Prior::log_normal(0.0, 1.0).unwrap()]],
            )
            .unwrap(),
        )
    }

    fn gp_fit() -> FitOutcome {
        FitOutcome::Mle(FitParams {
            theta: None,
            lengthscales: Some(dmatrix![1.0]),
            noise_var: dvector![1e-4],
        })
    }

    fn quick_maximizer() -> AcquisitionMaximizer {
        AcquisitionMaximizer::default()
            .with_starts(8)
            .with_parallel(false)
    }

    #[test]
    fn single_proposal_stays_feasible() {
        let data = Dataset::new(dmatrix![0.0, 2.0, 4.0], dmatrix![0.1, 0.8, 0.3]).unwrap();
        let domain = Domain::continuous(dvector![0.0], dvector![4.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(17);
        let picks = Maximizer::Single(quick_maximizer())
            .propose(
                &Acquisition::default(),
                &gp_model(),
                &gp_fit(),
                &data,
                &Fitness::Linear(dvector![1.0]),
                &dvector![f64::INFINITY],
                &domain,
                &mut rng,
            )
            .unwrap();
        assert_eq!(picks.ncols(), 1);
        assert!(domain.in_domain(&picks.column(0).into_owned()));
    }

    #[test]
    fn discrete_domain_yields_integer_proposals() {
        let model = gp_model().discretized(
            &Domain::continuous(dvector![0.0], dvector![10.0])
                .unwrap()
                .with_discrete(vec![true])
                .unwrap(),
        );
        let domain = Domain::continuous(dvector![0.0], dvector![10.0])
            .unwrap()
            .with_discrete(vec![true])
            .unwrap();
        let data = Dataset::new(dmatrix![2.0, 7.0], dmatrix![0.5, 0.4]).unwrap();
        let mut rng = StdRng::seed_from_u64(23);
        let picks = Maximizer::Single(quick_maximizer())
            .propose(
                &Acquisition::default(),
                &model,
                &gp_fit(),
                &data,
                &Fitness::Linear(dvector![1.0]),
                &dvector![f64::INFINITY],
                &domain,
                &mut rng,
            )
            .unwrap();
        let x = picks.column(0).into_owned();
        assert!((x[0] - x[0].round()).abs() < 1e-12);
        assert!(domain.in_domain(&x));
    }

    #[test]
    fn batch_returns_non_coincident_candidates() {
        let data = Dataset::new(dmatrix![0.0, 5.0], dmatrix![0.2, 0.3]).unwrap();
        let domain = Domain::continuous(dvector![0.0], dvector![5.0]).unwrap();
        let maximizer = Maximizer::Batch(BatchMaximizer::new(quick_maximizer(), 3));
        let mut rng = StdRng::seed_from_u64(31);
        let picks = maximizer
            .propose(
                &Acquisition::default(),
                &gp_model(),
                &gp_fit(),
                &data,
                &Fitness::Linear(dvector![1.0]),
                &dvector![f64::INFINITY],
                &domain,
                &mut rng,
            )
            .unwrap();
        assert_eq!(picks.ncols(), 3);
        // Fantasies steer successive picks apart.
        for a in 0..3 {
            for b in (a + 1)..3 {
                assert!((picks[(0, a)] - picks[(0, b)]).abs() > 1e-6);
            }
        }
        // The visible dataset still holds its original two columns.
        assert_eq!(data.len(), 2);
    }
}
