use crate::acquisition::{Acquisition, ExpectedImprovement, Fitness, Maximizer};
use crate::data::Dataset;
use crate::domain::Domain;
use crate::inference::{FitOutcome, ModelFitter};
use crate::models::Model;
use crate::priors::Prior;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BoError {
    #[error("Problem has no objective; use recommend() for a one-shot candidate")]
    MissingObjective,

    #[error("Objective evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),
}

/// The user objective: a black box evaluated one point at a time.
pub type ObjectiveFn =
    Arc<dyn Fn(&DVector<f64>) -> std::result::Result<DVector<f64>, String> + Send + Sync>;

/// Everything the loop owns: the static problem description plus the
/// evolving dataset and parameter state.
#[derive(Clone)]
pub struct Problem {
    pub fitness: Fitness,
    pub objective: Option<ObjectiveFn>,
    pub y_max: DVector<f64>,
    pub domain: Domain,
    pub model: Model,
    pub noise_var_priors: Vec<Prior>,
    pub data: Dataset,
    /// Recomputed from scratch at every iteration.
    pub params: Option<FitOutcome>,
}

impl std::fmt::Debug for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Problem")
            .field("fitness", &self.fitness)
            .field("objective", &self.objective.as_ref().map(|_| "<fn>"))
            .field("y_max", &self.y_max)
            .field("domain", &self.domain)
            .field("model", &self.model)
            .field("noise_var_priors", &self.noise_var_priors)
            .field("data", &self.data)
            .field("params", &self.params)
            .finish()
    }
}

impl Problem {
    pub fn new(
        fitness: Fitness,
        objective: Option<ObjectiveFn>,
        y_max: DVector<f64>,
        domain: Domain,
        model: Model,
        noise_var_priors: Vec<Prior>,
        data: Dataset,
    ) -> Self {
        Self {
            fitness,
            objective,
            y_max,
            domain,
            model,
            noise_var_priors,
            data,
            params: None,
        }
    }

    /// Best observed point under the fitness, ignoring output constraints.
    pub fn best_observed(&self) -> Option<(DVector<f64>, f64)> {
        let mut best: Option<(DVector<f64>, f64)> = None;
        for i in 0..self.data.len() {
            if let Some(f) = self.fitness.evaluate(&self.data.output(i)) {
                if best.as_ref().map_or(true, |(_, bf)| f > *bf) {
                    best = Some((self.data.input(i), f));
                }
            }
        }
        best
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalFailurePolicy {
    /// Surface the failure immediately (default).
    Surface,
    /// Treat the candidate as rejected: log, skip the append, keep looping.
    RejectPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Chatty per-iteration logging.
    pub info: bool,
    /// Monte Carlo draw count for the nonlinear / constrained EI path.
    pub eps_samples: usize,
    pub seed: Option<u64>,
    pub on_eval_failure: EvalFailurePolicy,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            info: false,
            eps_samples: 200,
            seed: Some(12345),
            on_eval_failure: EvalFailurePolicy::Surface,
        }
    }
}

impl SolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_info(mut self, info: bool) -> Self {
        self.info = info;
        self
    }

    pub fn with_eps_samples(mut self, eps_samples: usize) -> Self {
        self.eps_samples = eps_samples;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_eval_failure(mut self, policy: EvalFailurePolicy) -> Self {
        self.on_eval_failure = policy;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.eps_samples == 0 {
            return Err("eps_samples must be positive".to_string());
        }
        Ok(())
    }
}

/// Termination condition, evaluated once per loop head. `true` continues.
pub trait TermCond {
    fn decide(&mut self, problem: &Problem) -> bool;
}

/// Runs exactly `limit` completed iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterLimit {
    limit: usize,
    iter: usize,
}

impl IterLimit {
    pub fn new(limit: usize) -> Self {
        Self { limit, iter: 0 }
    }
}

impl TermCond for IterLimit {
    fn decide(&mut self, _problem: &Problem) -> bool {
        if self.iter < self.limit {
            self.iter += 1;
            true
        } else {
            false
        }
    }
}

impl<F> TermCond for F
where
    F: FnMut(&Problem) -> bool,
{
    fn decide(&mut self, problem: &Problem) -> bool {
        self(problem)
    }
}

/// Structural validation and the one-time model preparation: arity checks,
/// the discrete rewrite, exterior-data exclusion.
fn initialize(problem: &mut Problem, options: &SolveOptions) -> Result<()> {
    options
        .validate()
        .map_err(BoError::InvalidModel)
        .context("invalid solve options")?;

    let m = problem.model.n_outputs();
    if problem.y_max.len() != m {
        return Err(BoError::InvalidModel(format!(
            "y_max has {} component(s) for a {m}-output model",
            problem.y_max.len()
        ))
        .into());
    }
    if problem.noise_var_priors.len() != m {
        return Err(BoError::InvalidModel(format!(
            "{} noise prior(s) for a {m}-output model",
            problem.noise_var_priors.len()
        ))
        .into());
    }
    if problem.data.n_outputs() != m {
        return Err(BoError::InvalidModel(format!(
            "dataset has {} output row(s) for a {m}-output model",
            problem.data.n_outputs()
        ))
        .into());
    }
    if problem.data.n_inputs() != problem.domain.dim() {
        return Err(BoError::InvalidModel(format!(
            "dataset has {} input row(s) for a {}-dimensional domain",
            problem.data.n_inputs(),
            problem.domain.dim()
        ))
        .into());
    }
    if let Fitness::Linear(c) = &problem.fitness {
        if c.len() != m {
            return Err(BoError::InvalidModel(format!(
                "linear fitness has {} coefficient(s) for a {m}-output model",
                c.len()
            ))
            .into());
        }
    }

    problem.model = problem.model.clone().discretized(&problem.domain);
    problem.data = problem
        .domain
        .exclude_exterior(&problem.data)
        .context("dataset is empty after exterior exclusion")?;

    info!(
        "initialized problem: {} input(s), {m} output(s), {} observation(s)",
        problem.domain.dim(),
        problem.data.len()
    );
    Ok(())
}

fn prepared_acquisition(acquisition: &Acquisition, options: &SolveOptions) -> Acquisition {
    let Acquisition::ExpectedImprovement(ei) = acquisition;
    Acquisition::ExpectedImprovement(
        ExpectedImprovement {
            eps_samples: options.eps_samples,
            ..ei.clone()
        },
    )
}

/// One inference-plus-proposal pass, shared by `solve` and `recommend`.
fn next_candidates(
    problem: &mut Problem,
    fitter: &ModelFitter,
    maximizer: &Maximizer,
    acquisition: &Acquisition,
    rng: &mut StdRng,
) -> Result<DMatrix<f64>> {
    let params = fitter
        .fit(&problem.model, &problem.data, &problem.noise_var_priors)
        .context("parameter inference failed")?;
    problem.params = Some(params);
    maximizer
        .propose(
            acquisition,
            &problem.model,
            problem.params.as_ref().expect("just assigned"),
            &problem.data,
            &problem.fitness,
            &problem.y_max,
            &problem.domain,
            rng,
        )
        .context("acquisition maximization failed")
}

/// Run the optimization loop until the termination condition stops it,
/// returning the problem with its populated dataset and final parameters.
pub fn solve(
    mut problem: Problem,
    fitter: &ModelFitter,
    maximizer: &Maximizer,
    acquisition: &Acquisition,
    term_cond: &mut dyn TermCond,
    options: &SolveOptions,
) -> Result<Problem> {
    initialize(&mut problem, options)?;
    let objective = problem.objective.clone().ok_or(BoError::MissingObjective)?;
    let acquisition = prepared_acquisition(acquisition, options);
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut iteration = 0usize;
    while term_cond.decide(&problem) {
        iteration += 1;
        let candidates = next_candidates(&mut problem, fitter, maximizer, &acquisition, &mut rng)?;

        for c in 0..candidates.ncols() {
            let x = candidates.column(c).into_owned();
            match objective(&x) {
                Ok(y) => {
                    if options.info {
                        info!("iteration {iteration}: evaluated {x:?} -> {y:?}");
                    } else {
                        debug!("iteration {iteration}: evaluated candidate {c}");
                    }
                    problem
                        .data
                        .push(&x, &y)
                        .context("appending evaluation to the dataset")?;
                }
                Err(message) => match options.on_eval_failure {
                    EvalFailurePolicy::Surface => {
                        return Err(BoError::EvaluationFailed(message))
                            .with_context(|| format!("objective raised at {x:?}"));
                    }
                    EvalFailurePolicy::RejectPoint => {
                        warn!("iteration {iteration}: candidate {x:?} rejected: {message}");
                    }
                },
            }
        }
    }
    info!(
        "finished after {iteration} iteration(s) with {} observation(s)",
        problem.data.len()
    );
    Ok(problem)
}

/// One inference-plus-proposal pass without evaluating any objective:
/// the recommendation for the next query point(s), one column per
/// candidate.
pub fn recommend(
    mut problem: Problem,
    fitter: &ModelFitter,
    maximizer: &Maximizer,
    acquisition: &Acquisition,
    options: &SolveOptions,
) -> Result<DMatrix<f64>> {
    initialize(&mut problem, options)?;
    let acquisition = prepared_acquisition(acquisition, options);
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    next_candidates(&mut problem, fitter, maximizer, &acquisition, &mut rng)
}
