pub mod gradient;
pub mod multistart;
pub mod nelder_mead;
pub mod starts;

pub use gradient::GradientAscent;
pub use multistart::multistart;
pub use nelder_mead::NelderMead;
pub use starts::{latin_hypercube, uniform_starts};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("All {started} optimization starts failed ({failed} failures)")]
    OptimizationFailed { started: usize, failed: usize },

    #[error("Objective returned a non-finite value at the start point")]
    NonFiniteStart,

    #[error("Start generation needs at least {needed} points, got {got}")]
    TooFewStarts { needed: usize, got: usize },
}

/// Shared knobs of the bundled backends. Tolerance is on the objective
/// spread (simplex) or step improvement (gradient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-8,
        }
    }
}

impl OptimizerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_iterations == 0 {
            return Err("max_iterations must be positive".to_string());
        }
        if self.tolerance <= 0.0 {
            return Err("tolerance must be positive".to_string());
        }
        Ok(())
    }
}

/// Bundled backend selection. External solvers (CMA-ES, interior-point,
/// MMA) plug in by implementing [`Optimizer`] directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    NelderMead,
    GradientAscent,
}

impl BackendKind {
    pub fn build(&self, options: OptimizerOptions) -> Box<dyn Optimizer> {
        match self {
            Self::NelderMead => Box::new(NelderMead::new(options)),
            Self::GradientAscent => Box::new(GradientAscent::new(options)),
        }
    }
}

/// The contract the engine requires from any optimization backend: maximize
/// `obj` inside the box `[lb, ub]` from a single start point. Heavier
/// external solvers plug in through this same trait.
pub trait Optimizer: Send + Sync {
    fn optimize(
        &self,
        obj: &(dyn Fn(&DVector<f64>) -> f64 + Sync),
        start: &DVector<f64>,
        lb: &DVector<f64>,
        ub: &DVector<f64>,
    ) -> Result<(DVector<f64>, f64), OptimizerError>;
}

pub(crate) fn clamp_into(x: &mut DVector<f64>, lb: &DVector<f64>, ub: &DVector<f64>) {
    for i in 0..x.len() {
        x[i] = x[i].clamp(lb[i], ub[i]);
    }
}
