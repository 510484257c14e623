pub mod acquisition;
pub mod bo;
pub mod data;
pub mod domain;
pub mod inference;
pub mod likelihood;
pub mod models;
pub mod optimizers;
pub mod priors;

pub use acquisition::{
    Acquisition, AcquisitionMaximizer, BatchMaximizer, ExpectedImprovement, Fitness, Maximizer,
};
pub use bo::{
    recommend, solve, EvalFailurePolicy, IterLimit, ObjectiveFn, Problem, SolveOptions, TermCond,
};
pub use data::Dataset;
pub use domain::Domain;
pub use inference::{FitOutcome, FitParams, MleConfig, ModelFitter, NutsConfig};
pub use models::{GpModel, Kernel, Model, ParametricModel, Posterior, SemiparametricModel};
pub use priors::Prior;
