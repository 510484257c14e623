use crate::data::Dataset;
use nalgebra::DVector;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Dimension mismatch: domain has {expected} coordinates, point has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Integrality check tolerance for discrete coordinates.
const INT_TOL: f64 = 1e-9;

type FeasibilityPredicate = Arc<dyn Fn(&DVector<f64>) -> bool + Send + Sync>;

/// Box-bounded input domain with an optional discrete-coordinate mask and an
/// optional general feasibility predicate.
#[derive(Clone)]
pub struct Domain {
    lb: DVector<f64>,
    ub: DVector<f64>,
    discrete: Vec<bool>,
    constraint: Option<FeasibilityPredicate>,
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("lb", &self.lb)
            .field("ub", &self.ub)
            .field("discrete", &self.discrete)
            .field("constrained", &self.constraint.is_some())
            .finish()
    }
}

impl Domain {
    /// Purely continuous box domain.
    pub fn continuous(lb: DVector<f64>, ub: DVector<f64>) -> Result<Self, DomainError> {
        if lb.len() != ub.len() {
            return Err(DomainError::InvalidDomain(format!(
                "bound length mismatch: {} vs {}",
                lb.len(),
                ub.len()
            )));
        }
        if lb.is_empty() {
            return Err(DomainError::InvalidDomain("empty bounds".to_string()));
        }
        for i in 0..lb.len() {
            if !lb[i].is_finite() || !ub[i].is_finite() {
                return Err(DomainError::InvalidDomain(format!(
                    "non-finite bound at coordinate {i}"
                )));
            }
            if lb[i] > ub[i] {
                return Err(DomainError::InvalidDomain(format!(
                    "lb[{i}] = {} exceeds ub[{i}] = {}",
                    lb[i], ub[i]
                )));
            }
        }
        let dim = lb.len();
        Ok(Self {
            lb,
            ub,
            discrete: vec![false; dim],
            constraint: None,
        })
    }

    /// Mark coordinates as integer-valued. Every flagged interval must admit
    /// at least one integer.
    pub fn with_discrete(mut self, discrete: Vec<bool>) -> Result<Self, DomainError> {
        if discrete.len() != self.dim() {
            return Err(DomainError::DimensionMismatch {
                expected: self.dim(),
                got: discrete.len(),
            });
        }
        for (i, &d) in discrete.iter().enumerate() {
            if d && self.lb[i].ceil() > self.ub[i].floor() {
                return Err(DomainError::InvalidDomain(format!(
                    "discrete coordinate {i} admits no integer in [{}, {}]",
                    self.lb[i], self.ub[i]
                )));
            }
        }
        self.discrete = discrete;
        Ok(self)
    }

    pub fn with_constraint<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&DVector<f64>) -> bool + Send + Sync + 'static,
    {
        self.constraint = Some(Arc::new(predicate));
        self
    }

    pub fn dim(&self) -> usize {
        self.lb.len()
    }

    pub fn lower(&self) -> &DVector<f64> {
        &self.lb
    }

    pub fn upper(&self) -> &DVector<f64> {
        &self.ub
    }

    pub fn discrete_mask(&self) -> &[bool] {
        &self.discrete
    }

    pub fn has_discrete(&self) -> bool {
        self.discrete.iter().any(|&d| d)
    }

    /// Feasibility over bounds, integrality and the general predicate.
    pub fn in_domain(&self, x: &DVector<f64>) -> bool {
        if x.len() != self.dim() {
            return false;
        }
        for i in 0..self.dim() {
            if x[i] < self.lb[i] || x[i] > self.ub[i] {
                return false;
            }
            if self.discrete[i] && (x[i] - x[i].round()).abs() > INT_TOL {
                return false;
            }
        }
        match &self.constraint {
            Some(pred) => pred(x),
            None => true,
        }
    }

    /// Round discrete coordinates to the nearest integer inside the bounds.
    /// Continuous coordinates pass through unchanged.
    pub fn project_discrete(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut out = x.clone();
        for i in 0..self.dim().min(x.len()) {
            if self.discrete[i] {
                let nearest = x[i].round();
                let clamped = nearest.clamp(self.lb[i].ceil(), self.ub[i].floor());
                if clamped != nearest {
                    log::debug!(
                        "discrete rounding of coordinate {i} landed at {nearest} outside [{}, {}]; clamped to {clamped}",
                        self.lb[i],
                        self.ub[i]
                    );
                }
                out[i] = clamped;
            }
        }
        out
    }

    /// Drop dataset columns whose input is infeasible, preserving the
    /// relative order of survivors. An empty result is a structural error.
    pub fn exclude_exterior(&self, data: &Dataset) -> Result<Dataset, DomainError> {
        let keep: Vec<bool> = (0..data.len())
            .map(|i| self.in_domain(&data.input(i)))
            .collect();
        let dropped = keep.iter().filter(|&&k| !k).count();
        if dropped > 0 {
            log::warn!("excluding {dropped} exterior observation(s) from the dataset");
        }
        data.retain_columns(&keep).ok_or_else(|| {
            DomainError::InvalidDomain("no observation lies inside the domain".to_string())
        })
    }

    /// Move `x` at least `alpha` strictly inside the bounds, as required by
    /// interior-point starts. Fails when some interval is narrower than
    /// `2 * alpha`.
    pub fn interiorize(&self, x: &DVector<f64>, alpha: f64) -> Result<DVector<f64>, DomainError> {
        for i in 0..self.dim() {
            if self.ub[i] - self.lb[i] < 2.0 * alpha {
                return Err(DomainError::InvalidDomain(format!(
                    "interval [{}, {}] at coordinate {i} is narrower than 2 * {alpha}",
                    self.lb[i], self.ub[i]
                )));
            }
        }
        let mut out = x.clone();
        let mut adjusted = false;
        for i in 0..self.dim() {
            let clamped = x[i].clamp(self.lb[i] + alpha, self.ub[i] - alpha);
            if clamped != x[i] {
                adjusted = true;
            }
            out[i] = clamped;
        }
        if adjusted {
            log::debug!("start point moved off the boundary by {alpha}");
        }
        Ok(out)
    }

    /// Uniform draw from the box, with discrete coordinates rounded in.
    pub fn sample_uniform<R: Rng>(&self, rng: &mut R) -> DVector<f64> {
        let raw = DVector::from_fn(self.dim(), |i, _| rng.gen_range(self.lb[i]..=self.ub[i]));
        self.project_discrete(&raw)
    }

    pub fn span(&self) -> DVector<f64> {
        &self.ub - &self.lb
    }
}
