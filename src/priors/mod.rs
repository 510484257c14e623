use nalgebra::DVector;
use rand::Rng;
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PriorError {
    #[error("Invalid prior parameter: {0}")]
    InvalidParameter(String),
}

/// Univariate prior distributions over model parameters, length-scales and
/// noise variances. Each prior supports sampling, log-density evaluation and
/// exposes its support for deriving box constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Prior {
    Normal { mean: f64, std: f64 },
    LogNormal { location: f64, scale: f64 },
    Uniform { lo: f64, hi: f64 },
    Gamma { shape: f64, rate: f64 },
    TruncatedNormal { mean: f64, std: f64, lo: f64, hi: f64 },
}

fn require(cond: bool, msg: &str) -> Result<(), PriorError> {
    if cond {
        Ok(())
    } else {
        Err(PriorError::InvalidParameter(msg.to_string()))
    }
}

impl Prior {
    pub fn normal(mean: f64, std: f64) -> Result<Self, PriorError> {
        require(mean.is_finite() && std.is_finite() && std > 0.0, "Normal needs finite mean and std > 0")?;
        Ok(Self::Normal { mean, std })
    }

    pub fn log_normal(location: f64, scale: f64) -> Result<Self, PriorError> {
        require(
            location.is_finite() && scale.is_finite() && scale > 0.0,
            "LogNormal needs finite location and scale > 0",
        )?;
        Ok(Self::LogNormal { location, scale })
    }

    pub fn uniform(lo: f64, hi: f64) -> Result<Self, PriorError> {
        require(lo.is_finite() && hi.is_finite() && lo < hi, "Uniform needs lo < hi")?;
        Ok(Self::Uniform { lo, hi })
    }

    pub fn gamma(shape: f64, rate: f64) -> Result<Self, PriorError> {
        require(shape > 0.0 && rate > 0.0, "Gamma needs shape > 0 and rate > 0")?;
        Ok(Self::Gamma { shape, rate })
    }

    pub fn truncated_normal(mean: f64, std: f64, lo: f64, hi: f64) -> Result<Self, PriorError> {
        require(std > 0.0 && lo < hi, "TruncatedNormal needs std > 0 and lo < hi")?;
        Ok(Self::TruncatedNormal { mean, std, lo, hi })
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        match *self {
            Self::Normal { mean, std } => {
                rand_distr::Normal::new(mean, std).expect("validated at construction").sample(rng)
            }
            Self::LogNormal { location, scale } => rand_distr::LogNormal::new(location, scale)
                .expect("validated at construction")
                .sample(rng),
            Self::Uniform { lo, hi } => rng.gen_range(lo..hi),
            Self::Gamma { shape, rate } => rand_distr::Gamma::new(shape, 1.0 / rate)
                .expect("validated at construction")
                .sample(rng),
            Self::TruncatedNormal { mean, std, lo, hi } => {
                let normal = rand_distr::Normal::new(mean, std).expect("validated at construction");
                // Rejection sampling; the acceptance region is fixed so this
                // terminates with probability one.
                loop {
                    let v = normal.sample(rng);
                    if v >= lo && v <= hi {
                        return v;
                    }
                }
            }
        }
    }

    /// Log-density at `v`; negative infinity outside the support.
    pub fn logpdf(&self, v: f64) -> f64 {
        if !v.is_finite() {
            return f64::NEG_INFINITY;
        }
        match *self {
            Self::Normal { mean, std } => statrs::distribution::Normal::new(mean, std)
                .expect("validated at construction")
                .ln_pdf(v),
            Self::LogNormal { location, scale } => {
                if v <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                statrs::distribution::LogNormal::new(location, scale)
                    .expect("validated at construction")
                    .ln_pdf(v)
            }
            Self::Uniform { lo, hi } => {
                if v < lo || v > hi {
                    f64::NEG_INFINITY
                } else {
                    -(hi - lo).ln()
                }
            }
            Self::Gamma { shape, rate } => {
                if v <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                statrs::distribution::Gamma::new(shape, rate)
                    .expect("validated at construction")
                    .ln_pdf(v)
            }
            Self::TruncatedNormal { mean, std, lo, hi } => {
                if v < lo || v > hi {
                    return f64::NEG_INFINITY;
                }
                let base = statrs::distribution::Normal::new(mean, std)
                    .expect("validated at construction");
                let mass = base.cdf(hi) - base.cdf(lo);
                base.ln_pdf(v) - mass.ln()
            }
        }
    }

    /// Support bounds, used to derive box constraints for MLE.
    pub fn support(&self) -> (f64, f64) {
        match *self {
            Self::Normal { .. } => (f64::NEG_INFINITY, f64::INFINITY),
            Self::LogNormal { .. } | Self::Gamma { .. } => (0.0, f64::INFINITY),
            Self::Uniform { lo, hi } => (lo, hi),
            Self::TruncatedNormal { lo, hi, .. } => (lo, hi),
        }
    }
}

/// Element-wise sampling over a slice of priors.
pub fn sample_all<R: Rng>(priors: &[Prior], rng: &mut R) -> DVector<f64> {
    DVector::from_iterator(priors.len(), priors.iter().map(|p| p.sample(rng)))
}

/// Sum of element-wise log-densities; negative infinity dominates.
pub fn logpdf_sum(priors: &[Prior], values: &DVector<f64>) -> f64 {
    debug_assert_eq!(priors.len(), values.len());
    priors
        .iter()
        .zip(values.iter())
        .map(|(p, &v)| p.logpdf(v))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn construction_validates_parameters() {
        assert!(Prior::normal(0.0, -1.0).is_err());
        assert!(Prior::uniform(1.0, 1.0).is_err());
        assert!(Prior::gamma(0.0, 1.0).is_err());
    }

    #[test]
    fn standard_normal_logpdf() {
        let p = Prior::normal(0.0, 1.0).unwrap();
        let expected = -0.5 * (2.0 * std::f64::consts::PI).ln();
        assert_abs_diff_eq!(p.logpdf(0.0), expected, epsilon = 1e-12);
    }

    #[test]
    fn logpdf_is_neg_inf_outside_support() {
        assert_eq!(Prior::gamma(2.0, 1.0).unwrap().logpdf(-1.0), f64::NEG_INFINITY);
        assert_eq!(Prior::uniform(0.0, 1.0).unwrap().logpdf(2.0), f64::NEG_INFINITY);
        assert_eq!(
            Prior::truncated_normal(0.0, 1.0, -1.0, 1.0).unwrap().logpdf(1.5),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn truncated_normal_samples_stay_inside() {
        let p = Prior::truncated_normal(0.0, 2.0, -1.0, 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let v = p.sample(&mut rng);
            assert!((-1.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn truncated_normal_renormalizes() {
        // Truncating a standard normal to [-1, 1] must raise the density.
        let base = Prior::normal(0.0, 1.0).unwrap();
        let trunc = Prior::truncated_normal(0.0, 1.0, -1.0, 1.0).unwrap();
        assert!(trunc.logpdf(0.0) > base.logpdf(0.0));
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let p = Prior::log_normal(0.0, 1.0).unwrap();
        let a: Vec<f64> = {
            let mut rng = StdRng::seed_from_u64(42);
            (0..5).map(|_| p.sample(&mut rng)).collect()
        };
        let b: Vec<f64> = {
            let mut rng = StdRng::seed_from_u64(42);
            (0..5).map(|_| p.sample(&mut rng)).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn vector_helpers_apply_element_wise() {
        let priors = vec![Prior::normal(0.0, 1.0).unwrap(), Prior::uniform(0.0, 2.0).unwrap()];
        let v = nalgebra::dvector![0.0, 1.0];
        let expected = priors[0].logpdf(0.0) + priors[1].logpdf(1.0);
        assert_abs_diff_eq!(logpdf_sum(&priors, &v), expected, epsilon = 1e-12);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(sample_all(&priors, &mut rng).len(), 2);
    }
}
