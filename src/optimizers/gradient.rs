use super::{clamp_into, Optimizer, OptimizerError, OptimizerOptions};
use nalgebra::DVector;

/// Projected gradient ascent with central finite-difference gradients and a
/// backtracking line search. This is the smooth box-constrained reference
/// backend; an AD-powered solver can replace it behind the same trait by
/// swapping [`gradient_fd`] for its own derivatives.
#[derive(Debug, Clone, Default)]
pub struct GradientAscent {
    pub options: OptimizerOptions,
}

impl GradientAscent {
    pub fn new(options: OptimizerOptions) -> Self {
        Self { options }
    }
}

/// Central finite-difference gradient, the crate's numerical
/// differentiation provider.
pub fn gradient_fd(
    obj: &(dyn Fn(&DVector<f64>) -> f64 + Sync),
    x: &DVector<f64>,
) -> DVector<f64> {
    let n = x.len();
    let mut grad = DVector::zeros(n);
    for i in 0..n {
        let h = 1e-6 * x[i].abs().max(1.0);
        let mut hi = x.clone();
        let mut lo = x.clone();
        hi[i] += h;
        lo[i] -= h;
        grad[i] = (obj(&hi) - obj(&lo)) / (2.0 * h);
    }
    grad
}

impl Optimizer for GradientAscent {
    fn optimize(
        &self,
        obj: &(dyn Fn(&DVector<f64>) -> f64 + Sync),
        start: &DVector<f64>,
        lb: &DVector<f64>,
        ub: &DVector<f64>,
    ) -> Result<(DVector<f64>, f64), OptimizerError> {
        let mut x = start.clone();
        clamp_into(&mut x, lb, ub);
        let mut fx = obj(&x);
        if !fx.is_finite() {
            return Err(OptimizerError::NonFiniteStart);
        }

        for _ in 0..self.options.max_iterations {
            let grad = gradient_fd(obj, &x);
            let gnorm = grad.norm();
            if !gnorm.is_finite() || gnorm < self.options.tolerance {
                break;
            }

            // Backtracking: halve the step until the objective improves.
            let mut step = 1.0 / gnorm.max(1.0);
            let mut improved = false;
            for _ in 0..40 {
                let mut candidate = &x + &grad * step;
                clamp_into(&mut candidate, lb, ub);
                let fc = obj(&candidate);
                if fc.is_finite() && fc > fx {
                    let gain = fc - fx;
                    x = candidate;
                    fx = fc;
                    improved = true;
                    if gain < self.options.tolerance {
                        return Ok((x, fx));
                    }
                    break;
                }
                step *= 0.5;
            }
            if !improved {
                break;
            }
        }
        Ok((x, fx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::dvector;

    #[test]
    fn gradient_fd_matches_analytic() {
        let obj = |x: &DVector<f64>| x[0] * x[0] + 3.0 * x[1];
        let g = gradient_fd(&obj, &dvector![2.0, 0.0]);
        assert_abs_diff_eq!(g[0], 4.0, epsilon = 1e-5);
        assert_abs_diff_eq!(g[1], 3.0, epsilon = 1e-5);
    }

    #[test]
    fn climbs_to_interior_maximum() {
        let opt = GradientAscent::new(OptimizerOptions::default().with_max_iterations(500));
        let obj = |x: &DVector<f64>| -(x[0] - 0.3).powi(2);
        let (arg, _) = opt
            .optimize(&obj, &dvector![-2.0], &dvector![-5.0], &dvector![5.0])
            .unwrap();
        assert_abs_diff_eq!(arg[0], 0.3, epsilon = 1e-3);
    }

    #[test]
    fn stops_on_boundary_when_maximum_is_outside() {
        let opt = GradientAscent::default();
        let obj = |x: &DVector<f64>| x[0];
        let (arg, val) = opt
            .optimize(&obj, &dvector![0.0], &dvector![-1.0], &dvector![1.0])
            .unwrap();
        assert_abs_diff_eq!(arg[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(val, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn rejects_non_finite_start() {
        let opt = GradientAscent::default();
        let obj = |_: &DVector<f64>| f64::NAN;
        assert!(matches!(
            opt.optimize(&obj, &dvector![0.0], &dvector![-1.0], &dvector![1.0]),
            Err(OptimizerError::NonFiniteStart)
        ));
    }
}
