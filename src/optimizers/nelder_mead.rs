use super::{clamp_into, Optimizer, OptimizerError, OptimizerOptions};
use nalgebra::DVector;

/// Derivative-free simplex search, maximizing inside a box by clamping every
/// trial vertex. The standard reflection / expansion / contraction / shrink
/// coefficients.
#[derive(Debug, Clone, Default)]
pub struct NelderMead {
    pub options: OptimizerOptions,
}

const ALPHA: f64 = 1.0;
const GAMMA: f64 = 2.0;
const RHO: f64 = 0.5;
const SIGMA: f64 = 0.5;

impl NelderMead {
    pub fn new(options: OptimizerOptions) -> Self {
        Self { options }
    }

    fn initial_step(start: &DVector<f64>, lb: &DVector<f64>, ub: &DVector<f64>, i: usize) -> f64 {
        let span = ub[i] - lb[i];
        if span.is_finite() {
            (0.1 * span).max(1e-6)
        } else {
            (0.1 * start[i].abs()).max(0.1)
        }
    }
}

impl Optimizer for NelderMead {
    fn optimize(
        &self,
        obj: &(dyn Fn(&DVector<f64>) -> f64 + Sync),
        start: &DVector<f64>,
        lb: &DVector<f64>,
        ub: &DVector<f64>,
    ) -> Result<(DVector<f64>, f64), OptimizerError> {
        let n = start.len();
        let eval = |x: &DVector<f64>| -> f64 {
            let v = obj(x);
            if v.is_nan() {
                f64::NEG_INFINITY
            } else {
                v
            }
        };

        // Simplex of n+1 clamped vertices around the start.
        let mut simplex: Vec<DVector<f64>> = Vec::with_capacity(n + 1);
        let mut clamped_start = start.clone();
        clamp_into(&mut clamped_start, lb, ub);
        simplex.push(clamped_start.clone());
        for i in 0..n {
            let mut v = clamped_start.clone();
            v[i] += Self::initial_step(start, lb, ub, i);
            clamp_into(&mut v, lb, ub);
            simplex.push(v);
        }
        let mut values: Vec<f64> = simplex.iter().map(|v| eval(v)).collect();

        for _ in 0..self.options.max_iterations {
            // Order best-first for maximization.
            let mut order: Vec<usize> = (0..=n).collect();
            order.sort_by(|&a, &b| values[b].partial_cmp(&values[a]).unwrap());
            let reordered: Vec<DVector<f64>> = order.iter().map(|&i| simplex[i].clone()).collect();
            let revalues: Vec<f64> = order.iter().map(|&i| values[i]).collect();
            simplex = reordered;
            values = revalues;

            let spread = values[0] - values[n];
            if spread.abs() < self.options.tolerance {
                break;
            }

            let centroid: DVector<f64> =
                simplex[..n].iter().fold(DVector::zeros(n), |acc, v| acc + v) / n as f64;

            let mut reflected = &centroid + (&centroid - &simplex[n]) * ALPHA;
            clamp_into(&mut reflected, lb, ub);
            let f_reflected = eval(&reflected);

            if f_reflected > values[0] {
                let mut expanded = &centroid + (&reflected - &centroid) * GAMMA;
                clamp_into(&mut expanded, lb, ub);
                let f_expanded = eval(&expanded);
                if f_expanded > f_reflected {
                    simplex[n] = expanded;
                    values[n] = f_expanded;
                } else {
                    simplex[n] = reflected;
                    values[n] = f_reflected;
                }
                continue;
            }

            if f_reflected > values[n - 1] {
                simplex[n] = reflected;
                values[n] = f_reflected;
                continue;
            }

            let mut contracted = &centroid + (&simplex[n] - &centroid) * RHO;
            clamp_into(&mut contracted, lb, ub);
            let f_contracted = eval(&contracted);
            if f_contracted > values[n] {
                simplex[n] = contracted;
                values[n] = f_contracted;
                continue;
            }

            // Shrink toward the best vertex.
            let best = simplex[0].clone();
            for i in 1..=n {
                simplex[i] = &best + (&simplex[i] - &best) * SIGMA;
                clamp_into(&mut simplex[i], lb, ub);
                values[i] = eval(&simplex[i]);
            }
        }

        let best = values
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        if values[best] == f64::NEG_INFINITY {
            return Err(OptimizerError::NonFiniteStart);
        }
        Ok((simplex[best].clone(), values[best]))
    }
}
