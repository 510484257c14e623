use super::OptimizerError;
use nalgebra::{DMatrix, DVector};
use rand::seq::SliceRandom;
use rand::Rng;

/// Latin hypercube start points over `[lb, ub]`: one stratified draw per
/// start and coordinate, columns are points. Requires at least two starts
/// by construction (a single stratum is plain uniform sampling).
pub fn latin_hypercube<R: Rng>(
    rng: &mut R,
    lb: &DVector<f64>,
    ub: &DVector<f64>,
    count: usize,
) -> Result<DMatrix<f64>, OptimizerError> {
    if count < 2 {
        return Err(OptimizerError::TooFewStarts { needed: 2, got: count });
    }
    let n = lb.len();
    let mut out = DMatrix::zeros(n, count);
    let mut strata: Vec<usize> = (0..count).collect();
    for i in 0..n {
        strata.shuffle(rng);
        for (s, &stratum) in strata.iter().enumerate() {
            let u: f64 = rng.gen();
            let frac = (stratum as f64 + u) / count as f64;
            out[(i, s)] = lb[i] + frac * (ub[i] - lb[i]);
        }
    }
    Ok(out)
}

/// Independent uniform start points over `[lb, ub]`, columns are points.
pub fn uniform_starts<R: Rng>(
    rng: &mut R,
    lb: &DVector<f64>,
    ub: &DVector<f64>,
    count: usize,
) -> DMatrix<f64> {
    let n = lb.len();
    DMatrix::from_fn(n, count, |i, _| rng.gen_range(lb[i]..=ub[i]))
}
