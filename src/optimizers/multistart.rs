use super::{Optimizer, OptimizerError};
use log::warn;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Run `optimizer` from every column of `starts` and keep the best result.
///
/// Individual start failures are contained: they are logged, counted and
/// scored as negative infinity. Only the aggregate case, every start
/// failing, surfaces as [`OptimizerError::OptimizationFailed`]. Results are
/// collected in start-index order and ties go to the lowest start index.
pub fn multistart(
    optimizer: &dyn Optimizer,
    obj: &(dyn Fn(&DVector<f64>) -> f64 + Sync),
    starts: &DMatrix<f64>,
    lb: &DVector<f64>,
    ub: &DVector<f64>,
    parallel: bool,
) -> Result<(DVector<f64>, f64), OptimizerError> {
    let n_starts = starts.ncols();
    debug_assert!(n_starts >= 1);
    let failures = AtomicUsize::new(0);

    let run = |s: usize| -> Option<(DVector<f64>, f64)> {
        let start = starts.column(s).into_owned();
        match optimizer.optimize(obj, &start, lb, ub) {
            Ok((arg, val)) if val.is_finite() => Some((arg, val)),
            Ok((_, val)) => {
                failures.fetch_add(1, Ordering::Relaxed);
                warn!("start {s} produced non-finite objective {val}; discarded");
                None
            }
            Err(err) => {
                failures.fetch_add(1, Ordering::Relaxed);
                warn!("start {s} failed: {err}");
                None
            }
        }
    };

    // Either path preserves start-index order in the result vector; workers
    // never share optimizer state.
    let results: Vec<Option<(DVector<f64>, f64)>> = if parallel {
        (0..n_starts).into_par_iter().map(run).collect()
    } else {
        (0..n_starts).map(run).collect()
    };

    let failed = failures.load(Ordering::Relaxed);
    let mut best: Option<(DVector<f64>, f64)> = None;
    for result in results.into_iter().flatten() {
        match &best {
            Some((_, bv)) if result.1 <= *bv => {}
            _ => best = Some(result),
        }
    }
    best.ok_or(OptimizerError::OptimizationFailed {
        started: n_starts,
        failed,
    })
}
