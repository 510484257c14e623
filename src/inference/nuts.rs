use super::{softplus, InferenceError, ParamLayout};
use crate::data::Dataset;
use crate::likelihood::log_likelihood;
use crate::models::{FitParams, Model};
use crate::optimizers::gradient::gradient_fd;
use crate::priors::Prior;
use log::{debug, info, warn};
use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// No-U-Turn sampler settings. The kept pool holds
/// `chain_count * samples_per_chain` draws: each chain discards `warmup`
/// adaptation draws, then keeps every `leap`-th of the next
/// `leap * samples_per_chain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NutsConfig {
    pub chain_count: usize,
    pub warmup: usize,
    pub samples_per_chain: usize,
    pub leap: usize,
    pub parallel: bool,
    pub seed: Option<u64>,
    /// Dual-averaging target acceptance statistic.
    pub target_accept: f64,
    pub max_depth: usize,
    /// A chain whose divergent-transition share exceeds this is dropped.
    pub max_divergence_share: f64,
    /// A chain whose mean acceptance falls below this is dropped.
    pub min_acceptance: f64,
}

impl Default for NutsConfig {
    fn default() -> Self {
        Self {
            chain_count: 4,
            warmup: 200,
            samples_per_chain: 250,
            leap: 1,
            parallel: true,
            seed: Some(12345),
            target_accept: 0.8,
            max_depth: 10,
            max_divergence_share: 0.25,
            min_acceptance: 0.1,
        }
    }
}

impl NutsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chains(mut self, chain_count: usize) -> Self {
        self.chain_count = chain_count;
        self
    }

    pub fn with_warmup(mut self, warmup: usize) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_samples(mut self, samples_per_chain: usize) -> Self {
        self.samples_per_chain = samples_per_chain;
        self
    }

    pub fn with_leap(mut self, leap: usize) -> Self {
        self.leap = leap;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.chain_count == 0 {
            return Err("chain_count must be positive".to_string());
        }
        if self.samples_per_chain == 0 {
            return Err("samples_per_chain must be positive".to_string());
        }
        if self.leap == 0 {
            return Err("leap must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.target_accept) {
            return Err("target_accept must lie in (0, 1)".to_string());
        }
        if self.max_depth == 0 {
            return Err("max_depth must be positive".to_string());
        }
        Ok(())
    }
}

// Dual-averaging constants (Hoffman & Gelman).
const DA_GAMMA: f64 = 0.05;
const DA_T0: f64 = 10.0;
const DA_KAPPA: f64 = 0.75;
/// Energy error beyond which a transition counts as divergent.
const DELTA_MAX: f64 = 1000.0;

fn ln_sigmoid(s: f64) -> f64 {
    -softplus(-s)
}

struct Tree {
    q_minus: DVector<f64>,
    p_minus: DVector<f64>,
    q_plus: DVector<f64>,
    p_plus: DVector<f64>,
    q_prop: DVector<f64>,
    n: usize,
    stop: bool,
    alpha_sum: f64,
    n_alpha: usize,
    divergent: bool,
}

fn leapfrog(
    logp: &(dyn Fn(&DVector<f64>) -> f64 + Sync),
    q: &DVector<f64>,
    p: &DVector<f64>,
    eps: f64,
) -> (DVector<f64>, DVector<f64>, f64) {
    let grad = gradient_fd(logp, q);
    let p_half = p + grad * (eps / 2.0);
    let q_new = q + &p_half * eps;
    let grad_new = gradient_fd(logp, &q_new);
    let p_new = p_half + grad_new * (eps / 2.0);
    let h = logp(&q_new) - 0.5 * p_new.dot(&p_new);
    (q_new, p_new, h)
}

fn uturn(
    q_minus: &DVector<f64>,
    q_plus: &DVector<f64>,
    p_minus: &DVector<f64>,
    p_plus: &DVector<f64>,
) -> bool {
    let dq = q_plus - q_minus;
    dq.dot(p_minus) < 0.0 || dq.dot(p_plus) < 0.0
}

#[allow(clippy::too_many_arguments)]
fn build_tree<R: Rng>(
    rng: &mut R,
    logp: &(dyn Fn(&DVector<f64>) -> f64 + Sync),
    q: &DVector<f64>,
    p: &DVector<f64>,
    ln_u: f64,
    dir: f64,
    depth: usize,
    eps: f64,
    h0: f64,
) -> Tree {
    if depth == 0 {
        let (q_new, p_new, h) = leapfrog(logp, q, p, dir * eps);
        let h = if h.is_nan() { f64::NEG_INFINITY } else { h };
        let divergent = ln_u > h + DELTA_MAX;
        let alpha = (h - h0).exp().min(1.0);
        return Tree {
            q_minus: q_new.clone(),
            p_minus: p_new.clone(),
            q_plus: q_new.clone(),
            p_plus: p_new,
            q_prop: q_new,
            n: usize::from(ln_u <= h),
            stop: divergent,
            alpha_sum: if alpha.is_nan() { 0.0 } else { alpha },
            n_alpha: 1,
            divergent,
        };
    }

    let mut left = build_tree(rng, logp, q, p, ln_u, dir, depth - 1, eps, h0);
    if left.stop {
        return left;
    }
    let right = if dir < 0.0 {
        build_tree(rng, logp, &left.q_minus.clone(), &left.p_minus.clone(), ln_u, dir, depth - 1, eps, h0)
    } else {
        build_tree(rng, logp, &left.q_plus.clone(), &left.p_plus.clone(), ln_u, dir, depth - 1, eps, h0)
    };

    if dir < 0.0 {
        left.q_minus = right.q_minus.clone();
        left.p_minus = right.p_minus.clone();
    } else {
        left.q_plus = right.q_plus.clone();
        left.p_plus = right.p_plus.clone();
    }
    let total = left.n + right.n;
    if right.n > 0 && rng.gen::<f64>() < right.n as f64 / total.max(1) as f64 {
        left.q_prop = right.q_prop;
    }
    left.n = total;
    left.alpha_sum += right.alpha_sum;
    left.n_alpha += right.n_alpha;
    left.divergent |= right.divergent;
    left.stop = right.stop
        || uturn(&left.q_minus, &left.q_plus, &left.p_minus, &left.p_plus);
    left
}

/// One NUTS transition; returns the new position, the mean acceptance
/// statistic and whether any divergence occurred.
fn transition<R: Rng>(
    rng: &mut R,
    logp: &(dyn Fn(&DVector<f64>) -> f64 + Sync),
    q: &DVector<f64>,
    eps: f64,
    max_depth: usize,
) -> (DVector<f64>, f64, bool) {
    let dim = q.len();
    let p0 = DVector::from_fn(dim, |_, _| rng.sample::<f64, _>(StandardNormal));
    let h0 = logp(q) - 0.5 * p0.dot(&p0);
    if !h0.is_finite() {
        return (q.clone(), 0.0, true);
    }
    let ln_u = h0 + rng.gen::<f64>().ln();

    let mut q_minus = q.clone();
    let mut q_plus = q.clone();
    let mut p_minus = p0.clone();
    let mut p_plus = p0;
    let mut q_curr = q.clone();
    let mut n = 1usize;
    let mut alpha_sum = 0.0;
    let mut n_alpha = 0usize;
    let mut divergent = false;

    for depth in 0..max_depth {
        let dir: f64 = if rng.gen::<bool>() { 1.0 } else { -1.0 };
        let tree = if dir < 0.0 {
            build_tree(rng, logp, &q_minus.clone(), &p_minus.clone(), ln_u, dir, depth, eps, h0)
        } else {
            build_tree(rng, logp, &q_plus.clone(), &p_plus.clone(), ln_u, dir, depth, eps, h0)
        };
        if dir < 0.0 {
            q_minus = tree.q_minus.clone();
            p_minus = tree.p_minus.clone();
        } else {
            q_plus = tree.q_plus.clone();
            p_plus = tree.p_plus.clone();
        }
        alpha_sum += tree.alpha_sum;
        n_alpha += tree.n_alpha;
        divergent |= tree.divergent;
        if tree.stop {
            break;
        }
        if tree.n > 0 && rng.gen::<f64>() < tree.n as f64 / n as f64 {
            q_curr = tree.q_prop.clone();
        }
        n += tree.n;
        if uturn(&q_minus, &q_plus, &p_minus, &p_plus) {
            break;
        }
    }

    let mean_alpha = if n_alpha > 0 {
        alpha_sum / n_alpha as f64
    } else {
        0.0
    };
    (q_curr, mean_alpha, divergent)
}

struct ChainStats {
    kept: Vec<DVector<f64>>,
    divergence_share: f64,
    mean_acceptance: f64,
}

fn run_chain(
    layout: &ParamLayout,
    logp: &(dyn Fn(&DVector<f64>) -> f64 + Sync),
    config: &NutsConfig,
    seed: u64,
) -> Result<ChainStats, String> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut q = layout.sample_start(&mut rng);
    let mut attempts = 0;
    while !logp(&q).is_finite() {
        attempts += 1;
        if attempts > 50 {
            return Err("no finite starting point found in 50 prior draws".to_string());
        }
        q = layout.sample_start(&mut rng);
    }

    let mut eps: f64 = 0.1;
    let mu = (10.0 * eps).ln();
    let mut h_bar = 0.0;
    let mut log_eps_bar = 0.0;

    let total_draws = config.leap * config.samples_per_chain;
    let mut kept = Vec::with_capacity(config.samples_per_chain);
    let mut divergences = 0usize;
    let mut alpha_acc = 0.0;
    let transitions = config.warmup + total_draws;

    for m in 1..=transitions {
        let (q_new, alpha, was_divergent) = transition(&mut rng, logp, &q, eps, config.max_depth);
        q = q_new;
        alpha_acc += alpha;
        if was_divergent {
            divergences += 1;
        }

        if m <= config.warmup {
            let m_f = m as f64;
            h_bar = (1.0 - 1.0 / (m_f + DA_T0)) * h_bar
                + (config.target_accept - alpha) / (m_f + DA_T0);
            let log_eps = mu - m_f.sqrt() / DA_GAMMA * h_bar;
            let eta = m_f.powf(-DA_KAPPA);
            log_eps_bar = eta * log_eps + (1.0 - eta) * log_eps_bar;
            eps = if m == config.warmup {
                log_eps_bar.exp()
            } else {
                log_eps.exp()
            };
        } else if (m - config.warmup) % config.leap == 0 {
            kept.push(q.clone());
        }
    }

    let divergence_share = divergences as f64 / transitions as f64;
    let mean_acceptance = alpha_acc / transitions as f64;
    if divergence_share > config.max_divergence_share {
        return Err(format!(
            "divergent share {divergence_share:.2} exceeds {:.2}",
            config.max_divergence_share
        ));
    }
    if mean_acceptance < config.min_acceptance {
        return Err(format!(
            "mean acceptance {mean_acceptance:.2} below {:.2}",
            config.min_acceptance
        ));
    }
    Ok(ChainStats {
        kept,
        divergence_share,
        mean_acceptance,
    })
}

/// Sample the joint posterior of the free parameters with NUTS.
///
/// Positive coordinates are softplus-reparameterized; the sampler works in
/// the unconstrained space with the Jacobian term included. Chain RNG
/// streams are seeded independently, so a fixed seed reproduces the pool
/// bit-for-bit regardless of `parallel`.
pub fn sample_nuts(
    config: &NutsConfig,
    model: &Model,
    data: &Dataset,
    noise_priors: &[Prior],
) -> Result<Vec<FitParams>, InferenceError> {
    config.validate().map_err(InferenceError::InvalidConfig)?;
    let layout = ParamLayout::of(model, noise_priors);
    info!(
        "NUTS over {} free parameter(s): {} chain(s) x {} sample(s), warmup {}, thinning {}",
        layout.len(),
        config.chain_count,
        config.samples_per_chain,
        config.warmup,
        config.leap
    );

    let logp = |q: &DVector<f64>| -> f64 {
        let params = layout.unpack(q);
        let ll = log_likelihood(model, data, noise_priors, &params);
        if !ll.is_finite() {
            return f64::NEG_INFINITY;
        }
        // Jacobian of the softplus reparameterization.
        let jac: f64 = q
            .iter()
            .zip(layout.softplus_mask())
            .filter(|(_, &m)| m)
            .map(|(&s, _)| ln_sigmoid(s))
            .sum();
        ll + jac
    };

    let base_seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
    let run = |c: usize| run_chain(&layout, &logp, config, base_seed.wrapping_add(c as u64));

    let outcomes: Vec<Result<ChainStats, String>> = if config.parallel {
        (0..config.chain_count).into_par_iter().map(run).collect()
    } else {
        (0..config.chain_count).map(run).collect()
    };

    // Chain-major pooling of the surviving chains.
    let mut pool = Vec::new();
    let mut failures = Vec::new();
    for (c, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(stats) => {
                debug!(
                    "chain {c}: acceptance {:.2}, divergence share {:.3}",
                    stats.mean_acceptance, stats.divergence_share
                );
                pool.extend(stats.kept.iter().map(|q| layout.unpack(q)));
            }
            Err(msg) => {
                warn!("chain {c} dropped: {msg}");
                failures.push(format!("chain {c}: {msg}"));
            }
        }
    }
    if pool.is_empty() {
        return Err(InferenceError::SamplingFailed(failures.join("; ")));
    }
    info!("NUTS kept {} posterior draw(s)", pool.len());
    Ok(pool)
}
