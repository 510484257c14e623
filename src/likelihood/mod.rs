use crate::data::Dataset;
use crate::models::gp::cholesky_with_jitter;
use crate::models::{FitParams, Model};
use crate::priors::{logpdf_sum, Prior};
use nalgebra::{DMatrix, DVector};

const LN_2PI: f64 = 1.8378770664093453;

/// Univariate Gaussian log-density.
pub fn gaussian_ln_pdf(y: f64, mean: f64, var: f64) -> f64 {
    if var <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let r = y - mean;
    -0.5 * (r * r / var + var.ln() + LN_2PI)
}

/// Joint log-likelihood of the data under `params`, plus the log-priors of
/// every present parameter segment. Any non-finite intermediate collapses to
/// negative infinity so invalid samples are rejected rather than propagated.
pub fn log_likelihood(
    model: &Model,
    data: &Dataset,
    noise_priors: &[Prior],
    params: &FitParams,
) -> f64 {
    if params.noise_var.iter().any(|&v| !v.is_finite() || v <= 0.0) {
        return f64::NEG_INFINITY;
    }
    if let Some(ls) = &params.lengthscales {
        if ls.iter().any(|&v| !v.is_finite() || v <= 0.0) {
            return f64::NEG_INFINITY;
        }
    }

    let data_term = match model {
        Model::Parametric(m) => {
            let theta = match &params.theta {
                Some(t) => t,
                None => return f64::NEG_INFINITY,
            };
            let mut acc = 0.0;
            for i in 0..data.len() {
                let pred = m.predict(&data.input(i), theta);
                for j in 0..m.n_outputs() {
                    acc += gaussian_ln_pdf(data.outputs()[(j, i)], pred[j], params.noise_var[j]);
                }
            }
            acc
        }
        Model::Gp(m) => {
            gp_data_term(m.kernel(), params, data, |x| m.mean_at(x), |x| m.map_input(x))
        }
        Model::Semiparametric(m) => {
            let theta = match &params.theta {
                Some(t) => t,
                None => return f64::NEG_INFINITY,
            };
            let mean = m.mean_with(theta);
            gp_data_term(
                m.gp().kernel(),
                params,
                data,
                move |x| mean(x),
                |x| m.gp().map_input(x),
            )
        }
    };

    let mut total = data_term;
    if let Some(theta) = &params.theta {
        total += logpdf_sum(model.theta_priors(), theta);
    }
    if let Some(ls) = &params.lengthscales {
        for (j, priors) in model.lengthscale_priors().iter().enumerate() {
            total += logpdf_sum(priors, &ls.column(j).into_owned());
        }
    }
    total += logpdf_sum(noise_priors, &params.noise_var);

    if total.is_nan() {
        f64::NEG_INFINITY
    } else {
        total
    }
}

/// Per-output Gaussian process marginal likelihood,
/// `sum_j log N(Y_j; mu0_j(X), K_j)`, with the log-determinant taken from
/// the Cholesky factor diagonal.
fn gp_data_term<Mu, Map>(
    kernel: &crate::models::Kernel,
    params: &FitParams,
    data: &Dataset,
    mean: Mu,
    map_input: Map,
) -> f64
where
    Mu: Fn(&DVector<f64>) -> DVector<f64>,
    Map: Fn(&DVector<f64>) -> DVector<f64>,
{
    let lengthscales = match &params.lengthscales {
        Some(ls) => ls,
        None => return f64::NEG_INFINITY,
    };
    let k = data.len();
    let mut x_train = DMatrix::zeros(data.n_inputs(), k);
    for i in 0..k {
        x_train.set_column(i, &map_input(&data.input(i)));
    }
    let mu0: Vec<DVector<f64>> = (0..k)
        .map(|i| mean(&x_train.column(i).into_owned()))
        .collect();

    let mut acc = 0.0;
    for j in 0..lengthscales.ncols() {
        let ls = lengthscales.column(j).into_owned();
        let cov = kernel.covariance(&x_train, &ls, params.noise_var[j]);
        let chol = match cholesky_with_jitter(&cov) {
            Ok(c) => c,
            Err(_) => return f64::NEG_INFINITY,
        };
        let residuals = DVector::from_fn(k, |i, _| data.outputs()[(j, i)] - mu0[i][j]);
        let alpha = chol.solve(&residuals);
        let log_det: f64 = chol.l().diagonal().iter().map(|d| 2.0 * d.ln()).sum();
        acc += -0.5 * (residuals.dot(&alpha) + log_det + k as f64 * LN_2PI);
    }
    acc
}
