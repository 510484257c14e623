use super::gp::GpOutputPosterior;
use super::{FitParams, GpModel, InputMap, MeanFn, Model, ModelError, PredictorFn};
use crate::data::Dataset;
use nalgebra::{DMatrix, DVector};

/// Predictive machinery for a single parameter draw.
#[derive(Clone)]
enum Draw {
    Parametric {
        predictor: PredictorFn,
        theta: DVector<f64>,
        noise_var: DVector<f64>,
    },
    Gp {
        mean: Option<MeanFn>,
        input_map: Option<InputMap>,
        outputs: Vec<GpOutputPosterior>,
    },
}

impl Draw {
    fn predict(&self, x: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        match self {
            Self::Parametric {
                predictor,
                theta,
                noise_var,
            } => (predictor(x, theta), noise_var.clone()),
            Self::Gp {
                mean,
                input_map,
                outputs,
            } => {
                let xm = match input_map {
                    Some(map) => map(x),
                    None => x.clone(),
                };
                let m = outputs.len();
                let mu0 = match mean {
                    Some(f) => f(&xm),
                    None => DVector::zeros(m),
                };
                let mut means = DVector::zeros(m);
                let mut vars = DVector::zeros(m);
                for (j, output) in outputs.iter().enumerate() {
                    let (dev, var) = output.predict(&xm);
                    means[j] = mu0[j] + dev;
                    vars[j] = var;
                }
                (means, vars)
            }
        }
    }
}

fn condition_gp(
    gp: &GpModel,
    mean: Option<MeanFn>,
    data: &Dataset,
    params: &FitParams,
) -> Result<Draw, ModelError> {
    let lengthscales = params.lengthscales.as_ref().ok_or_else(|| {
        ModelError::InvalidModel("GP posterior requires fitted length-scales".to_string())
    })?;
    let k = data.len();
    let mut x_train = DMatrix::zeros(data.n_inputs(), k);
    for i in 0..k {
        x_train.set_column(i, &gp.map_input(&data.input(i)));
    }
    let mut outputs = Vec::with_capacity(gp.n_outputs());
    for j in 0..gp.n_outputs() {
        let residuals = DVector::from_fn(k, |i, _| {
            let mu0 = match &mean {
                Some(f) => f(&x_train.column(i).into_owned())[j],
                None => 0.0,
            };
            data.outputs()[(j, i)] - mu0
        });
        outputs.push(GpOutputPosterior::condition(
            *gp.kernel(),
            lengthscales.column(j).into_owned(),
            x_train.clone(),
            &residuals,
            params.noise_var[j],
        )?);
    }
    Ok(Draw::Gp {
        mean,
        input_map: gp.input_map(),
        outputs,
    })
}

/// Posterior predictive over outputs at new inputs. In MLE mode it holds a
/// single parameter draw; in BI mode one draw per posterior sample, in
/// chain-major order.
#[derive(Clone)]
pub struct Posterior {
    draws: Vec<Draw>,
}

impl Posterior {
    pub fn new(model: &Model, data: &Dataset, params: &[FitParams]) -> Result<Self, ModelError> {
        if params.is_empty() {
            return Err(ModelError::InvalidModel(
                "posterior requires at least one parameter draw".to_string(),
            ));
        }
        let mut draws = Vec::with_capacity(params.len());
        for p in params {
            model.validate_params(p)?;
            let draw = match model {
                Model::Parametric(m) => Draw::Parametric {
                    predictor: m.predictor(),
                    theta: p
                        .theta
                        .clone()
                        .expect("arity validated against the parametric model"),
                    noise_var: p.noise_var.clone(),
                },
                Model::Gp(m) => condition_gp(m, m.mean().cloned(), data, p)?,
                Model::Semiparametric(m) => {
                    let theta = p
                        .theta
                        .as_ref()
                        .expect("arity validated against the trend model");
                    condition_gp(m.gp(), Some(m.mean_with(theta)), data, p)?
                }
            };
            draws.push(draw);
        }
        Ok(Self { draws })
    }

    pub fn n_draws(&self) -> usize {
        self.draws.len()
    }

    /// Marginal predictive `(mean, variance)` per output under the first
    /// (in MLE mode, the only) draw.
    pub fn predict(&self, x: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        self.draws[0].predict(x)
    }

    /// One `(mean, variance)` pair per posterior draw.
    pub fn predict_samples(&self, x: &DVector<f64>) -> Vec<(DVector<f64>, DVector<f64>)> {
        self.draws.iter().map(|d| d.predict(x)).collect()
    }

    /// Posterior-mean outputs, averaged over draws; the fantasy observation
    /// used by sequential batching.
    pub fn mean_prediction(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut acc = self.draws[0].predict(x).0;
        for d in &self.draws[1..] {
            acc += d.predict(x).0;
        }
        acc / self.draws.len() as f64
    }
}
