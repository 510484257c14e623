use super::{GpModel, InputMap, MeanFn, ModelError, ParametricModel};
use nalgebra::DVector;
use std::sync::Arc;

/// Semiparametric surrogate: a parametric trend `g(x, theta)` serving as the
/// mean of a GP residual model. The embedded GP must not carry a mean of its
/// own; the trend is the only mean.
#[derive(Clone)]
pub struct SemiparametricModel {
    parametric: ParametricModel,
    gp: GpModel,
}

impl SemiparametricModel {
    pub fn new(parametric: ParametricModel, gp: GpModel) -> Result<Self, ModelError> {
        if gp.has_mean() {
            return Err(ModelError::InvalidModel(
                "semiparametric model requires a mean-free GP part".to_string(),
            ));
        }
        if parametric.n_outputs() != gp.n_outputs() {
            return Err(ModelError::InvalidModel(format!(
                "trend has {} output(s) but the GP part has {}",
                parametric.n_outputs(),
                gp.n_outputs()
            )));
        }
        Ok(Self { parametric, gp })
    }

    pub fn n_outputs(&self) -> usize {
        self.parametric.n_outputs()
    }

    pub fn parametric(&self) -> &ParametricModel {
        &self.parametric
    }

    pub fn gp(&self) -> &GpModel {
        &self.gp
    }

    /// Bind the trend to a coefficient vector, producing the GP mean.
    pub fn mean_with(&self, theta: &DVector<f64>) -> MeanFn {
        let predictor = self.parametric.predictor();
        let theta = theta.clone();
        Arc::new(move |x: &DVector<f64>| predictor(x, &theta))
    }

    pub fn with_input_map(self, map: InputMap) -> Self {
        Self {
            parametric: self.parametric.with_input_map(map.clone()),
            gp: self.gp.with_input_map(map),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Kernel, PredictorFn};
    use crate::priors::Prior;
    use nalgebra::dvector;

    fn trend() -> ParametricModel {
        let predictor: PredictorFn = Arc::new(|x, theta| dvector![theta[0] * x[0]]);
        ParametricModel::new(predictor, vec![Prior::normal(0.0, 1.0).unwrap()], 1).unwrap()
    }

    fn gp_part(mean: Option<MeanFn>) -> GpModel {
        GpModel::new(
            mean,
            Kernel::SquaredExponential,
            vec![vec![Prior::log_normal(0.0, 1.0).unwrap()]],
        )
        .unwrap()
    }

    #[test]
    fn rejects_gp_with_its_own_mean() {
        let mean: MeanFn = Arc::new(|_| dvector![0.0]);
        let r = SemiparametricModel::new(trend(), gp_part(Some(mean)));
        assert!(matches!(r, Err(ModelError::InvalidModel(_))));
    }

    #[test]
    fn trend_binds_into_gp_mean() {
        let model = SemiparametricModel::new(trend(), gp_part(None)).unwrap();
        let mean = model.mean_with(&dvector![2.0]);
        assert_eq!(mean(&dvector![3.0]), dvector![6.0]);
    }
}
