use super::{InputMap, ModelError, PredictorFn};
use crate::priors::Prior;
use nalgebra::DVector;
use std::sync::Arc;

/// Feature lift for one output block of a linear model.
pub type FeatureFn = Arc<dyn Fn(&DVector<f64>) -> DVector<f64> + Send + Sync>;

/// Parametric surrogate: a user predictor `g(x, theta) -> R^m` with one
/// prior per coefficient.
#[derive(Clone)]
pub struct ParametricModel {
    predictor: PredictorFn,
    theta_priors: Vec<Prior>,
    n_outputs: usize,
}

impl ParametricModel {
    pub fn new(
        predictor: PredictorFn,
        theta_priors: Vec<Prior>,
        n_outputs: usize,
    ) -> Result<Self, ModelError> {
        if theta_priors.is_empty() {
            return Err(ModelError::InvalidModel(
                "parametric model needs at least one coefficient prior".to_string(),
            ));
        }
        if n_outputs == 0 {
            return Err(ModelError::InvalidModel(
                "parametric model needs at least one output".to_string(),
            ));
        }
        Ok(Self {
            predictor,
            theta_priors,
            n_outputs,
        })
    }

    /// Linear specialization: per-output feature lifts `phi_j` with
    /// `g(x, theta)_j = theta_j . phi_j(x)`, where `theta` is the
    /// concatenation of the per-output coefficient blocks.
    ///
    /// The closed-form conjugate posterior is not used; linear models run
    /// through the same nonlinear path as any other predictor.
    pub fn linear(
        features: Vec<FeatureFn>,
        block_priors: Vec<Vec<Prior>>,
    ) -> Result<Self, ModelError> {
        if features.len() != block_priors.len() {
            return Err(ModelError::InvalidModel(format!(
                "{} feature block(s) for {} prior block(s)",
                features.len(),
                block_priors.len()
            )));
        }
        let n_outputs = features.len();
        let block_sizes: Vec<usize> = block_priors.iter().map(|b| b.len()).collect();
        let theta_priors: Vec<Prior> = block_priors.into_iter().flatten().collect();
        let predictor: PredictorFn = Arc::new(move |x, theta| {
            let mut out = DVector::zeros(features.len());
            let mut offset = 0;
            for (j, phi) in features.iter().enumerate() {
                let lift = phi(x);
                debug_assert_eq!(lift.len(), block_sizes[j]);
                let block = theta.rows(offset, block_sizes[j]);
                out[j] = block.dot(&lift);
                offset += block_sizes[j];
            }
            out
        });
        Self::new(predictor, theta_priors, n_outputs)
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    pub fn theta_priors(&self) -> &[Prior] {
        &self.theta_priors
    }

    pub fn predict(&self, x: &DVector<f64>, theta: &DVector<f64>) -> DVector<f64> {
        (self.predictor)(x, theta)
    }

    pub fn predictor(&self) -> PredictorFn {
        self.predictor.clone()
    }

    /// Route every prediction through `map` first.
    pub fn with_input_map(mut self, map: InputMap) -> Self {
        let inner = self.predictor.clone();
        self.predictor = Arc::new(move |x, theta| inner(&map(x), theta));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::dvector;

    #[test]
    fn linear_model_splits_theta_into_blocks() {
        // Two outputs: y1 = a + b*x, y2 = c*x^2.
        let features: Vec<FeatureFn> = vec![
            Arc::new(|x: &DVector<f64>| dvector![1.0, x[0]]),
            Arc::new(|x: &DVector<f64>| dvector![x[0] * x[0]]),
        ];
        let priors = vec![
            vec![Prior::normal(0.0, 1.0).unwrap(), Prior::normal(0.0, 1.0).unwrap()],
            vec![Prior::normal(0.0, 1.0).unwrap()],
        ];
        let m = ParametricModel::linear(features, priors).unwrap();
        assert_eq!(m.theta_priors().len(), 3);
        let y = m.predict(&dvector![2.0], &dvector![1.0, 3.0, 0.5]);
        assert_abs_diff_eq!(y[0], 7.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn input_map_rewrites_predictions() {
        let predictor: PredictorFn = Arc::new(|x, _| dvector![x[0]]);
        let m = ParametricModel::new(predictor, vec![Prior::normal(0.0, 1.0).unwrap()], 1)
            .unwrap()
            .with_input_map(Arc::new(|x| dvector![x[0].round()]));
        let y = m.predict(&dvector![1.6], &dvector![0.0]);
        assert_abs_diff_eq!(y[0], 2.0);
    }
}
