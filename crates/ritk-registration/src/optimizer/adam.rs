use crate::optimizer::Optimizer;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Adam, AdamConfig, Optimizer as BurnOptimizer};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::tensor::backend::AutodiffBackend;

/// Adam optimizer backed by Burn's implementation.
///
/// Moment state lives in the adaptor, so a fresh optimizer is created per
/// resolution level and per slice.
pub struct AdamOptimizer<M: AutodiffModule<B>, B: AutodiffBackend> {
    optimizer: OptimizerAdaptor<Adam, M, B>,
    learning_rate: f64,
}

impl<M: AutodiffModule<B>, B: AutodiffBackend> AdamOptimizer<M, B> {
    pub fn new(learning_rate: f64) -> Self {
        Self::from_config(learning_rate, &AdamConfig::new())
    }

    pub fn from_config(learning_rate: f64, config: &AdamConfig) -> Self {
        Self {
            optimizer: config.init(),
            learning_rate,
        }
    }
}

impl<M, B> Optimizer<M, B> for AdamOptimizer<M, B>
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
{
    fn step(&mut self, module: M, gradients: GradientsParams) -> M {
        self.optimizer.step(self.learning_rate, module, gradients)
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use ritk_core::transform::TranslationTransform;

    type B = Autodiff<NdArray<f32>>;

    #[test]
    fn test_step_moves_against_gradient() {
        let device = Default::default();
        let transform = TranslationTransform::<B, 2>::new(Tensor::from_floats([1.0, -1.0], &device));
        let mut optimizer = AdamOptimizer::<TranslationTransform<B, 2>, B>::new(0.1);

        let loss = transform.translation().powf_scalar(2.0).sum();
        let grads = GradientsParams::from_grads(loss.backward(), &transform);
        let updated = optimizer.step(transform, grads);

        let t = updated.translation().into_data().to_vec::<f32>().unwrap();
        assert!((t[0] - 0.9).abs() < 1e-3, "got {:?}", t);
        assert!((t[1] + 0.9).abs() < 1e-3, "got {:?}", t);
    }
}
