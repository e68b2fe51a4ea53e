use burn::tensor::backend::AutodiffBackend;
use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use ritk_core::image::Image;
use ritk_core::transform::Transform;
use crate::error::{RegistrationError, Result};
use crate::metric::Metric;
use crate::optimizer::Optimizer;
use std::marker::PhantomData;

/// Single-resolution gradient-driven registration.
pub struct Registration<B, O, M, T, const D: usize>
where
    B: AutodiffBackend,
    O: Optimizer<T, B>,
    M: Metric<B, D>,
    T: Transform<B, D> + AutodiffModule<B>,
{
    optimizer: O,
    metric: M,
    _phantom: PhantomData<(B, T)>,
}

impl<B, O, M, T, const D: usize> Registration<B, O, M, T, D>
where
    B: AutodiffBackend,
    O: Optimizer<T, B>,
    M: Metric<B, D>,
    T: Transform<B, D> + AutodiffModule<B>,
{
    pub fn new(optimizer: O, metric: M) -> Self {
        Self {
            optimizer,
            metric,
            _phantom: PhantomData,
        }
    }

    /// Optimize `transform` so that `moving` resampled through it matches `fixed`.
    ///
    /// Fails when the metric mask does not cover the fixed grid or when the
    /// loss stops being finite.
    pub fn execute(
        &mut self,
        fixed: &Image<B, D>,
        moving: &Image<B, D>,
        mut transform: T,
        iterations: usize,
        learning_rate: f64,
    ) -> Result<T> {
        let pixels: usize = fixed.shape().iter().product();
        if let Some(mask) = self.metric.fixed_mask() {
            if mask.len() != pixels {
                return Err(RegistrationError::ShapeMismatch {
                    expected: vec![pixels],
                    actual: vec![mask.len()],
                });
            }
        }
        self.optimizer.set_learning_rate(learning_rate);

        for i in 0..iterations {
            let loss = self.metric.forward(fixed, moving, &transform);

            let value = loss
                .clone()
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| RegistrationError::metric(format!("{e:?}")))?
                .first()
                .copied()
                .ok_or_else(|| RegistrationError::metric("empty loss tensor"))?;
            if !value.is_finite() {
                return Err(RegistrationError::numerical_instability(format!(
                    "{} loss became {} at iteration {}",
                    self.metric.name(),
                    value,
                    i
                )));
            }
            if i % 10 == 0 {
                tracing::debug!("Iteration {}: Loss {:.6}", i, value);
            }

            let grads = loss.backward();
            let grads_params = GradientsParams::from_grads(grads, &transform);
            transform = self.optimizer.step(transform, grads_params);
        }
        Ok(transform)
    }
}
