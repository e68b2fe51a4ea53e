use burn::tensor::backend::AutodiffBackend;
use burn::module::AutodiffModule;
use ritk_core::image::Image;
use ritk_core::transform::Transform;
use ritk_core::filter::pyramid::MultiResolutionPyramid;
use crate::error::{RegistrationError, Result};
use crate::metric::Metric;
use crate::optimizer::Optimizer;
use crate::registration::Registration;
use std::marker::PhantomData;

/// Per-level settings for coarse-to-fine registration.
///
/// Smoothing sigmas are physical (millimetres), one entry per dimension.
#[derive(Debug, Clone)]
pub struct RegistrationSchedule<const D: usize> {
    pub shrink_factors: Vec<Vec<usize>>,
    pub smoothing_sigmas: Vec<Vec<f64>>,
    pub iterations: Vec<usize>,
    pub learning_rates: Vec<f64>,
}

impl<const D: usize> RegistrationSchedule<D> {
    /// Power-of-two shrinking with `0.5 * factor` smoothing.
    pub fn default(levels: usize) -> Self {
        let mut schedule = Self {
            shrink_factors: Vec::with_capacity(levels),
            smoothing_sigmas: Vec::with_capacity(levels),
            iterations: vec![100; levels],
            learning_rates: vec![1e-2; levels],
        };
        for i in 0..levels {
            let factor = 2usize.pow((levels - 1 - i) as u32);
            let sigma = if factor > 1 { 0.5 * factor as f64 } else { 0.0 };
            schedule.shrink_factors.push(vec![factor; D]);
            schedule.smoothing_sigmas.push(vec![sigma; D]);
        }
        schedule
    }

    /// One level per entry of `iterations`, each with isotropic shrink and smoothing.
    pub fn from_levels(iterations: &[usize], shrink: &[usize], sigmas: &[f64], learning_rate: f64) -> Result<Self> {
        if shrink.len() != iterations.len() || sigmas.len() != iterations.len() {
            return Err(RegistrationError::invalid_configuration(format!(
                "schedule lengths differ: {} iterations, {} shrink factors, {} sigmas",
                iterations.len(),
                shrink.len(),
                sigmas.len()
            )));
        }
        if shrink.iter().any(|&f| f == 0) {
            return Err(RegistrationError::invalid_configuration("shrink factors must be at least 1"));
        }
        Ok(Self {
            shrink_factors: shrink.iter().map(|&f| vec![f; D]).collect(),
            smoothing_sigmas: sigmas.iter().map(|&s| vec![s; D]).collect(),
            iterations: iterations.to_vec(),
            learning_rates: vec![learning_rate; iterations.len()],
        })
    }

    pub fn levels(&self) -> usize {
        self.iterations.len()
    }

    pub fn with_iterations(mut self, iterations: Vec<usize>) -> Self {
        assert_eq!(iterations.len(), self.shrink_factors.len());
        self.iterations = iterations;
        self
    }

    pub fn with_learning_rates(mut self, learning_rates: Vec<f64>) -> Self {
        assert_eq!(learning_rates.len(), self.shrink_factors.len());
        self.learning_rates = learning_rates;
        self
    }
}

/// Coarse-to-fine registration over Gaussian pyramids of both images.
///
/// Transforms act in physical space, so parameters carry over between
/// levels unchanged.
pub struct MultiResolutionRegistration<B, M, T, const D: usize> {
    metric: M,
    _phantom: PhantomData<(B, T)>,
}

impl<B, M, T, const D: usize> MultiResolutionRegistration<B, M, T, D>
where
    B: AutodiffBackend,
    M: Metric<B, D> + Clone,
    T: Transform<B, D> + AutodiffModule<B>,
{
    pub fn new(metric: M) -> Self {
        Self {
            metric,
            _phantom: PhantomData,
        }
    }

    /// # Arguments
    /// * `optimizer_factory` - Creates a fresh optimizer for a level's learning rate
    pub fn execute<F, O>(
        &self,
        fixed: &Image<B, D>,
        moving: &Image<B, D>,
        mut transform: T,
        optimizer_factory: F,
        schedule: &RegistrationSchedule<D>,
    ) -> Result<T>
    where
        F: Fn(f64) -> O,
        O: Optimizer<T, B>,
    {
        let fixed_pyramid = MultiResolutionPyramid::new(fixed, &schedule.shrink_factors, &schedule.smoothing_sigmas);
        let moving_pyramid = MultiResolutionPyramid::new(moving, &schedule.shrink_factors, &schedule.smoothing_sigmas);

        let levels = schedule.levels();
        for i in 0..levels {
            let (Some(fixed_level), Some(moving_level)) = (fixed_pyramid.get_level(i), moving_pyramid.get_level(i)) else {
                return Err(RegistrationError::invalid_configuration(format!("missing pyramid level {}", i)));
            };
            let lr = schedule.learning_rates[i];
            let iters = schedule.iterations[i];

            // Masks are defined at full resolution only.
            let metric = self.metric.clone();
            if metric.fixed_mask().is_some() && schedule.shrink_factors[i].iter().any(|&f| f > 1) {
                tracing::warn!("Skipping level {}: fixed mask requires full resolution", i + 1);
                continue;
            }

            tracing::debug!(
                "Level {}/{} lr={} iters={} fixed={:?} moving={:?}",
                i + 1,
                levels,
                lr,
                iters,
                fixed_level.shape(),
                moving_level.shape()
            );
            let mut registration = Registration::new(optimizer_factory(lr), metric);
            transform = registration.execute(fixed_level, moving_level, transform, iters, lr)?;
        }

        Ok(transform)
    }
}
