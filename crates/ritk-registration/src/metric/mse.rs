//! Mean Squared Error metric implementation.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use ritk_core::image::Image;
use ritk_core::transform::Transform;
use ritk_core::interpolation::LinearInterpolator;
use super::trait_::{utils, Metric};

/// Mean Squared Error Metric.
///
/// `MSE = sum(w * (F(x) - M(T(x)))^2) / sum(w)`, with `w = 1` without a mask.
#[derive(Clone, Default)]
pub struct MeanSquaredError {
    interpolator: LinearInterpolator,
    mask: Option<Vec<f32>>,
}

impl MeanSquaredError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the metric to pixels where `mask` is non-zero.
    pub fn with_mask(mut self, mask: Vec<f32>) -> Self {
        self.mask = Some(mask);
        self
    }
}

impl<B: Backend, const D: usize> Metric<B, D> for MeanSquaredError {
    fn forward(
        &self,
        fixed: &Image<B, D>,
        moving: &Image<B, D>,
        transform: &impl Transform<B, D>,
    ) -> Tensor<B, 1> {
        let (fixed_values, moving_values) = utils::sample_pair(fixed, moving, transform, &self.interpolator);
        let squared = (moving_values - fixed_values).powf_scalar(2.0);

        match &self.mask {
            Some(mask) => {
                let w = utils::mask_tensor::<B>(mask, &squared.device());
                (squared * w.clone()).sum() / (w.sum() + 1e-10)
            }
            None => squared.mean(),
        }
    }

    fn fixed_mask(&self) -> Option<&[f32]> {
        self.mask.as_deref()
    }

    fn name(&self) -> &'static str {
        "MeanSquaredError"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use ritk_core::spatial::{Direction2, Point2, Spacing2};
    use ritk_core::transform::TranslationTransform;

    type B = NdArray<f32>;

    fn ramp(d: usize) -> Image<B, 2> {
        let device = Default::default();
        let values: Vec<f32> = (0..d * d).map(|i| ((i % d) + (i / d)) as f32).collect();
        let data = Tensor::<B, 1>::from_floats(values.as_slice(), &device).reshape([d, d]);
        Image::new(data, Point2::new([0.0, 0.0]), Spacing2::new([1.0, 1.0]), Direction2::identity())
    }

    #[test]
    fn test_mse_identity() {
        let device = Default::default();
        let image = ramp(5);
        let transform = TranslationTransform::<B, 2>::new(Tensor::from_floats([0.0, 0.0], &device));
        let loss = MeanSquaredError::new().forward(&image, &image, &transform).into_scalar();
        assert!(loss < 1e-5, "MSE should be 0 for identical images, got {}", loss);
    }

    #[test]
    fn test_mask_restricts_samples() {
        let device = Default::default();
        let image = ramp(4);
        // Shift by one pixel along x: interior pixels differ by exactly 1.
        let transform = TranslationTransform::<B, 2>::new(Tensor::from_floats([1.0, 0.0], &device));

        let mut mask = vec![0.0f32; 16];
        mask[5] = 1.0; // (x=1, y=1)
        let loss = MeanSquaredError::new()
            .with_mask(mask)
            .forward(&image, &image, &transform)
            .into_scalar();
        assert!((loss - 1.0).abs() < 1e-4, "got {}", loss);
    }
}
