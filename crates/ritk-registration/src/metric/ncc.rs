//! Normalized Cross Correlation (NCC) metric implementation.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use ritk_core::image::Image;
use ritk_core::transform::Transform;
use ritk_core::interpolation::LinearInterpolator;
use super::trait_::{utils, Metric};

/// Zero-normalized cross correlation, returned negated as a loss.
///
/// `NCC = sum(w (F - mF)(M - mM)) / sqrt(sum(w (F - mF)^2) * sum(w (M - mM)^2))`
/// with weighted means. The loss lies in `[-1, 1]`; `-1` is perfect
/// correlation.
#[derive(Clone, Default)]
pub struct NormalizedCrossCorrelation {
    interpolator: LinearInterpolator,
    mask: Option<Vec<f32>>,
}

impl NormalizedCrossCorrelation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mask(mut self, mask: Vec<f32>) -> Self {
        self.mask = Some(mask);
        self
    }
}

impl<B: Backend, const D: usize> Metric<B, D> for NormalizedCrossCorrelation {
    fn forward(
        &self,
        fixed: &Image<B, D>,
        moving: &Image<B, D>,
        transform: &impl Transform<B, D>,
    ) -> Tensor<B, 1> {
        let (f, m) = utils::sample_pair(fixed, moving, transform, &self.interpolator);
        let w = match &self.mask {
            Some(mask) => utils::mask_tensor::<B>(mask, &f.device()),
            None => f.ones_like(),
        };
        let total = w.clone().sum() + 1e-10;

        let mean_f = (f.clone() * w.clone()).sum() / total.clone();
        let mean_m = (m.clone() * w.clone()).sum() / total;
        let cf = f - mean_f;
        let cm = m - mean_m;

        let numerator = (cf.clone() * cm.clone() * w.clone()).sum();
        let var_f = (cf.powf_scalar(2.0) * w.clone()).sum();
        let var_m = (cm.powf_scalar(2.0) * w).sum();
        let denominator = (var_f * var_m + 1e-10).sqrt();

        (numerator / denominator).neg()
    }

    fn fixed_mask(&self) -> Option<&[f32]> {
        self.mask.as_deref()
    }

    fn name(&self) -> &'static str {
        "NormalizedCrossCorrelation"
    }
}
