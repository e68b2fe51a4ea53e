//! Mutual Information metric implementation.

use burn::tensor::{Int, Tensor};
use burn::tensor::backend::Backend;
use ritk_core::image::Image;
use ritk_core::transform::Transform;
use ritk_core::interpolation::LinearInterpolator;
use super::trait_::{utils, Metric};

/// Mutual Information with Parzen window histograms.
///
/// `MI(F, M) = H(F) + H(M) - H(F, M)`. Intensities are rescaled to `[0, 1]`
/// per image before binning, so `sigma` is in rescaled units. The loss is
/// `-MI`.
#[derive(Clone)]
pub struct MutualInformation {
    interpolator: LinearInterpolator,
    num_bins: usize,
    sigma: f64,
    mask: Option<Vec<f32>>,
}

impl MutualInformation {
    /// # Arguments
    /// * `num_bins` - Number of histogram bins per image (at least 2)
    /// * `sigma` - Parzen kernel width in rescaled intensity units
    pub fn new(num_bins: usize, sigma: f64) -> Self {
        Self {
            interpolator: LinearInterpolator::new(),
            num_bins: num_bins.max(2),
            sigma,
            mask: None,
        }
    }

    pub fn with_mask(mut self, mask: Vec<f32>) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// Parzen weights `[N, bins]` of values rescaled to `[0, 1]`.
    fn parzen_weights<B: Backend>(&self, values: Tensor<B, 1>) -> Tensor<B, 2> {
        let n = values.dims()[0];
        let device = values.device();

        let lo = values.clone().min().detach();
        let hi = values.clone().max().detach();
        let unit = (values - lo.clone()) / (hi - lo + 1e-10);

        let step = 1.0 / (self.num_bins - 1) as f64;
        let centers = Tensor::<B, 1, Int>::arange(0..self.num_bins as i64, &device).float() * step;

        let diff = unit.reshape([n, 1]) - centers.reshape([1, self.num_bins]);
        (diff.powf_scalar(2.0) * (-0.5 / (self.sigma * self.sigma))).exp()
    }

    fn entropy<B: Backend, const R: usize>(probs: Tensor<B, R>) -> Tensor<B, 1> {
        let log_probs = (probs.clone() + 1e-10).log();
        (probs * log_probs).sum().neg()
    }
}

impl Default for MutualInformation {
    fn default() -> Self {
        Self::new(32, 1.0 / 31.0)
    }
}

impl<B: Backend, const D: usize> Metric<B, D> for MutualInformation {
    fn forward(
        &self,
        fixed: &Image<B, D>,
        moving: &Image<B, D>,
        transform: &impl Transform<B, D>,
    ) -> Tensor<B, 1> {
        let (f, m) = utils::sample_pair(fixed, moving, transform, &self.interpolator);
        let n = f.dims()[0];

        let mut wf = self.parzen_weights(f);
        let wm = self.parzen_weights(m);
        if let Some(mask) = &self.mask {
            let w = utils::mask_tensor::<B>(mask, &wf.device()).reshape([n, 1]);
            wf = wf * w;
        }

        // p(i, j) = sum_k wf(k, i) wm(k, j)
        let joint = wf.transpose().matmul(wm);
        let joint = joint.clone() / (joint.sum().reshape([1, 1]) + 1e-10);

        let p_f = joint.clone().sum_dim(1).reshape([self.num_bins]);
        let p_m = joint.clone().sum_dim(0).reshape([self.num_bins]);

        Self::entropy(joint) - Self::entropy(p_f) - Self::entropy(p_m)
    }

    fn fixed_mask(&self) -> Option<&[f32]> {
        self.mask.as_deref()
    }

    fn name(&self) -> &'static str {
        "MutualInformation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use ritk_core::spatial::{Direction2, Point2, Spacing2};
    use ritk_core::transform::TranslationTransform;

    type B = NdArray<f32>;

    fn blob(d: usize, cx: f32) -> Image<B, 2> {
        let device = Default::default();
        let values: Vec<f32> = (0..d * d)
            .map(|i| {
                let (x, y) = ((i % d) as f32, (i / d) as f32);
                (-((x - cx).powi(2) + (y - 8.0).powi(2)) / 8.0).exp()
            })
            .collect();
        let data = Tensor::<B, 1>::from_floats(values.as_slice(), &device).reshape([d, d]);
        Image::new(data, Point2::new([0.0, 0.0]), Spacing2::new([1.0, 1.0]), Direction2::identity())
    }

    #[test]
    fn test_mi_prefers_aligned_images() {
        let device = Default::default();
        let fixed = blob(16, 8.0);
        let moving = blob(16, 8.0);
        let metric = MutualInformation::new(16, 1.0 / 15.0);

        let aligned = TranslationTransform::<B, 2>::new(Tensor::from_floats([0.0, 0.0], &device));
        let shifted = TranslationTransform::<B, 2>::new(Tensor::from_floats([4.0, 0.0], &device));

        let loss_aligned = metric.forward(&fixed, &moving, &aligned).into_scalar();
        let loss_shifted = metric.forward(&fixed, &moving, &shifted).into_scalar();
        assert!(loss_aligned < loss_shifted, "{} vs {}", loss_aligned, loss_shifted);
    }
}
