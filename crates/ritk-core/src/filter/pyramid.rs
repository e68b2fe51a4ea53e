use burn::tensor::backend::Backend;
use crate::image::Image;
use super::downsample::DownsampleFilter;
use super::gaussian::{BoundaryMode, GaussianFilter};

/// Multi-resolution image pyramid.
///
/// One image per schedule level, coarsest first. Each level is smoothed with
/// the level's sigmas (physical units) and then shrunk by integer factors.
pub struct MultiResolutionPyramid<B: Backend, const D: usize> {
    images: Vec<Image<B, D>>,
}

impl<B: Backend, const D: usize> MultiResolutionPyramid<B, D> {
    /// Build the pyramid; levels beyond the shorter schedule are ignored.
    pub fn new(input: &Image<B, D>, shrink_factors: &[Vec<usize>], smoothing_sigmas: &[Vec<f64>]) -> Self {
        let images = shrink_factors
            .iter()
            .zip(smoothing_sigmas.iter())
            .map(|(factors, sigmas)| {
                let identity_shrink = factors.iter().all(|&f| f <= 1);
                let identity_smooth = sigmas.iter().all(|&s| s <= 1e-6);

                let smoothed = if identity_smooth {
                    input.clone()
                } else {
                    GaussianFilter::new(sigmas.clone())
                        .with_boundary(BoundaryMode::Nearest)
                        .apply(input)
                };

                if identity_shrink {
                    smoothed
                } else {
                    DownsampleFilter::new(factors.clone()).apply(&smoothed)
                }
            })
            .collect();

        Self { images }
    }

    /// Get image at specific level.
    pub fn get_level(&self, level: usize) -> Option<&Image<B, D>> {
        self.images.get(level)
    }

    /// Get number of levels.
    pub fn levels(&self) -> usize {
        self.images.len()
    }
}
