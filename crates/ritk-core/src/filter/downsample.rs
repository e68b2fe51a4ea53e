use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use crate::image::Image;

/// Downsample filter.
///
/// Keeps every Nth pixel along each axis and scales the spacing to match.
/// Factors are given per spatial axis in `(x, y, z)` order.
pub struct DownsampleFilter<B: Backend> {
    factors: Vec<usize>,
    _b: std::marker::PhantomData<B>,
}

impl<B: Backend> DownsampleFilter<B> {
    pub fn new(factors: Vec<usize>) -> Self {
        Self {
            factors,
            _b: std::marker::PhantomData,
        }
    }

    /// Apply the filter to an image.
    pub fn apply<const D: usize>(&self, image: &Image<B, D>) -> Image<B, D> {
        let mut data = image.data().clone();
        let device = data.device();
        let dims: [usize; D] = data.dims();
        let mut spacing = *image.spacing();

        for dim in 0..D {
            let axis = D - 1 - dim;
            let factor = self.factors.get(axis).or(self.factors.first()).copied().unwrap_or(1);
            if factor <= 1 {
                continue;
            }

            // The pixel at index 0 is kept, so the origin is unchanged.
            let indices: Vec<i32> = (0..dims[dim]).step_by(factor).map(|i| i as i32).collect();
            let index_tensor = Tensor::<B, 1, Int>::from_ints(indices.as_slice(), &device);
            data = data.select(dim, index_tensor);
            spacing[axis] *= factor as f64;
        }

        Image::new(data, *image.origin(), spacing, *image.direction())
    }
}
