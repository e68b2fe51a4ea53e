//! Metric trait for image similarity measurement.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use ritk_core::image::Image;
use ritk_core::transform::Transform;

/// Measures dissimilarity between a fixed image and a transformed moving
/// image. Lower values indicate better alignment.
///
/// # Type Parameters
/// * `B` - The tensor backend
/// * `D` - The spatial dimensionality
pub trait Metric<B: Backend, const D: usize> {
    /// Calculate the loss between `fixed` and `moving` resampled through
    /// `transform` (fixed physical space to moving physical space).
    ///
    /// # Returns
    /// Scalar tensor of shape `[1]`
    fn forward(
        &self,
        fixed: &Image<B, D>,
        moving: &Image<B, D>,
        transform: &impl Transform<B, D>,
    ) -> Tensor<B, 1>;

    /// Per-pixel weights over the fixed image in tensor storage order.
    /// Pixels with weight zero do not contribute.
    fn fixed_mask(&self) -> Option<&[f32]> {
        None
    }

    fn name(&self) -> &'static str;
}

pub mod utils {
    use burn::tensor::backend::Backend;
    use burn::tensor::{Shape, Tensor, TensorData};
    use ritk_core::image::{generate_grid, Image};
    use ritk_core::interpolation::Interpolator;
    use ritk_core::transform::Transform;

    const CHUNK_SIZE: usize = 32768;

    /// Sample both images over the fixed grid.
    ///
    /// Returns `(fixed_values, moving_values)`, each `[N]` in the fixed
    /// tensor's storage order.
    pub fn sample_pair<B: Backend, const D: usize>(
        fixed: &Image<B, D>,
        moving: &Image<B, D>,
        transform: &impl Transform<B, D>,
        interpolator: &impl Interpolator<B>,
    ) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let device = fixed.data().device();
        let fixed_indices = generate_grid(fixed.shape(), &device);
        let [n, _] = fixed_indices.dims();

        let sample = |indices: Tensor<B, 2>| {
            let fixed_points = fixed.index_to_world_tensor(indices);
            let moving_points = transform.transform_points(fixed_points);
            let moving_indices = moving.world_to_index_tensor(moving_points);
            interpolator.interpolate(moving.data(), moving_indices)
        };

        let moving_values = if n <= CHUNK_SIZE {
            sample(fixed_indices)
        } else {
            let chunks = (0..n)
                .step_by(CHUNK_SIZE)
                .map(|start| sample(fixed_indices.clone().slice([start..(start + CHUNK_SIZE).min(n)])))
                .collect();
            Tensor::cat(chunks, 0)
        };

        (fixed.data().clone().reshape([n]), moving_values)
    }

    /// Upload a host-side mask as a `[N]` weight tensor.
    pub fn mask_tensor<B: Backend>(mask: &[f32], device: &B::Device) -> Tensor<B, 1> {
        Tensor::from_data(TensorData::new(mask.to_vec(), Shape::new([mask.len()])), device)
    }
}
