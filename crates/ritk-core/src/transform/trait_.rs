//! Transform traits for spatial coordinate transformations.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use super::map::AffineMap2;

/// Maps a batch of points from one physical space to another.
///
/// The trait does not require `burn::module::Module`, so both trainable and
/// fixed transforms can implement it.
///
/// # Type Parameters
/// * `B` - The Burn backend
/// * `D` - The spatial dimensionality
pub trait Transform<B: Backend, const D: usize> {
    /// Apply transform to a batch of points.
    ///
    /// # Arguments
    /// * `points` - Tensor of shape `[Batch, D]` containing the input points
    ///
    /// # Returns
    /// Tensor of shape `[Batch, D]` containing the transformed points
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// Read back the current parameters of a planar transform as a closed-form map.
///
/// Returns `None` when the parameter tensors cannot be read or hold
/// non-finite values.
pub trait ToAffineMap {
    fn to_affine_map(&self) -> Option<AffineMap2>;
}

/// Pull a small parameter tensor into host memory.
pub(crate) fn read_params<B: Backend, const R: usize>(tensor: Tensor<B, R>) -> Option<Vec<f64>> {
    let values = tensor.into_data().to_vec::<f32>().ok()?;
    if values.iter().all(|v| v.is_finite()) {
        Some(values.into_iter().map(f64::from).collect())
    } else {
        None
    }
}
