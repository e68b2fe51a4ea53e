//! Translation transform implementation.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use burn::module::{Module, Param};
use nalgebra::Matrix2;
use super::map::AffineMap2;
use super::trait_::{read_params, ToAffineMap, Transform};

/// Translates points by a trainable offset vector.
#[derive(Module, Debug)]
pub struct TranslationTransform<B: Backend, const D: usize> {
    translation: Param<Tensor<B, 1>>,
}

impl<B: Backend, const D: usize> TranslationTransform<B, D> {
    /// Create a new translation transform.
    ///
    /// # Arguments
    /// * `translation` - Tensor of shape `[D]` containing the translation vector
    pub fn new(translation: Tensor<B, 1>) -> Self {
        Self {
            translation: Param::from_tensor(translation),
        }
    }

    pub fn identity(device: &B::Device) -> Self {
        Self::new(Tensor::zeros([D], device))
    }

    /// Get the translation vector.
    pub fn translation(&self) -> Tensor<B, 1> {
        self.translation.val()
    }
}

impl<B: Backend, const D: usize> Transform<B, D> for TranslationTransform<B, D> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let t = self.translation.val().reshape([1, D]);
        points + t
    }
}

impl<B: Backend> ToAffineMap for TranslationTransform<B, 2> {
    fn to_affine_map(&self) -> Option<AffineMap2> {
        let t = read_params(self.translation())?;
        Some(AffineMap2::centered(Matrix2::identity(), [0.0, 0.0], [t[0], t[1]]))
    }
}
