//! Affine transform (linear part + translation about a fixed center).

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use burn::module::{Module, Param};
use nalgebra::Matrix2;
use super::map::AffineMap2;
use super::trait_::{read_params, ToAffineMap, Transform};

/// General affine transform with a fixed center: `T(x) = A(x - c) + c + t`.
///
/// `A` is a trainable D×D matrix (rotation, scale, shear) and `t` a
/// trainable translation. `c` stays fixed during optimisation.
#[derive(Module, Debug)]
pub struct AffineTransform<B: Backend, const D: usize> {
    matrix: Param<Tensor<B, 2>>, // [D, D] linear part times `radius`
    translation: Param<Tensor<B, 1>>, // [D] translation vector
    center: Tensor<B, 1>, // [D] fixed center
    radius: Tensor<B, 1>, // [1]
}

impl<B: Backend, const D: usize> AffineTransform<B, D> {
    /// Create a new affine transform.
    ///
    /// # Arguments
    /// * `matrix` - Tensor of shape `[D, D]` containing the linear transformation matrix
    /// * `translation` - Tensor of shape `[D]` containing the translation vector
    /// * `center` - Tensor of shape `[D]` containing the fixed center
    pub fn new(matrix: Tensor<B, 2>, translation: Tensor<B, 1>, center: Tensor<B, 1>) -> Self {
        let radius = Tensor::<B, 1>::ones([1], &center.device());
        Self {
            matrix: Param::from_tensor(matrix),
            translation: Param::from_tensor(translation),
            center,
            radius,
        }
    }

    /// Store the linear part scaled by `radius` so that a unit parameter step
    /// displaces points at that distance from the center by one unit.
    pub fn with_radius(self, radius: f64) -> Self {
        let radius = Tensor::<B, 1>::from_floats([radius as f32], &self.center.device());
        let matrix = (self.matrix() * radius.clone().reshape([1, 1])).detach();
        Self {
            matrix: Param::from_tensor(matrix),
            translation: self.translation,
            center: self.center,
            radius,
        }
    }

    /// Create an identity affine transform.
    ///
    /// # Arguments
    /// * `center` - Optional center of rotation. If None, uses origin (0,0...0).
    /// * `device` - Device to create tensors on.
    pub fn identity(center: Option<Tensor<B, 1>>, device: &B::Device) -> Self {
        let center = center.unwrap_or_else(|| Tensor::<B, 1>::zeros([D], device));
        Self::new(Tensor::eye(D, device), Tensor::zeros([D], device), center)
    }

    /// Get the transformation matrix.
    pub fn matrix(&self) -> Tensor<B, 2> {
        self.matrix.val() / self.radius.clone().reshape([1, 1])
    }

    /// Get the translation vector.
    pub fn translation(&self) -> Tensor<B, 1> {
        self.translation.val()
    }

    /// Get the center of rotation.
    pub fn center(&self) -> Tensor<B, 1> {
        self.center.clone()
    }
}

impl<B: Backend, const D: usize> Transform<B, D> for AffineTransform<B, D> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        // Row vectors: y = (x - c) A^T + c + t
        let c = self.center.clone().reshape([1, D]);
        let t = self.translation.val().reshape([1, D]);
        let a = self.matrix();

        let centered = points - c.clone();
        centered.matmul(a.transpose()) + c + t
    }
}

impl<B: Backend> ToAffineMap for AffineTransform<B, 2> {
    fn to_affine_map(&self) -> Option<AffineMap2> {
        let a = read_params(self.matrix())?;
        let t = read_params(self.translation())?;
        let c = read_params(self.center())?;
        Some(AffineMap2::centered(
            Matrix2::new(a[0], a[1], a[2], a[3]),
            [c[0], c[1]],
            [t[0], t[1]],
        ))
    }
}
