//! Planar rigid transform (rotation + translation).

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use burn::module::{Module, Param};
use nalgebra::Matrix2;
use super::map::AffineMap2;
use super::trait_::{read_params, ToAffineMap, Transform};

/// In-plane rigid transform with a fixed center of rotation:
/// `T(x) = R(theta)(x - c) + c + t`.
#[derive(Module, Debug)]
pub struct RigidTransform<B: Backend> {
    translation: Param<Tensor<B, 1>>,
    angle: Param<Tensor<B, 1>>, // [1], arc length at `radius`
    center: Tensor<B, 1>,
    radius: Tensor<B, 1>,
}

impl<B: Backend> RigidTransform<B> {
    /// Create a new rigid transform.
    ///
    /// # Arguments
    /// * `translation` - Tensor of shape `[2]`
    /// * `angle` - Tensor of shape `[1]`, counter-clockwise radians
    /// * `center` - Tensor of shape `[2]`, fixed center of rotation
    pub fn new(translation: Tensor<B, 1>, angle: Tensor<B, 1>, center: Tensor<B, 1>) -> Self {
        let radius = Tensor::<B, 1>::ones([1], &center.device());
        Self {
            translation: Param::from_tensor(translation),
            angle: Param::from_tensor(angle),
            center,
            radius,
        }
    }

    /// Re-parameterize the angle as arc length at `radius`.
    ///
    /// A unit step of the angle parameter then moves points at distance
    /// `radius` from the center by one physical unit, the same scale as a
    /// unit step of the translation.
    pub fn with_radius(self, radius: f64) -> Self {
        let radius = Tensor::<B, 1>::from_floats([radius as f32], &self.center.device());
        let angle = (self.angle() * radius.clone()).detach();
        Self {
            translation: self.translation,
            angle: Param::from_tensor(angle),
            center: self.center,
            radius,
        }
    }

    /// Identity rigid transform rotating about `center` (origin if `None`).
    pub fn identity(center: Option<Tensor<B, 1>>, device: &B::Device) -> Self {
        let center = center.unwrap_or_else(|| Tensor::<B, 1>::zeros([2], device));
        Self::new(Tensor::zeros([2], device), Tensor::zeros([1], device), center)
    }

    pub fn translation(&self) -> Tensor<B, 1> {
        self.translation.val()
    }

    /// Rotation angle in radians.
    pub fn angle(&self) -> Tensor<B, 1> {
        self.angle.val() / self.radius.clone()
    }

    pub fn center(&self) -> Tensor<B, 1> {
        self.center.clone()
    }

    fn rotation_matrix(&self) -> Tensor<B, 2> {
        let theta = self.angle();
        let c = theta.clone().cos();
        let s = theta.sin();

        let row1 = Tensor::cat(vec![c.clone(), s.clone().neg()], 0).reshape([1, 2]);
        let row2 = Tensor::cat(vec![s, c], 0).reshape([1, 2]);
        Tensor::cat(vec![row1, row2], 0)
    }
}

impl<B: Backend> Transform<B, 2> for RigidTransform<B> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        // Row vectors: y = (x - c) R^T + c + t
        let r = self.rotation_matrix();
        let t = self.translation.val().reshape([1, 2]);
        let c = self.center.clone().reshape([1, 2]);

        let centered = points - c.clone();
        centered.matmul(r.transpose()) + c + t
    }
}

impl<B: Backend> ToAffineMap for RigidTransform<B> {
    fn to_affine_map(&self) -> Option<AffineMap2> {
        let theta = read_params(self.angle())?;
        let t = read_params(self.translation())?;
        let c = read_params(self.center())?;
        let (s, co) = theta[0].sin_cos();
        Some(AffineMap2::centered(
            Matrix2::new(co, -s, s, co),
            [c[0], c[1]],
            [t[0], t[1]],
        ))
    }
}
