//! Closed-form planar affine maps.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// Planar affine map `p -> matrix * p + translation` in physical millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineMap2 {
    pub matrix: Matrix2<f64>,
    pub translation: Vector2<f64>,
}

impl Default for AffineMap2 {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineMap2 {
    pub fn new(matrix: Matrix2<f64>, translation: Vector2<f64>) -> Self {
        Self { matrix, translation }
    }

    pub fn identity() -> Self {
        Self::new(Matrix2::identity(), Vector2::zeros())
    }

    pub fn translation(t: [f64; 2]) -> Self {
        Self::new(Matrix2::identity(), Vector2::new(t[0], t[1]))
    }

    /// Rotation by `angle` radians (counter-clockwise) about `center`,
    /// then a shift so that `center` lands on `target`.
    pub fn rotation_about(angle: f64, center: [f64; 2], target: [f64; 2]) -> Self {
        let (s, c) = angle.sin_cos();
        let matrix = Matrix2::new(c, -s, s, c);
        let center = Vector2::new(center[0], center[1]);
        let target = Vector2::new(target[0], target[1]);
        Self::new(matrix, target - matrix * center)
    }

    /// `matrix * (p - center) + center + shift`, the centred form used by
    /// the parametric transforms.
    pub fn centered(matrix: Matrix2<f64>, center: [f64; 2], shift: [f64; 2]) -> Self {
        let center = Vector2::new(center[0], center[1]);
        let shift = Vector2::new(shift[0], shift[1]);
        Self::new(matrix, center + shift - matrix * center)
    }

    pub fn apply(&self, p: [f64; 2]) -> [f64; 2] {
        let q = self.matrix * Vector2::new(p[0], p[1]) + self.translation;
        [q[0], q[1]]
    }

    /// Inverse map, or `None` when the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        let inv = self.matrix.try_inverse()?;
        Some(Self::new(inv, -(inv * self.translation)))
    }

    /// `self ∘ other`: apply `other` first.
    pub fn compose(&self, other: &Self) -> Self {
        Self::new(
            self.matrix * other.matrix,
            self.matrix * other.translation + self.translation,
        )
    }

    pub fn is_finite(&self) -> bool {
        self.matrix.iter().chain(self.translation.iter()).all(|v| v.is_finite())
    }
}
