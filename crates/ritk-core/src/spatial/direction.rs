//! Direction matrices describing the orientation of image axes.

use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};
use super::Vector;

/// Direction cosine matrix.
///
/// Column `i` is the physical direction of the i-th image axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction<const D: usize>(pub SMatrix<f64, D, D>);

impl<const D: usize> Direction<D> {
    /// Create an identity direction matrix (no rotation).
    pub fn identity() -> Self {
        Self(SMatrix::identity())
    }

    /// Check if direction matrix is orthogonal.
    pub fn is_orthogonal(&self) -> bool {
        let product = self.0 * self.0.transpose();
        (0..D).all(|i| {
            (0..D).all(|j| {
                let expected = if i == j { 1.0 } else { 0.0 };
                (product[(i, j)] - expected).abs() < 1e-6
            })
        })
    }

    /// Determinant of the matrix.
    ///
    /// Closed form for 2×2 and 3×3, partial-pivot elimination otherwise.
    pub fn determinant(&self) -> f64 {
        let m = &self.0;
        match D {
            2 => m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)],
            3 => {
                m[(0, 0)] * (m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)])
                    - m[(0, 1)] * (m[(1, 0)] * m[(2, 2)] - m[(1, 2)] * m[(2, 0)])
                    + m[(0, 2)] * (m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)])
            }
            _ => {
                let mut a = *m;
                let mut det = 1.0;
                for i in 0..D {
                    let pivot = (i..D)
                        .max_by(|&r, &s| a[(r, i)].abs().total_cmp(&a[(s, i)].abs()))
                        .unwrap_or(i);
                    if a[(pivot, i)].abs() < 1e-12 {
                        return 0.0;
                    }
                    if pivot != i {
                        a.swap_rows(i, pivot);
                        det = -det;
                    }
                    det *= a[(i, i)];
                    for r in (i + 1)..D {
                        let factor = a[(r, i)] / a[(i, i)];
                        for c in i..D {
                            a[(r, c)] -= factor * a[(i, c)];
                        }
                    }
                }
                det
            }
        }
    }

    /// Inverse of the matrix.
    ///
    /// Falls back to the transpose when the matrix is numerically singular,
    /// which is the exact inverse for orthonormal direction cosines.
    pub fn inverse(&self) -> Self {
        self.0
            .try_inverse()
            .map(Self)
            .unwrap_or_else(|| Self(self.0.transpose()))
    }

    /// Get the inner nalgebra matrix.
    pub fn inner(&self) -> &SMatrix<f64, D, D> {
        &self.0
    }

    /// Get mutable reference to inner nalgebra matrix.
    pub fn inner_mut(&mut self) -> &mut SMatrix<f64, D, D> {
        &mut self.0
    }
}

impl Direction<3> {
    /// Upper-left 2×2 block: the orientation of the x/y axes of an axial slice.
    pub fn in_plane(&self) -> Direction<2> {
        Direction(self.0.fixed_view::<2, 2>(0, 0).into_owned())
    }
}

impl<const D: usize> std::ops::Index<(usize, usize)> for Direction<D> {
    type Output = f64;

    fn index(&self, index: (usize, usize)) -> &Self::Output {
        &self.0[index]
    }
}

impl<const D: usize> std::ops::IndexMut<(usize, usize)> for Direction<D> {
    fn index_mut(&mut self, index: (usize, usize)) -> &mut Self::Output {
        &mut self.0[index]
    }
}

impl<const D: usize> std::ops::Mul<Vector<D>> for Direction<D> {
    type Output = Vector<D>;

    fn mul(self, vector: Vector<D>) -> Self::Output {
        Vector(self.0 * vector.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_identity_is_orthogonal() {
        let d = Direction::<3>::identity();
        assert!(d.is_orthogonal());
        assert!((d.determinant() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_of_reflection() {
        let mut flip = Direction::<3>::identity();
        flip[(0, 0)] = -1.0;
        flip[(1, 1)] = -1.0;
        let inv = flip.inverse();
        let v = flip * (inv * Vector::new([1.0, 2.0, 3.0]));
        assert_eq!(v, Vector::new([1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_in_plane_block() {
        let mut d = Direction::<3>::identity();
        d[(0, 0)] = -1.0;
        d[(0, 2)] = 0.5;
        let plane = d.in_plane();
        assert_eq!(plane[(0, 0)], -1.0);
        assert_eq!(plane[(1, 1)], 1.0);
        assert!(plane.determinant() < 0.0);
    }
}
