//! Per-slice angle estimation primitives.
//!
//! [`pca`] measures the principal axis of a segmentation, [`symmetry`] the
//! symmetry axis of an intensity image's gradient orientations. Both report
//! angles counter-clockwise in the pixel `(x, y)` frame.

pub mod pca;
pub mod symmetry;

pub use pca::{compute_principal_axes, principal_axes_of_points, PrincipalAxes};
pub use symmetry::{symmetry_angle, SymmetryEstimate, SymmetryOptions};

use crate::error::{Result, SlicewiseError};

/// Signed angle rotating `a` onto `b`, in `[-pi, pi]`.
///
/// Fails on zero-length or non-finite input, which only happens when the
/// upstream geometry is corrupted.
pub fn angle_between(a: [f64; 2], b: [f64; 2]) -> Result<f64> {
    let norm = a[0].hypot(a[1]) * b[0].hypot(b[1]);
    if !norm.is_finite() || norm == 0.0 {
        return Err(SlicewiseError::DegenerateVector(format!(
            "cannot measure the angle between {a:?} and {b:?}"
        )));
    }
    let cos = ((a[0] * b[0] + a[1] * b[1]) / norm).clamp(-1.0, 1.0);
    let cross = a[0] * b[1] - a[1] * b[0];
    let sign = if cross < 0.0 { -1.0 } else { 1.0 };
    Ok(sign * cos.acos())
}
