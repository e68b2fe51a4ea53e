//! Principal axes of a labeled slice.

use nalgebra::Matrix2;

use super::angle_between;
use crate::error::{Result, SlicewiseError};
use crate::plane::Plane;

const REFERENCE_AXIS: [f64; 2] = [1.0, 0.0];

/// Principal-axis decomposition of the foreground of one slice.
#[derive(Debug, Clone, PartialEq)]
pub struct PrincipalAxes {
    /// Mean foreground pixel position `(x, y)`.
    pub center_of_mass: [f64; 2],
    /// Foreground coordinates, centered and divided by their global standard
    /// deviation. Only used for conditioning.
    pub coordinates: Vec<[f64; 2]>,
    /// Orthonormal axes by decreasing variance. `axes[0][0] >= 0`.
    pub axes: [[f64; 2]; 2],
    pub explained_variance_ratio: [f64; 2],
}

impl PrincipalAxes {
    pub fn leading_axis(&self) -> [f64; 2] {
        self.axes[0]
    }

    /// Ratio of the two explained-variance ratios. Zero when the leading
    /// one vanishes, infinite for a perfectly straight cloud.
    pub fn eigenratio(&self) -> f64 {
        match self.explained_variance_ratio {
            [first, _] if first <= 0.0 => 0.0,
            [_, second] if second <= 0.0 => f64::INFINITY,
            [first, second] => first / second,
        }
    }

    /// Angle rotating the leading axis onto the x axis.
    pub fn source_angle(&self) -> Result<f64> {
        angle_between(self.leading_axis(), REFERENCE_AXIS)
    }

    /// Angle rotating the x axis onto the leading axis.
    pub fn destination_angle(&self) -> Result<f64> {
        angle_between(REFERENCE_AXIS, self.leading_axis())
    }

    /// Whether an axis angle measured on this slice can be used.
    pub fn is_trusted(&self, angle: f64, eigenratio_threshold: f64, capture_range: f64) -> bool {
        self.eigenratio() > eigenratio_threshold && angle.abs() <= capture_range
    }
}

/// Principal axes of the pixels whose rounded value is non-zero.
pub fn compute_principal_axes(plane: &Plane<'_>) -> Result<PrincipalAxes> {
    let points: Vec<[f64; 2]> = plane
        .data
        .indexed_iter()
        .filter(|(_, v)| v.round() != 0.0)
        .map(|((x, y), _)| [x as f64, y as f64])
        .collect();
    principal_axes_of_points(&points).ok_or(SlicewiseError::EmptySlice { z: plane.z })
}

/// Principal axes of a point cloud, `None` when it is empty.
pub fn principal_axes_of_points(points: &[[f64; 2]]) -> Option<PrincipalAxes> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / n;

    let mut coordinates: Vec<[f64; 2]> = points.iter().map(|p| [p[0] - cx, p[1] - cy]).collect();
    let variance = coordinates.iter().map(|c| c[0] * c[0] + c[1] * c[1]).sum::<f64>() / (2.0 * n);
    let std = variance.sqrt();
    if std > 0.0 {
        for c in &mut coordinates {
            c[0] /= std;
            c[1] /= std;
        }
    }

    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for c in &coordinates {
        sxx += c[0] * c[0];
        sxy += c[0] * c[1];
        syy += c[1] * c[1];
    }
    let eigen = Matrix2::new(sxx, sxy, sxy, syy).symmetric_eigen();
    let (first, second) = if eigen.eigenvalues[0] >= eigen.eigenvalues[1] { (0, 1) } else { (1, 0) };

    let column = |i: usize| [eigen.eigenvectors[(0, i)], eigen.eigenvectors[(1, i)]];
    let mut leading = column(first);
    if leading[0] <= 0.0 {
        leading = [-leading[0], -leading[1]];
    }

    let values = [eigen.eigenvalues[first].max(0.0), eigen.eigenvalues[second].max(0.0)];
    let total = values[0] + values[1];

    Some(PrincipalAxes {
        center_of_mass: [cx, cy],
        coordinates,
        axes: [leading, column(second)],
        explained_variance_ratio: if total > 0.0 { [values[0] / total, values[1] / total] } else { [0.0, 0.0] },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use ritk_core::image::ImageMetadata;

    fn plane_of(data: &Array2<f32>) -> Plane<'_> {
        Plane::new(3, data.view(), ImageMetadata::default())
    }

    #[test]
    fn test_empty_slice() {
        let data = Array2::<f32>::from_elem((8, 8), 0.3);
        let err = compute_principal_axes(&plane_of(&data)).unwrap_err();
        assert!(matches!(err, SlicewiseError::EmptySlice { z: 3 }));
    }

    #[test]
    fn test_diagonal_bar() {
        let mut data = Array2::<f32>::zeros((20, 20));
        for i in 2..18 {
            data[[i, i]] = 1.0;
            data[[i + 1, i]] = 1.0;
            data[[i, i + 1]] = 1.0;
        }
        let axes = compute_principal_axes(&plane_of(&data)).unwrap();
        let angle = axes.destination_angle().unwrap();
        assert!((angle - std::f64::consts::FRAC_PI_4).abs() < 1e-6, "angle = {angle}");
        assert!((axes.source_angle().unwrap() + angle).abs() < 1e-12);
        assert!(axes.eigenratio() > 10.0);
    }

    #[test]
    fn test_center_of_mass_ignores_intensity() {
        let mut data = Array2::<f32>::zeros((10, 10));
        data[[1, 1]] = 1.0;
        data[[5, 1]] = 7.0;
        data[[1, 4]] = 2.0;
        let axes = compute_principal_axes(&plane_of(&data)).unwrap();
        assert!((axes.center_of_mass[0] - 7.0 / 3.0).abs() < 1e-12);
        assert!((axes.center_of_mass[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_pixel_is_untrusted() {
        let axes = principal_axes_of_points(&[[4.0, 2.0]]).unwrap();
        assert_eq!(axes.center_of_mass, [4.0, 2.0]);
        assert_eq!(axes.explained_variance_ratio, [0.0, 0.0]);
        assert_eq!(axes.eigenratio(), 0.0);
        assert!(!axes.is_trusted(0.0, 1.6, 1.0));
    }

    #[test]
    fn test_straight_line_is_fully_elongated() {
        let points: Vec<[f64; 2]> = (0..6).map(|i| [i as f64, 3.0]).collect();
        let axes = principal_axes_of_points(&points).unwrap();
        assert_eq!(axes.eigenratio(), f64::INFINITY);
        assert!(axes.is_trusted(0.0, 1.6, 0.1));
    }

    #[test]
    fn test_capture_range_gates_trust() {
        let points: Vec<[f64; 2]> = (0..30).map(|i| [i as f64, 0.5 * (i % 2) as f64]).collect();
        let axes = principal_axes_of_points(&points).unwrap();
        assert!(axes.is_trusted(0.1, 1.6, 0.35));
        assert!(!axes.is_trusted(0.4, 1.6, 0.35));
        assert!(!axes.is_trusted(0.1, f64::INFINITY, 0.35));
    }
}
