//! Center-of-mass alignment with an optional in-plane rotation per slice.
//!
//! Estimation runs in three barriers: every slice angle is measured, the
//! angles of the usable slices are smoothed along z, then each usable slice
//! gets a rigid map about the two centers of mass.

use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use rayon::prelude::*;
use ritk_core::filter::{BoundaryMode, GaussianFilter};
use ritk_core::spatial::Spacing;
use ritk_core::transform::AffineMap2;
use ritk_io::NiftiVolume;
use tracing::{info, warn};

use crate::angle::{compute_principal_axes, symmetry_angle, PrincipalAxes, SymmetryOptions};
use crate::config::{Algorithm, RegistrationParams, RotationMethod};
use crate::debug::{DebugRenderer, Side};
use crate::error::{Result, SlicewiseError};
use crate::field::{DisplacementPlane, FieldPair};
use crate::plane::Plane;

/// How the slice angle is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationMode {
    /// Centers of mass only.
    None,
    PrincipalAxis,
    Symmetry,
    /// Principal axis per side, symmetry where the axis is not trusted.
    Hybrid,
}

impl RotationMode {
    pub fn from_params(params: &RegistrationParams) -> Result<Self> {
        match params.algorithm {
            Algorithm::CenterMass => Ok(Self::None),
            Algorithm::CenterMassRot => Ok(match params.rotation_method {
                RotationMethod::Pca => Self::PrincipalAxis,
                RotationMethod::Hog => Self::Symmetry,
                RotationMethod::Auto => Self::Hybrid,
            }),
            other => Err(SlicewiseError::configuration(format!(
                "algorithm {other} does not estimate rotations"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RotationOptions {
    pub mode: RotationMode,
    pub eigenratio_threshold: f64,
    /// Largest trusted principal-axis angle, radians.
    pub pca_range: f64,
    pub symmetry: SymmetryOptions,
    /// Capture range of the symmetry fallback in hybrid mode, radians.
    pub hybrid_range: f64,
    /// Gaussian width of the angle regularization along z, in slices.
    pub filter_size: f64,
}

impl RotationOptions {
    pub fn new(mode: RotationMode) -> Self {
        Self {
            mode,
            eigenratio_threshold: 1.6,
            pca_range: 20f64.to_radians(),
            symmetry: SymmetryOptions::default(),
            hybrid_range: 10f64.to_radians(),
            filter_size: 0.0,
        }
    }

    pub fn from_params(params: &RegistrationParams) -> Result<Self> {
        Ok(Self {
            mode: RotationMode::from_params(params)?,
            eigenratio_threshold: params.pca_eigenratio_threshold,
            pca_range: params.pca_range_deg.to_radians(),
            symmetry: SymmetryOptions::default()
                .with_capture_range(params.symmetry_range_deg.to_radians())
                .with_smoothing(params.histogram_smoothing),
            hybrid_range: params.hybrid_symmetry_range_deg.to_radians(),
            filter_size: params.filter_size,
        })
    }

    pub fn with_filter_size(mut self, filter_size: f64) -> Self {
        self.filter_size = filter_size;
        self
    }

    pub fn with_eigenratio_threshold(mut self, threshold: f64) -> Self {
        self.eigenratio_threshold = threshold;
        self
    }
}

/// The volumes of one side. Symmetry detection reads `image` when present,
/// everything else reads `segmentation`.
#[derive(Debug, Clone, Copy)]
pub struct SliceChannels<'a> {
    pub segmentation: &'a NiftiVolume,
    pub image: Option<&'a NiftiVolume>,
}

impl<'a> SliceChannels<'a> {
    pub fn segmentation(segmentation: &'a NiftiVolume) -> Self {
        Self { segmentation, image: None }
    }

    pub fn with_image(segmentation: &'a NiftiVolume, image: &'a NiftiVolume) -> Self {
        Self { segmentation, image: Some(image) }
    }

    fn intensity(&self) -> &'a NiftiVolume {
        self.image.unwrap_or(self.segmentation)
    }
}

/// Estimate for one usable slice. Centers are in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceRotation {
    pub center_source: [f64; 2],
    pub center_destination: [f64; 2],
    /// Rotation taking the source orientation onto the destination one,
    /// counter-clockwise in the pixel frame.
    pub angle: f64,
}

/// Per-z rotation estimates; excluded slices hold `None` and angle 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AngleSequence {
    slices: Vec<Option<SliceRotation>>,
}

impl AngleSequence {
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Indices of the slices that produced an estimate.
    pub fn z_nonzero(&self) -> Vec<usize> {
        (0..self.slices.len()).filter(|&z| self.slices[z].is_some()).collect()
    }

    pub fn angle(&self, z: usize) -> f64 {
        self.rotation(z).map_or(0.0, |r| r.angle)
    }

    pub fn rotation(&self, z: usize) -> Option<&SliceRotation> {
        self.slices.get(z).and_then(Option::as_ref)
    }

    pub fn angles(&self) -> Vec<f64> {
        (0..self.slices.len()).map(|z| self.angle(z)).collect()
    }
}

/// Result of a rotation run.
#[derive(Debug, Clone)]
pub struct RotationOutcome {
    pub fields: FieldPair,
    pub angles: AngleSequence,
}

impl RotationOutcome {
    pub fn excluded_slices(&self) -> Vec<usize> {
        (0..self.angles.len()).filter(|&z| self.angles.rotation(z).is_none()).collect()
    }
}

pub struct RotationEstimator<'r> {
    options: RotationOptions,
    renderer: &'r dyn DebugRenderer,
}

impl<'r> RotationEstimator<'r> {
    pub fn new(options: RotationOptions, renderer: &'r dyn DebugRenderer) -> Self {
        Self { options, renderer }
    }

    pub fn options(&self) -> &RotationOptions {
        &self.options
    }

    /// Estimate, regularize and build both fields.
    pub fn run(&self, source: SliceChannels<'_>, destination: SliceChannels<'_>) -> Result<RotationOutcome> {
        let mut angles = self.estimate_angles(source, destination)?;
        self.regularize(&mut angles)?;
        let fields = self.build_fields(&angles, source, destination)?;
        Ok(RotationOutcome { fields, angles })
    }

    /// Measure every slice; recoverable failures exclude the slice.
    pub fn estimate_angles(&self, source: SliceChannels<'_>, destination: SliceChannels<'_>) -> Result<AngleSequence> {
        check_channels(source, destination)?;
        let nz = destination.segmentation.dims()[2];

        let results: Vec<Result<SliceRotation>> = (0..nz)
            .into_par_iter()
            .map(|z| self.estimate_slice(z, source, destination))
            .collect();

        let mut slices = Vec::with_capacity(nz);
        for (z, result) in results.into_iter().enumerate() {
            match result {
                Ok(rotation) => slices.push(Some(rotation)),
                Err(err) if err.is_recoverable() => {
                    warn!(z, error = %err, "slice excluded from rotation estimation");
                    slices.push(None);
                }
                Err(err) => return Err(err),
            }
        }
        let sequence = AngleSequence { slices };
        info!(slices = nz, usable = sequence.z_nonzero().len(), mode = ?self.options.mode, "slice angles estimated");
        Ok(sequence)
    }

    /// Centers of mass and angle of slice `z`.
    pub fn estimate_slice(&self, z: usize, source: SliceChannels<'_>, destination: SliceChannels<'_>) -> Result<SliceRotation> {
        let src = compute_principal_axes(&Plane::of(source.segmentation, z))?;
        let dest = compute_principal_axes(&Plane::of(destination.segmentation, z))?;
        self.renderer.principal_axes(z, Side::Source, &src);
        self.renderer.principal_axes(z, Side::Destination, &dest);

        let angle = match self.options.mode {
            RotationMode::None => 0.0,
            _ => {
                self.side_angle(z, Side::Source, &src, source)? + self.side_angle(z, Side::Destination, &dest, destination)?
            }
        };
        Ok(SliceRotation {
            center_source: src.center_of_mass,
            center_destination: dest.center_of_mass,
            angle,
        })
    }

    /// Contribution of one side: its axis rotated onto the x axis for the
    /// source, the x axis rotated onto its axis for the destination.
    fn side_angle(&self, z: usize, side: Side, axes: &PrincipalAxes, channels: SliceChannels<'_>) -> Result<f64> {
        let pca = || -> Result<f64> {
            match side {
                Side::Source => axes.source_angle(),
                Side::Destination => axes.destination_angle(),
            }
        };
        let symmetry = |range: f64| -> Result<f64> {
            let options = self.options.symmetry.clone().with_capture_range(range);
            let plane = Plane::of(channels.intensity(), z);
            let estimate = symmetry_angle(&plane, axes.center_of_mass, &options)?;
            self.renderer.symmetry(z, side, &estimate);
            Ok(match side {
                Side::Source => -estimate.angle,
                Side::Destination => estimate.angle,
            })
        };
        let trusted = |angle: f64| axes.is_trusted(angle, self.options.eigenratio_threshold, self.options.pca_range);

        match self.options.mode {
            RotationMode::None => Ok(0.0),
            RotationMode::PrincipalAxis => {
                let angle = pca()?;
                Ok(if trusted(angle) { angle } else { 0.0 })
            }
            RotationMode::Symmetry => symmetry(self.options.symmetry.capture_range),
            RotationMode::Hybrid => {
                let angle = pca()?;
                if trusted(angle) {
                    Ok(angle)
                } else {
                    symmetry(self.options.hybrid_range)
                }
            }
        }
    }

    /// Smooth the angles of the usable slices along z.
    pub fn regularize(&self, sequence: &mut AngleSequence) -> Result<()> {
        let z_nonzero = sequence.z_nonzero();
        let mut angles = sequence.angles();
        regularize_angles(&mut angles, &z_nonzero, self.options.filter_size)?;
        for &z in &z_nonzero {
            if let Some(rotation) = sequence.slices[z].as_mut() {
                self.renderer.slice_angle(z, rotation.angle, angles[z]);
                rotation.angle = angles[z];
            }
        }
        Ok(())
    }

    /// Forward and inverse planes for every usable slice.
    pub fn build_fields(
        &self,
        sequence: &AngleSequence,
        source: SliceChannels<'_>,
        destination: SliceChannels<'_>,
    ) -> Result<FieldPair> {
        let mut fields = FieldPair::new(destination.segmentation.dims(), source.segmentation.dims());
        fields.fill_parallel(|z| {
            Ok(sequence.rotation(z).map(|rotation| {
                rotation_planes(
                    rotation,
                    &Plane::of(source.segmentation, z),
                    &Plane::of(destination.segmentation, z),
                )
            }))
        })?;
        Ok(fields)
    }
}

fn check_channels(source: SliceChannels<'_>, destination: SliceChannels<'_>) -> Result<()> {
    let nz = destination.segmentation.dims()[2];
    if source.segmentation.dims()[2] != nz {
        return Err(SlicewiseError::ShapeMismatch {
            expected: destination.segmentation.dims().to_vec(),
            actual: source.segmentation.dims().to_vec(),
        });
    }
    for side in [source, destination] {
        if let Some(image) = side.image {
            if image.dims() != side.segmentation.dims() {
                return Err(SlicewiseError::ShapeMismatch {
                    expected: side.segmentation.dims().to_vec(),
                    actual: image.dims().to_vec(),
                });
            }
        }
    }
    Ok(())
}

/// Gaussian smoothing of `angles[z]` over the `z_nonzero` entries only,
/// treated as one contiguous sequence. Width 0 leaves them unchanged.
pub fn regularize_angles(angles: &mut [f64], z_nonzero: &[usize], sigma: f64) -> Result<()> {
    if sigma <= 0.0 || z_nonzero.is_empty() {
        return Ok(());
    }
    if let Some(&z) = z_nonzero.iter().find(|&&z| z >= angles.len()) {
        return Err(SlicewiseError::ShapeMismatch {
            expected: vec![angles.len()],
            actual: vec![z],
        });
    }
    type B = NdArray<f32>;
    let device = Default::default();
    let values: Vec<f32> = z_nonzero.iter().map(|&z| angles[z] as f32).collect();
    let tensor = Tensor::<B, 1>::from_floats(values.as_slice(), &device);
    let smoothed = GaussianFilter::<B>::new(vec![sigma])
        .with_truncate(4.0)
        .with_boundary(BoundaryMode::Reflect)
        .with_max_kernel_width(usize::MAX)
        .apply_tensor(tensor, &Spacing::<1>::uniform(1.0));
    let smoothed = smoothed
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| SlicewiseError::Numerical(format!("angle regularization readback failed: {e:?}")))?;
    for (&z, value) in z_nonzero.iter().zip(smoothed) {
        angles[z] = value as f64;
    }
    Ok(())
}

/// Rigid maps of one slice in physical space.
///
/// The forward map sends a destination point to its source location by
/// rotating about the destination center onto the source center; the
/// inverse map is its exact inverse.
pub fn slice_maps(rotation: &SliceRotation, source: &Plane<'_>, destination: &Plane<'_>) -> (AffineMap2, AffineMap2) {
    let cs = source.physical(rotation.center_source[0], rotation.center_source[1]);
    let cd = destination.physical(rotation.center_destination[0], rotation.center_destination[1]);
    // Pixel-frame angles flip sign in a mirrored physical frame.
    let handedness = if destination.geometry.direction().determinant() < 0.0 { -1.0 } else { 1.0 };
    let phi = -rotation.angle * handedness;
    (
        AffineMap2::rotation_about(phi, cd, cs),
        AffineMap2::rotation_about(-phi, cs, cd),
    )
}

/// Forward plane on the destination grid, inverse plane on the source grid.
pub fn rotation_planes(
    rotation: &SliceRotation,
    source: &Plane<'_>,
    destination: &Plane<'_>,
) -> (DisplacementPlane, DisplacementPlane) {
    let (forward, inverse) = slice_maps(rotation, source, destination);
    (displacement_of(&forward, destination), displacement_of(&inverse, source))
}

/// `map(p) - p` at every pixel of `plane`.
pub(crate) fn displacement_of(map: &AffineMap2, plane: &Plane<'_>) -> DisplacementPlane {
    let [nx, ny] = plane.dims();
    DisplacementPlane::from_fn(nx, ny, |x, y| {
        let p = plane.physical(x as f64, y as f64);
        let q = map.apply(p);
        [q[0] - p[0], q[1] - p[1]]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::NullRenderer;
    use ndarray::Array3;
    use ritk_core::image::ImageMetadata;
    use ritk_io::header_from_metadata;

    fn volume(data: Array3<f32>) -> NiftiVolume {
        let metadata = ImageMetadata::default();
        let dims = [data.shape()[0], data.shape()[1], data.shape()[2]];
        NiftiVolume { header: header_from_metadata(&metadata, dims), metadata, data }
    }

    /// Filled ellipse with semi-axes (7, 3) around `center`, long axis at `angle`.
    fn ellipse(size: usize, nz: usize, center: [f64; 2], angle: f64) -> NiftiVolume {
        let (s, c) = angle.sin_cos();
        volume(Array3::from_shape_fn((size, size, nz), |(x, y, _)| {
            let dx = x as f64 - center[0];
            let dy = y as f64 - center[1];
            let u = c * dx + s * dy;
            let v = -s * dx + c * dy;
            if u * u / 49.0 + v * v / 9.0 <= 1.0 { 1.0 } else { 0.0 }
        }))
    }

    #[test]
    fn test_regularization_with_zero_width_is_identity() {
        let mut angles = vec![0.1, -0.3, 0.0, 0.7];
        regularize_angles(&mut angles, &[0, 1, 3], 0.0).unwrap();
        assert_eq!(angles, vec![0.1, -0.3, 0.0, 0.7]);
    }

    #[test]
    fn test_regularization_skips_excluded_slices() {
        let mut angles = vec![0.2, 0.0, 0.4, 0.6];
        regularize_angles(&mut angles, &[0, 2, 3], 1.0).unwrap();
        assert_eq!(angles[1], 0.0);
        let smoothed = [angles[0], angles[2], angles[3]];
        assert!(smoothed.iter().all(|a| *a >= 0.2 - 1e-6 && *a <= 0.6 + 1e-6));
        assert!(angles[0] > 0.2 && angles[3] < 0.6);
    }

    #[test]
    fn test_center_mass_translation_only() {
        let src = ellipse(32, 2, [12.0, 15.0], 0.3);
        let dest = ellipse(32, 2, [16.0, 14.0], 0.0);
        let estimator = RotationEstimator::new(RotationOptions::new(RotationMode::None), &NullRenderer);
        let outcome = estimator.run(SliceChannels::segmentation(&src), SliceChannels::segmentation(&dest)).unwrap();

        assert_eq!(outcome.angles.angle(0), 0.0);
        // Destination center (16, 14) maps to the source center (12, 15).
        let d = outcome.fields.forward.at(16, 14, 1);
        assert!((d[0] + 4.0).abs() < 1e-6 && (d[1] - 1.0).abs() < 1e-6, "{d:?}");
        let d = outcome.fields.inverse.at(12, 15, 1);
        assert!((d[0] - 4.0).abs() < 1e-6 && (d[1] + 1.0).abs() < 1e-6, "{d:?}");
    }

    #[test]
    fn test_untrusted_axis_contributes_nothing() {
        let src = ellipse(32, 1, [16.0, 16.0], -0.1);
        let dest = ellipse(32, 1, [16.0, 16.0], 0.1);
        let options = RotationOptions::new(RotationMode::PrincipalAxis).with_eigenratio_threshold(1e6);
        let estimator = RotationEstimator::new(options, &NullRenderer);
        let angles = estimator
            .estimate_angles(SliceChannels::segmentation(&src), SliceChannels::segmentation(&dest))
            .unwrap();
        assert_eq!(angles.z_nonzero(), vec![0]);
        assert_eq!(angles.angle(0), 0.0);
    }

    /// Smooth elongated blob for the symmetry detector.
    fn blob(size: usize, center: [f64; 2], angle: f64) -> NiftiVolume {
        let (s, c) = angle.sin_cos();
        volume(Array3::from_shape_fn((size, size, 1), |(x, y, _)| {
            let dx = x as f64 - center[0];
            let dy = y as f64 - center[1];
            let u = c * dx + s * dy;
            let v = -s * dx + c * dy;
            (50.0 * (-(u * u / 120.0 + v * v / 20.0)).exp()) as f32
        }))
    }

    #[test]
    fn test_hybrid_falls_back_to_symmetry() {
        let center = [20.0, 20.0];
        let src_seg = ellipse(41, 1, center, 0.0);
        let dest_seg = ellipse(41, 1, center, 6f64.to_radians());
        let src_im = blob(41, center, 0.0);
        let dest_im = blob(41, center, 6f64.to_radians());
        let options = RotationOptions::new(RotationMode::Hybrid).with_eigenratio_threshold(1e6);
        let estimator = RotationEstimator::new(options, &NullRenderer);
        let rotation = estimator
            .estimate_slice(
                0,
                SliceChannels::with_image(&src_seg, &src_im),
                SliceChannels::with_image(&dest_seg, &dest_im),
            )
            .unwrap();
        assert!((rotation.angle.to_degrees() - 6.0).abs() < 1.5, "angle = {}", rotation.angle.to_degrees());
    }

    #[test]
    fn test_forward_then_inverse_returns_home() {
        let rotation = SliceRotation {
            center_source: [10.0, 12.0],
            center_destination: [14.0, 9.0],
            angle: 0.4,
        };
        let grid = Array3::<f32>::zeros((24, 24, 1));
        let src = volume(grid.clone());
        let dest = volume(grid);
        let (forward, inverse) = slice_maps(&rotation, &Plane::of(&src, 0), &Plane::of(&dest, 0));
        for p in [[0.0, 0.0], [5.0, 17.0], [23.0, 3.0]] {
            let back = inverse.apply(forward.apply(p));
            assert!((back[0] - p[0]).abs() < 1e-9 && (back[1] - p[1]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_mode_from_params() {
        let params = RegistrationParams::new(Algorithm::CenterMassRot).with_rotation_method(RotationMethod::Auto);
        assert_eq!(RotationMode::from_params(&params).unwrap(), RotationMode::Hybrid);
        assert_eq!(
            RotationMode::from_params(&RegistrationParams::new(Algorithm::CenterMass)).unwrap(),
            RotationMode::None
        );
        assert!(RotationMode::from_params(&RegistrationParams::new(Algorithm::Affine)).is_err());
    }
}
