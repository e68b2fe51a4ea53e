use ndarray::{Array2, Array3};
use proptest::prelude::*;
use ritk_core::image::ImageMetadata;
use ritk_io::{header_from_metadata, NiftiVolume};
use ritk_slicewise::angle::{compute_principal_axes, principal_axes_of_points, symmetry_angle, SymmetryOptions};
use ritk_slicewise::debug::NullRenderer;
use ritk_slicewise::plane::Plane;
use ritk_slicewise::field::DisplacementField;
use ritk_slicewise::rotation::{regularize_angles, RotationEstimator, RotationMode, RotationOptions, SliceChannels};
use ritk_slicewise::SlicewiseError;

fn volume(data: Array3<f32>) -> NiftiVolume {
    let metadata = ImageMetadata::default();
    let dims = [data.shape()[0], data.shape()[1], data.shape()[2]];
    NiftiVolume {
        header: header_from_metadata(&metadata, dims),
        metadata,
        data,
    }
}

/// Filled ellipse with semi-axes `[a, b]`, long axis at `angle` from x.
fn ellipse_volume(size: usize, nz: usize, angle: f64, [a, b]: [f64; 2]) -> NiftiVolume {
    let c = (size as f64 - 1.0) / 2.0;
    let (s, co) = angle.sin_cos();
    volume(Array3::from_shape_fn((size, size, nz), |(x, y, _)| {
        let (dx, dy) = (x as f64 - c, y as f64 - c);
        let u = co * dx + s * dy;
        let v = -s * dx + co * dy;
        if (u / a).powi(2) + (v / b).powi(2) <= 1.0 { 1.0 } else { 0.0 }
    }))
}

/// One smooth blob per slice, long axis of slice `z` at `angles[z]`.
fn blob_volume(size: usize, angles: &[f64]) -> NiftiVolume {
    let slices: Vec<Array2<f32>> = angles.iter().map(|&a| blob(size, a, 100.0)).collect();
    volume(Array3::from_shape_fn((size, size, angles.len()), |(x, y, z)| slices[z][[x, y]]))
}

/// Bilinear sample of a field at a continuous in-plane position.
fn sample(field: &DisplacementField, [x, y]: [f64; 2], z: usize) -> [f64; 2] {
    let (x0, y0) = (x.floor() as usize, y.floor() as usize);
    let (fx, fy) = (x - x0 as f64, y - y0 as f64);
    let [nx, ny, _] = field.dims();
    let (x1, y1) = ((x0 + 1).min(nx - 1), (y0 + 1).min(ny - 1));
    let mut out = [0.0; 2];
    for c in 0..2 {
        let top = field.at(x0, y0, z)[c] * (1.0 - fx) + field.at(x1, y0, z)[c] * fx;
        let bottom = field.at(x0, y1, z)[c] * (1.0 - fx) + field.at(x1, y1, z)[c] * fx;
        out[c] = top * (1.0 - fy) + bottom * fy;
    }
    out
}

/// Lattice points of an axis-aligned ellipse, rotated by `angle`.
fn rotated_cloud(angle: f64) -> Vec<[f64; 2]> {
    let (s, c) = angle.sin_cos();
    let mut points = Vec::new();
    for i in -9i32..=9 {
        for j in -4i32..=4 {
            let (u, v) = (i as f64, j as f64);
            if u * u / 81.0 + v * v / 16.0 <= 1.0 {
                points.push([c * u - s * v + 5.0, s * u + c * v - 2.0]);
            }
        }
    }
    points
}

#[test]
fn test_principal_axis_recovers_thirty_degrees() {
    let src = ellipse_volume(81, 3, (-15f64).to_radians(), [20.0, 8.0]);
    let dest = ellipse_volume(81, 3, 15f64.to_radians(), [20.0, 8.0]);
    let options = RotationOptions::new(RotationMode::PrincipalAxis).with_eigenratio_threshold(1.6);
    let outcome = RotationEstimator::new(options, &NullRenderer)
        .run(SliceChannels::segmentation(&src), SliceChannels::segmentation(&dest))
        .unwrap();

    assert!(outcome.excluded_slices().is_empty());
    for z in 0..3 {
        let angle = outcome.angles.angle(z).to_degrees();
        assert!((angle - 30.0).abs() < 2.0, "slice {z}: {angle}");
    }

    // Forward then inverse returns every destination pixel to itself.
    let fields = &outcome.fields;
    let mut checked = 0;
    for z in 0..3 {
        for x in (0..81).step_by(5) {
            for y in (0..81).step_by(5) {
                let d = fields.forward.at(x, y, z);
                let q = [x as f64 + d[0], y as f64 + d[1]];
                if !(0.0..80.0).contains(&q[0]) || !(0.0..80.0).contains(&q[1]) {
                    continue;
                }
                let back = sample(&fields.inverse, q, z);
                let r = [q[0] + back[0], q[1] + back[1]];
                let error = (r[0] - x as f64).hypot(r[1] - y as f64);
                assert!(error < 1.0, "slice {z}, pixel ({x}, {y}): off by {error}");
                checked += 1;
            }
        }
    }
    assert!(checked > 300, "only {checked} pixels stayed inside the source grid");
}

#[test]
fn test_symmetry_mode_sums_both_sides() {
    let src = blob_volume(48, &[(-4f64).to_radians(); 2]);
    let dest = blob_volume(48, &[6f64.to_radians(); 2]);
    let outcome = RotationEstimator::new(RotationOptions::new(RotationMode::Symmetry), &NullRenderer)
        .run(SliceChannels::segmentation(&src), SliceChannels::segmentation(&dest))
        .unwrap();

    assert_eq!(outcome.angles.z_nonzero(), vec![0, 1]);
    for z in 0..2 {
        let angle = outcome.angles.angle(z).to_degrees();
        assert!((angle - 10.0).abs() < 2.5, "slice {z}: {angle}");
    }
}

#[test]
fn test_hybrid_falls_back_to_symmetry_on_round_segmentation() {
    // The source ellipse is trusted and axis aligned. The destination disk
    // has no principal axis, so its angle comes from the image.
    let src_seg = ellipse_volume(48, 1, 0.0, [14.0, 5.0]);
    let src_image = blob_volume(48, &[0.0]);
    let dest_seg = ellipse_volume(48, 1, 0.0, [9.0, 9.0]);
    let dest_image = blob_volume(48, &[6f64.to_radians()]);
    let outcome = RotationEstimator::new(RotationOptions::new(RotationMode::Hybrid), &NullRenderer)
        .run(
            SliceChannels::with_image(&src_seg, &src_image),
            SliceChannels::with_image(&dest_seg, &dest_image),
        )
        .unwrap();

    let angle = outcome.angles.angle(0).to_degrees();
    assert!((angle - 6.0).abs() < 1.5, "angle = {angle}");

    let pca_only = RotationEstimator::new(RotationOptions::new(RotationMode::PrincipalAxis), &NullRenderer)
        .run(
            SliceChannels::with_image(&src_seg, &src_image),
            SliceChannels::with_image(&dest_seg, &dest_image),
        )
        .unwrap();
    assert!(pca_only.angles.angle(0).abs() < 1e-9);
}

#[test]
fn test_symmetry_outside_capture_range_excludes_slice() {
    let src = blob_volume(48, &[0.0, 0.0]);
    let dest = blob_volume(48, &[5f64.to_radians(), 45f64.to_radians()]);
    let mut options = RotationOptions::new(RotationMode::Symmetry);
    options.symmetry.capture_range = 10f64.to_radians();
    let outcome = RotationEstimator::new(options, &NullRenderer)
        .run(SliceChannels::segmentation(&src), SliceChannels::segmentation(&dest))
        .unwrap();

    assert_eq!(outcome.angles.z_nonzero(), vec![0]);
    assert_eq!(outcome.excluded_slices(), vec![1]);
    assert!((outcome.angles.angle(0).to_degrees() - 5.0).abs() < 1.5);
    assert!(!outcome.fields.forward.is_written(1));
}

#[test]
fn test_empty_source_slice_is_excluded() {
    let mut src = ellipse_volume(33, 4, 0.1, [9.0, 4.0]);
    src.data.index_axis_mut(ndarray::Axis(2), 2).fill(0.0);
    let dest = ellipse_volume(33, 4, 0.2, [9.0, 4.0]);
    let options = RotationOptions::new(RotationMode::PrincipalAxis).with_filter_size(1.0);
    let outcome = RotationEstimator::new(options, &NullRenderer)
        .run(SliceChannels::segmentation(&src), SliceChannels::segmentation(&dest))
        .unwrap();

    assert_eq!(outcome.angles.z_nonzero(), vec![0, 1, 3]);
    assert_eq!(outcome.excluded_slices(), vec![2]);
    assert!(!outcome.fields.forward.is_written(2));
    assert_eq!(outcome.fields.forward.at(16, 16, 2), [0.0, 0.0]);
    assert!(outcome.fields.forward.is_written(3));
}

#[test]
fn test_empty_slice_error_carries_index() {
    let data = Array2::<f32>::zeros((10, 10));
    let err = compute_principal_axes(&Plane::new(7, data.view(), ImageMetadata::default())).unwrap_err();
    assert!(matches!(err, SlicewiseError::EmptySlice { z: 7 }));
    assert!(err.is_recoverable());
}

#[test]
fn test_derotation_leaves_no_residual() {
    let axes = principal_axes_of_points(&rotated_cloud(0.37)).unwrap();
    let estimated = -axes.source_angle().unwrap();
    let residual = principal_axes_of_points(&rotated_cloud(0.37 - estimated))
        .unwrap()
        .destination_angle()
        .unwrap();
    assert!(residual.abs() < 1e-3, "residual = {residual}");
}

/// Smooth elongated blob, long axis at `angle`.
fn blob(size: usize, angle: f64, gain: f32) -> Array2<f32> {
    let c = (size as f64 - 1.0) / 2.0;
    let (s, co) = angle.sin_cos();
    Array2::from_shape_fn((size, size), |(x, y)| {
        let (dx, dy) = (x as f64 - c, y as f64 - c);
        let u = co * dx + s * dy;
        let v = -s * dx + co * dy;
        gain * (-(u * u / 120.0 + v * v / 20.0)).exp() as f32
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_center_of_mass_is_centroid(
        pixels in proptest::collection::hash_set((0usize..16, 0usize..16), 1..60),
    ) {
        let mut data = Array2::<f32>::zeros((16, 16));
        for &(x, y) in &pixels {
            data[[x, y]] = 1.0;
        }
        let axes = compute_principal_axes(&Plane::new(0, data.view(), ImageMetadata::default())).unwrap();
        let n = pixels.len() as f64;
        let cx = pixels.iter().map(|p| p.0 as f64).sum::<f64>() / n;
        let cy = pixels.iter().map(|p| p.1 as f64).sum::<f64>() / n;
        prop_assert!((axes.center_of_mass[0] - cx).abs() < 1e-9);
        prop_assert!((axes.center_of_mass[1] - cy).abs() < 1e-9);

        let [a, b] = axes.axes;
        prop_assert!((a[0].hypot(a[1]) - 1.0).abs() < 1e-9);
        prop_assert!((b[0].hypot(b[1]) - 1.0).abs() < 1e-9);
        prop_assert!((a[0] * b[0] + a[1] * b[1]).abs() < 1e-9);
        prop_assert!(a[0] >= 0.0);
    }

    #[test]
    fn prop_regularization_never_widens_range(
        angles in proptest::collection::vec(-1.0f64..1.0, 3..24),
        keep in proptest::collection::vec(any::<bool>(), 24),
        sigma in 0.5f64..4.0,
    ) {
        let z_nonzero: Vec<usize> = (0..angles.len()).filter(|&z| keep[z]).collect();
        prop_assume!(!z_nonzero.is_empty());
        let (lo, hi) = z_nonzero
            .iter()
            .fold((f64::MAX, f64::MIN), |(lo, hi), &z| (lo.min(angles[z]), hi.max(angles[z])));

        let mut smoothed = angles.clone();
        regularize_angles(&mut smoothed, &z_nonzero, sigma).unwrap();
        for z in 0..angles.len() {
            if keep[z] {
                prop_assert!(smoothed[z] >= lo - 1e-5 && smoothed[z] <= hi + 1e-5);
            } else {
                prop_assert_eq!(smoothed[z], angles[z]);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_symmetry_ignores_intensity_scale(gain in 0.05f32..200.0, degrees in -12.0f64..12.0) {
        let options = SymmetryOptions::default();
        let bin = 2.0 * std::f64::consts::PI / options.bins as f64;
        let reference = blob(41, degrees.to_radians(), 1.0);
        let scaled = blob(41, degrees.to_radians(), gain);
        let geometry = ImageMetadata::default();
        let a = symmetry_angle(&Plane::new(0, reference.view(), geometry), [20.0, 20.0], &options).unwrap();
        let b = symmetry_angle(&Plane::new(0, scaled.view(), geometry), [20.0, 20.0], &options).unwrap();
        prop_assert!((a.angle - b.angle).abs() <= bin, "{} vs {}", a.angle, b.angle);
    }
}
