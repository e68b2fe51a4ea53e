use ndarray::Array3;
use ritk_core::image::ImageMetadata;
use ritk_core::spatial::{Direction, Point, Spacing};
use ritk_io::{header_from_metadata, NiftiVolume};
use ritk_slicewise::columnwise::ColumnwiseEstimator;
use ritk_slicewise::debug::NullRenderer;
use ritk_slicewise::SlicewiseError;

fn rect_volume(metadata: ImageMetadata<3>, x: (usize, usize), y: (usize, usize), nz: usize) -> NiftiVolume {
    let data = Array3::from_shape_fn((40, 40, nz), |(i, j, _)| {
        if (x.0..=x.1).contains(&i) && (y.0..=y.1).contains(&j) { 1.0 } else { 0.0 }
    });
    NiftiVolume {
        header: header_from_metadata(&metadata, [40, 40, nz]),
        metadata,
        data,
    }
}

fn assert_close(p: [f64; 2], q: [f64; 2], tolerance: f64) {
    assert!(
        (p[0] - q[0]).abs() <= tolerance && (p[1] - q[1]).abs() <= tolerance,
        "{p:?} is not within {tolerance} of {q:?}"
    );
}

#[test]
fn test_rectangle_corners_are_matched() {
    let metadata = ImageMetadata::default();
    let src = rect_volume(metadata, (10, 19), (12, 21), 2);
    let dest = rect_volume(metadata, (8, 27), (10, 15), 2);
    let outcome = ColumnwiseEstimator::new(0.0, &NullRenderer).run(&src, &dest).unwrap();
    assert!(outcome.skipped.is_empty());

    let corners = [((8, 10), (10, 12)), ((27, 10), (19, 12)), ((8, 15), (10, 21)), ((27, 15), (19, 21))];
    for z in 0..2 {
        for &((dx, dy), (sx, sy)) in &corners {
            let d = outcome.fields.forward.at(dx, dy, z);
            assert_close([dx as f64 + d[0], dy as f64 + d[1]], [sx as f64, sy as f64], 1.0);

            let d = outcome.fields.inverse.at(sx, sy, z);
            assert_close([sx as f64 + d[0], sy as f64 + d[1]], [dx as f64, dy as f64], 1.0);
        }
    }
}

#[test]
fn test_displacements_are_physical() {
    // Displacements are in mm; divide by the 0.5 mm spacing to get pixels.
    let metadata = ImageMetadata::new(
        Point::new([-10.0, 4.0, 0.0]),
        Spacing::new([0.5, 0.5, 2.0]),
        Direction::identity(),
    );
    let src = rect_volume(metadata, (10, 19), (12, 21), 1);
    let dest = rect_volume(metadata, (8, 27), (10, 15), 1);
    let outcome = ColumnwiseEstimator::new(0.0, &NullRenderer).run(&src, &dest).unwrap();

    let d = outcome.fields.forward.at(8, 10, 0);
    assert_close([8.0 + d[0] / 0.5, 10.0 + d[1] / 0.5], [10.0, 12.0], 1.0);
}

#[test]
fn test_empty_slice_is_skipped() {
    let metadata = ImageMetadata::default();
    let mut src = rect_volume(metadata, (10, 19), (12, 21), 3);
    src.data.index_axis_mut(ndarray::Axis(2), 1).fill(0.0);
    let dest = rect_volume(metadata, (8, 27), (10, 15), 3);
    let outcome = ColumnwiseEstimator::new(1.0, &NullRenderer).run(&src, &dest).unwrap();
    assert_eq!(outcome.skipped, vec![1]);
    assert_eq!(outcome.fields.inverse.at(12, 14, 1), [0.0, 0.0]);
}

#[test]
fn test_grids_must_agree() {
    let metadata = ImageMetadata::default();
    let src = rect_volume(metadata, (10, 19), (12, 21), 2);
    let dest = rect_volume(metadata, (8, 27), (10, 15), 3);
    let err = ColumnwiseEstimator::new(1.0, &NullRenderer).run(&src, &dest).unwrap_err();
    assert!(matches!(err, SlicewiseError::ShapeMismatch { .. }));
}
