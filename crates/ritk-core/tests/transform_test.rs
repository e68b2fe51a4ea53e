use burn::tensor::{Tensor, TensorData};
use burn_ndarray::NdArray;
use ritk_core::transform::{AffineMap2, RigidTransform, ToAffineMap, Transform};
use std::f32::consts::PI;

type B = NdArray<f32>;

#[test]
fn test_rigid_transform_2d() {
    let device = Default::default();

    // (1, 0) -> rotate 90 -> (0, 1) -> translate (1, 1) -> (1, 2)
    let points = Tensor::<B, 2>::from_data(TensorData::from([[1.0, 0.0]]), &device);
    let translation = Tensor::<B, 1>::from_data(TensorData::from([1.0, 1.0]), &device);
    let angle = Tensor::<B, 1>::from_data(TensorData::from([PI / 2.0]), &device);
    let center = Tensor::<B, 1>::zeros([2], &device);
    let transform = RigidTransform::<B>::new(translation, angle, center);

    let result = transform.transform_points(points).into_data();
    let actual = result.as_slice::<f32>().unwrap();
    assert!((actual[0] - 1.0).abs() < 1e-5, "X mismatch: got {}", actual[0]);
    assert!((actual[1] - 2.0).abs() < 1e-5, "Y mismatch: got {}", actual[1]);
}

#[test]
fn test_readback_inverse_round_trip() {
    let device = Default::default();
    let transform = RigidTransform::<B>::new(
        Tensor::from_floats([2.0, -3.0], &device),
        Tensor::from_floats([-0.4], &device),
        Tensor::from_floats([10.0, 20.0], &device),
    );
    let forward = transform.to_affine_map().unwrap();
    let inverse = forward.inverse().unwrap();

    for p in [[0.0, 0.0], [10.0, 20.0], [-7.5, 31.0]] {
        let q = inverse.apply(forward.apply(p));
        assert!((q[0] - p[0]).abs() < 1e-5);
        assert!((q[1] - p[1]).abs() < 1e-5);
    }

    let identity = forward.compose(&inverse);
    let expected = AffineMap2::identity();
    for (a, b) in identity.matrix.iter().zip(expected.matrix.iter()) {
        assert!((a - b).abs() < 1e-9);
    }
}
