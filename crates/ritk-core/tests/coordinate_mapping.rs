use ritk_core::image::Image;
use ritk_core::spatial::{Point, Spacing, Direction};
use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use proptest::prelude::*;

type Backend = NdArray<f32>;
const D: usize = 3;

fn make_rotation(angle_x: f64, angle_y: f64, angle_z: f64) -> Direction<D> {
    let cx = angle_x.cos(); let sx = angle_x.sin();
    let cy = angle_y.cos(); let sy = angle_y.sin();
    let cz = angle_z.cos(); let sz = angle_z.sin();

    // Rx * Ry * Rz
    let mut rot = Direction::<D>::identity();
    let m = rot.inner_mut();
    
    // Rz
    let rz = nalgebra::SMatrix::<f64, 3, 3>::new(
        cz, -sz, 0.0,
        sz, cz, 0.0,
        0.0, 0.0, 1.0
    );
    
    // Ry
    let ry = nalgebra::SMatrix::<f64, 3, 3>::new(
        cy, 0.0, sy,
        0.0, 1.0, 0.0,
        -sy, 0.0, cy
    );
    
    // Rx
    let rx = nalgebra::SMatrix::<f64, 3, 3>::new(
        1.0, 0.0, 0.0,
        0.0, cx, -sx,
        0.0, sx, cx
    );
    
    *m = rx * ry * rz;
    rot
}

proptest! {
    #[test]
    fn test_coordinate_roundtrip(
        ox in -100.0f64..100.0, oy in -100.0f64..100.0, oz in -100.0f64..100.0,
        sx in 0.1f64..5.0, sy in 0.1f64..5.0, sz in 0.1f64..5.0,
        ax in -3.14f64..3.14, ay in -3.14f64..3.14, az in -3.14f64..3.14,
        px in -50.0f64..50.0, py in -50.0f64..50.0, pz in -50.0f64..50.0
    ) {
        let device = Default::default();
        // Use minimal data tensor as we don't access it
        let data = Tensor::<Backend, D>::zeros([2, 2, 2], &device);
        
        let origin = Point::<D>::new([ox, oy, oz]);
        let spacing = Spacing::<D>::new([sx, sy, sz]);
        let direction = make_rotation(ax, ay, az);
        
        let image = Image::new(data, origin, spacing, direction);
        let point = Point::<D>::new([px, py, pz]);
        
        let index = image.transform_physical_point_to_continuous_index(&point);
        let recovered = image.transform_continuous_index_to_physical_point(&index);
        
        prop_assert!((point[0] - recovered[0]).abs() < 1e-4, "X mismatch: {} vs {}", point[0], recovered[0]);
        prop_assert!((point[1] - recovered[1]).abs() < 1e-4, "Y mismatch: {} vs {}", point[1], recovered[1]);
        prop_assert!((point[2] - recovered[2]).abs() < 1e-4, "Z mismatch: {} vs {}", point[2], recovered[2]);
    }

    #[test]
    fn test_slice_geometry_matches_volume(
        ox in -100.0f64..100.0, oy in -100.0f64..100.0, oz in -100.0f64..100.0,
        sx in 0.1f64..5.0, sy in 0.1f64..5.0, sz in 0.5f64..5.0,
        az in -3.14f64..3.14, ax in -0.3f64..0.3,
        ix in 0.0f64..40.0, iy in 0.0f64..40.0, iz in 0usize..4
    ) {
        let device = Default::default();
        let data = Tensor::<Backend, D>::zeros([4, 2, 2], &device);
        let image = Image::new(
            data,
            Point::<D>::new([ox, oy, oz]),
            Spacing::<D>::new([sx, sy, sz]),
            make_rotation(ax, 0.0, az),
        );

        let volume_point = image.transform_continuous_index_to_physical_point(&Point::new([ix, iy, iz as f64]));
        let slice_point = image.slice_metadata(iz).index_to_physical(&Point::new([ix, iy]));

        prop_assert!((volume_point[0] - slice_point[0]).abs() < 1e-6);
        prop_assert!((volume_point[1] - slice_point[1]).abs() < 1e-6);
    }

    #[test]
    fn test_tensor_batch_consistency(
        ox in -10.0f64..10.0, oy in -10.0f64..10.0,
        sx in 0.5f64..2.0, sy in 0.5f64..2.0,
        px in -10.0f64..10.0, py in -10.0f64..10.0,
        az in -3.14f64..3.14
    ) {
        let device = Default::default();
        let data = Tensor::<Backend, D>::zeros([2, 2, 2], &device);
        let image = Image::new(
            data,
            Point::<D>::new([ox, oy, 0.0]),
            Spacing::<D>::new([sx, sy, 1.0]),
            make_rotation(0.0, 0.0, az),
        );

        let point_val = Point::<D>::new([px, py, 0.5]);
        let index_val = image.transform_physical_point_to_continuous_index(&point_val);

        let points_tensor = Tensor::<Backend, 2>::from_floats([[px as f32, py as f32, 0.5]], &device);
        let indices_data = image.world_to_index_tensor(points_tensor).into_data();
        let indices_slice = indices_data.as_slice::<f32>().unwrap();

        for k in 0..D {
            prop_assert!((indices_slice[k] - index_val[k] as f32).abs() < 1e-3);
        }
    }
}
