//! Index grids for sampling every pixel of an image.

use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};

/// Continuous indices of every pixel of an image with tensor shape `shape`.
///
/// Returns `[N, D]` rows ordered like the tensor's row-major storage, each
/// row holding the index in `(x, y, z)` order (the reverse of `shape`).
pub fn generate_grid<B: Backend, const D: usize>(shape: [usize; D], device: &B::Device) -> Tensor<B, 2> {
    let total: usize = shape.iter().product();
    let mut grid = Vec::with_capacity(total * D);
    let mut counter = [0usize; D];

    for _ in 0..total {
        for axis in (0..D).rev() {
            grid.push(counter[axis] as f32);
        }
        for axis in (0..D).rev() {
            counter[axis] += 1;
            if counter[axis] < shape[axis] {
                break;
            }
            counter[axis] = 0;
        }
    }

    Tensor::<B, 1>::from_data(TensorData::new(grid, Shape::new([total * D])), device).reshape([total, D])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_grid_2d_is_x_fastest() {
        let device = Default::default();
        let grid = generate_grid::<B, 2>([2, 3], &device);
        assert_eq!(grid.dims(), [6, 2]);
        let values = grid.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0]);
    }

    #[test]
    fn test_grid_3d_last_row() {
        let device = Default::default();
        let grid = generate_grid::<B, 3>([2, 3, 4], &device);
        assert_eq!(grid.dims(), [24, 3]);
        let values = grid.into_data().to_vec::<f32>().unwrap();
        assert_eq!(&values[69..72], &[3.0, 2.0, 1.0]);
    }
}
