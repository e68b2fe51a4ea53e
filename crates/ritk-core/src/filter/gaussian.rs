use burn::tensor::backend::Backend;
use burn::tensor::ops::ConvOptions;
use burn::tensor::{Int, Shape, Tensor};
use crate::image::Image;
use crate::spatial::Spacing;

/// How samples beyond the edge of the signal are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryMode {
    /// Samples outside the signal are zero.
    #[default]
    Zero,
    /// Samples outside the signal repeat the edge value.
    Nearest,
    /// Half-sample symmetric mirroring (`d c b a | a b c d | d c b a`).
    Reflect,
}

/// Gaussian smoothing filter.
///
/// Applies separable 1D convolutions. Sigmas are given per spatial axis in
/// `(x, y, z)` order and in physical units; they are converted to pixels
/// with the spacing of the matching axis.
pub struct GaussianFilter<B: Backend> {
    sigmas: Vec<f64>,
    truncate: f64,
    max_kernel_width: usize,
    boundary: BoundaryMode,
    _b: std::marker::PhantomData<B>,
}

impl<B: Backend> GaussianFilter<B> {
    /// Create a new Gaussian filter with standard deviations in physical units.
    pub fn new(sigmas: Vec<f64>) -> Self {
        Self {
            sigmas,
            truncate: 3.0,
            max_kernel_width: 32,
            boundary: BoundaryMode::Zero,
            _b: std::marker::PhantomData,
        }
    }

    /// Set the maximum kernel width (radius * 2 + 1).
    pub fn with_max_kernel_width(mut self, width: usize) -> Self {
        self.max_kernel_width = width.max(1);
        self
    }

    /// Kernel radius in standard deviations.
    pub fn with_truncate(mut self, truncate: f64) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn with_boundary(mut self, boundary: BoundaryMode) -> Self {
        self.boundary = boundary;
        self
    }

    /// Apply the filter to an image.
    pub fn apply<const D: usize>(&self, image: &Image<B, D>) -> Image<B, D> {
        let data = self.apply_tensor(image.data().clone(), image.spacing());
        Image::from_metadata(data, *image.metadata())
    }

    /// Apply the filter to a tensor laid out like an image (`[.., Y, X]`).
    pub fn apply_tensor<const D: usize>(&self, input: Tensor<B, D>, spacing: &Spacing<D>) -> Tensor<B, D> {
        let mut data = input;
        let device = data.device();

        for dim in 0..D {
            // Tensor dimension `dim` holds spatial axis `D - 1 - dim`.
            let axis = D - 1 - dim;
            let sigma = self.sigmas.get(axis).or(self.sigmas.first()).copied().unwrap_or(0.0);
            if sigma <= 1e-6 {
                continue;
            }

            let pixel_sigma = sigma / spacing[axis];
            let radius = (self.truncate * pixel_sigma + 0.5).floor() as usize;
            let width = (2 * radius + 1).min(self.max_kernel_width);
            let actual_radius = (width - 1) / 2;
            if actual_radius == 0 {
                continue;
            }

            let kernel = Self::generate_kernel(pixel_sigma, actual_radius);
            let kernel_tensor = Tensor::<B, 1>::from_floats(kernel.as_slice(), &device);
            data = self.convolve_1d::<D>(data, kernel_tensor, dim);
        }
        data
    }

    fn generate_kernel(sigma: f64, radius: usize) -> Vec<f32> {
        let two_sigma2 = 2.0 * sigma * sigma;
        let raw: Vec<f64> = (0..=2 * radius)
            .map(|i| {
                let x = i as f64 - radius as f64;
                (-x * x / two_sigma2).exp()
            })
            .collect();
        let sum: f64 = raw.iter().sum();
        raw.iter().map(|v| (v / sum) as f32).collect()
    }

    /// Source index for every padded position `-radius..len + radius`.
    fn padding_indices(&self, len: usize, radius: usize) -> Vec<i32> {
        let n = len as i64;
        (-(radius as i64)..n + radius as i64)
            .map(|i| {
                let src = match self.boundary {
                    BoundaryMode::Nearest | BoundaryMode::Zero => i.clamp(0, n - 1),
                    BoundaryMode::Reflect => {
                        let period = 2 * n;
                        let m = i.rem_euclid(period);
                        if m >= n { period - 1 - m } else { m }
                    }
                };
                src as i32
            })
            .collect()
    }

    fn convolve_1d<const D: usize>(&self, input: Tensor<B, D>, kernel: Tensor<B, 1>, dim: usize) -> Tensor<B, D> {
        let dims: [usize; D] = input.dims();
        let device = input.device();

        // 1. Move the target dimension last.
        let mut permute_indices = [0isize; D];
        let mut idx = 0;
        for i in 0..D {
            if i != dim {
                permute_indices[idx] = i as isize;
                idx += 1;
            }
        }
        permute_indices[D - 1] = dim as isize;
        let input_permuted = input.permute(permute_indices);

        // 2. Flatten the other dimensions into the conv1d batch.
        let length = dims[dim];
        let batch_size: usize = (0..D).filter(|&i| i != dim).map(|i| dims[i]).product();
        let mut signal = input_permuted.reshape([batch_size, 1, length]);

        let kernel_size = kernel.dims()[0];
        let radius = kernel_size / 2;
        let padding = match self.boundary {
            BoundaryMode::Zero => radius,
            BoundaryMode::Nearest | BoundaryMode::Reflect => {
                let indices = self.padding_indices(length, radius);
                let index_tensor = Tensor::<B, 1, Int>::from_ints(indices.as_slice(), &device);
                signal = signal.select(2, index_tensor);
                0
            }
        };

        let options = ConvOptions::new([1], [padding], [1], 1);
        let output = burn::tensor::module::conv1d(signal, kernel.reshape([1, 1, kernel_size]), None, options);

        // 3. Restore the original layout.
        let mut permuted_shape = [0usize; D];
        let mut p_idx = 0;
        for i in 0..D {
            if i != dim {
                permuted_shape[p_idx] = dims[i];
                p_idx += 1;
            }
        }
        permuted_shape[D - 1] = length;
        let output_permuted = output.reshape(Shape::new(permuted_shape));

        let mut inverse = [0isize; D];
        for (new_pos, &old_pos) in permute_indices.iter().enumerate() {
            inverse[old_pos as usize] = new_pos as isize;
        }
        output_permuted.permute(inverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn to_vec<const D: usize>(t: Tensor<B, D>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_kernel_is_normalized() {
        let kernel = GaussianFilter::<B>::generate_kernel(1.5, 4);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(kernel.len(), 9);
    }

    #[test]
    fn test_nearest_boundary_preserves_constant_signal() {
        let device = Default::default();
        let input = Tensor::<B, 1>::from_floats([3.0f32; 7].as_slice(), &device);
        let filter = GaussianFilter::<B>::new(vec![1.0]).with_boundary(BoundaryMode::Nearest);
        for v in to_vec(filter.apply_tensor(input, &Spacing::new([1.0]))) {
            assert!((v - 3.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_reflect_boundary_preserves_linear_ramp_interior_and_range() {
        let device = Default::default();
        let values: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let input = Tensor::<B, 1>::from_floats(values.as_slice(), &device);
        let filter = GaussianFilter::<B>::new(vec![1.0])
            .with_truncate(4.0)
            .with_boundary(BoundaryMode::Reflect);
        let out = to_vec(filter.apply_tensor(input, &Spacing::new([1.0])));
        assert!((out[6] - 6.0).abs() < 1e-4);
        assert!(out.iter().all(|&v| (0.0..=11.0).contains(&v)));
    }

    #[test]
    fn test_reflect_indices_wrap_for_short_signals() {
        let filter = GaussianFilter::<B>::new(vec![1.0]).with_boundary(BoundaryMode::Reflect);
        assert_eq!(filter.padding_indices(2, 3), vec![1, 1, 0, 0, 1, 1, 0, 0]);
    }

    #[test]
    fn test_sigma_follows_spatial_axis_order() {
        // 2D image [Y=5, X=5] with a single bright column at x=2.
        let device = Default::default();
        let mut values = vec![0.0f32; 25];
        for y in 0..5 {
            values[y * 5 + 2] = 1.0;
        }
        let input = Tensor::<B, 2>::from_data(TensorData::new(values, Shape::new([5, 5])), &device);

        // Smoothing only along y leaves the column untouched.
        let filter = GaussianFilter::<B>::new(vec![0.0, 1.0]).with_boundary(BoundaryMode::Nearest);
        let out = to_vec(filter.apply_tensor(input, &Spacing::new([1.0, 1.0])));
        for y in 0..5 {
            assert!((out[y * 5 + 2] - 1.0).abs() < 1e-5);
            assert!(out[y * 5 + 1].abs() < 1e-6);
        }
    }
}
