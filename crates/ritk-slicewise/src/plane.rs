//! Axial slices of a volume together with their in-plane geometry.

use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};
use ndarray::{Array2, ArrayView2, Axis};
use ritk_core::image::{Image, ImageMetadata};
use ritk_core::spatial::Point2;
use ritk_io::NiftiVolume;

/// One z-slice, borrowed from its volume. Pixels are indexed `[[x, y]]`.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub z: usize,
    pub data: ArrayView2<'a, f32>,
    pub geometry: ImageMetadata<2>,
}

impl<'a> Plane<'a> {
    pub fn new(z: usize, data: ArrayView2<'a, f32>, geometry: ImageMetadata<2>) -> Self {
        Self { z, data, geometry }
    }

    /// Slice `z` of `volume`.
    pub fn of(volume: &'a NiftiVolume, z: usize) -> Self {
        Self {
            z,
            data: volume.data.index_axis(Axis(2), z),
            geometry: volume.metadata.slice(z),
        }
    }

    /// `(nx, ny)`
    pub fn dims(&self) -> [usize; 2] {
        let s = self.data.shape();
        [s[0], s[1]]
    }

    /// Physical position of the continuous pixel `(x, y)`.
    pub fn physical(&self, x: f64, y: f64) -> [f64; 2] {
        let p = self.geometry.index_to_physical(&Point2::new([x, y]));
        [p[0], p[1]]
    }

    /// Continuous pixel position of a physical point.
    pub fn index_of(&self, point: [f64; 2]) -> [f64; 2] {
        let i = self.geometry.physical_to_index(&Point2::new(point));
        [i[0], i[1]]
    }

    /// Copy into a tensor image (`[Y, X]` layout).
    pub fn to_image<B: Backend>(&self, device: &B::Device) -> Image<B, 2> {
        let [nx, ny] = self.dims();
        let values: Vec<f32> = self.data.t().iter().copied().collect();
        let tensor = Tensor::<B, 2>::from_data(TensorData::new(values, Shape::new([ny, nx])), device);
        Image::from_metadata(tensor, self.geometry)
    }
}

/// Read a `[Y, X]` tensor back into an `[[x, y]]` array.
pub fn tensor_to_plane<B: Backend>(tensor: Tensor<B, 2>) -> Option<Array2<f32>> {
    let [ny, nx] = tensor.dims();
    let values = tensor.into_data().to_vec::<f32>().ok()?;
    Array2::from_shape_vec((ny, nx), values).ok().map(|a| a.reversed_axes())
}

/// Copy an `[[x, y]]` array into a `[Y, X]` tensor.
pub fn plane_to_tensor<B: Backend>(plane: ArrayView2<'_, f32>, device: &B::Device) -> Tensor<B, 2> {
    let s = plane.shape();
    let values: Vec<f32> = plane.t().iter().copied().collect();
    Tensor::from_data(TensorData::new(values, Shape::new([s[1], s[0]])), device)
}
