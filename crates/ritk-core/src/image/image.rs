//! Image type with physical metadata and coordinate transformations.
//!
//! Tensor layout is `[Z, Y, X]` (`[Y, X]` in 2D) while indices and points
//! are ordered `(x, y, z)`.

use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};
use crate::image::metadata::ImageMetadata;
use crate::spatial::{Direction, Point, Spacing};

/// Medical image with physical metadata.
///
/// Combines tensor data with the origin/spacing/direction that map pixel
/// indices to physical coordinates.
///
/// # Examples
/// ```rust
/// use ritk_core::Image;
/// use ritk_core::spatial::{Point3, Spacing3, Direction3};
/// use burn::tensor::Tensor;
/// use burn_ndarray::NdArray;
///
/// type Backend = NdArray<f32>;
///
/// let device = Default::default();
/// let data = Tensor::<Backend, 3>::zeros([4, 10, 10], &device);
/// let image = Image::new(
///     data,
///     Point3::new([0.0, 0.0, 0.0]),
///     Spacing3::new([1.0, 1.0, 5.0]),
///     Direction3::identity(),
/// );
/// assert_eq!(image.shape(), [4, 10, 10]);
/// ```
#[derive(Debug, Clone)]
pub struct Image<B: Backend, const D: usize> {
    data: Tensor<B, D>,
    metadata: ImageMetadata<D>,
}

impl<B: Backend, const D: usize> Image<B, D> {
    /// Create a new image with the given data and metadata.
    pub fn new(
        data: Tensor<B, D>,
        origin: Point<D>,
        spacing: Spacing<D>,
        direction: Direction<D>,
    ) -> Self {
        Self {
            data,
            metadata: ImageMetadata::new(origin, spacing, direction),
        }
    }

    /// Create an image from data and an existing geometry.
    pub fn from_metadata(data: Tensor<B, D>, metadata: ImageMetadata<D>) -> Self {
        Self { data, metadata }
    }

    /// Get the image data tensor.
    pub fn data(&self) -> &Tensor<B, D> {
        &self.data
    }

    /// Consume the image and return its data tensor.
    pub fn into_data(self) -> Tensor<B, D> {
        self.data
    }

    /// Get the origin (physical coordinate of first pixel).
    pub fn origin(&self) -> &Point<D> {
        self.metadata.origin()
    }

    /// Get the spacing (physical distance between pixels).
    pub fn spacing(&self) -> &Spacing<D> {
        self.metadata.spacing()
    }

    /// Get the direction (orientation matrix).
    pub fn direction(&self) -> &Direction<D> {
        self.metadata.direction()
    }

    /// Geometry of this image without its data.
    pub fn metadata(&self) -> &ImageMetadata<D> {
        &self.metadata
    }

    /// Image shape in tensor order.
    pub fn shape(&self) -> [usize; D] {
        self.data.dims()
    }

    /// Convert a continuous physical point to a continuous index.
    ///
    /// `index = (Direction^-1 * (point - origin)) / spacing`
    pub fn transform_physical_point_to_continuous_index(&self, point: &Point<D>) -> Point<D> {
        self.metadata.physical_to_index(point)
    }

    /// Convert a continuous index to a physical point.
    ///
    /// `point = origin + Direction * (index * spacing)`
    pub fn transform_continuous_index_to_physical_point(&self, index: &Point<D>) -> Point<D> {
        self.metadata.index_to_physical(index)
    }

    /// Batch transform physical points `[N, D]` to continuous indices `[N, D]`.
    pub fn world_to_index_tensor(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = points.device();
        let origin = self.origin_tensor(&device);

        // I = (P - O) @ T with T_rc = (D^-1)_cr / S_c
        let inv_dir = self.direction().inverse();
        let spacing = self.spacing();
        let mut t_data = Vec::with_capacity(D * D);
        for r in 0..D {
            for c in 0..D {
                t_data.push((inv_dir[(c, r)] / spacing[c]) as f32);
            }
        }
        let t_tensor = Tensor::<B, 2>::from_data(TensorData::new(t_data, Shape::new([D, D])), &device);

        (points - origin).matmul(t_tensor)
    }

    /// Batch transform continuous indices `[N, D]` to physical points `[N, D]`.
    pub fn index_to_world_tensor(&self, indices: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = indices.device();
        let origin = self.origin_tensor(&device);

        // P = O + I @ M with M_rc = S_r * D_cr
        let direction = self.direction();
        let spacing = self.spacing();
        let mut m_data = Vec::with_capacity(D * D);
        for r in 0..D {
            for c in 0..D {
                m_data.push((spacing[r] * direction[(c, r)]) as f32);
            }
        }
        let m_tensor = Tensor::<B, 2>::from_data(TensorData::new(m_data, Shape::new([D, D])), &device);

        indices.matmul(m_tensor) + origin
    }

    fn origin_tensor(&self, device: &B::Device) -> Tensor<B, 2> {
        let origin = self.origin();
        let origin_vec: Vec<f32> = (0..D).map(|i| origin[i] as f32).collect();
        Tensor::<B, 1>::from_data(TensorData::new(origin_vec, Shape::new([D])), device).reshape([1, D])
    }
}

impl<B: Backend> Image<B, 3> {
    /// Number of axial slices (size of the z axis).
    pub fn depth(&self) -> usize {
        self.shape()[0]
    }

    /// Geometry of axial slice `z`, see [`ImageMetadata::slice`].
    pub fn slice_metadata(&self, z: usize) -> ImageMetadata<2> {
        self.metadata.slice(z)
    }

    /// Extract axial slice `z` as a 2D image, or `None` when out of range.
    pub fn slice_z(&self, z: usize) -> Option<Image<B, 2>> {
        let [nz, ny, nx] = self.shape();
        if z >= nz {
            return None;
        }
        let plane = self.data.clone().slice([z..z + 1, 0..ny, 0..nx]).reshape([ny, nx]);
        Some(Image::from_metadata(plane, self.slice_metadata(z)))
    }
}
