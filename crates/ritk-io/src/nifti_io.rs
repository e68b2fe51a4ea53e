//! NIfTI reading and writing for volumes and displacement fields.
//!
//! Voxel arrays are kept in NIfTI order `(x, y, z)`. Geometry is taken from
//! the sform when present, then the qform, then plain `pixdim` scaling.

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};
use nalgebra::SMatrix;
use ndarray::{Array3, Array4, Array5, Axis, Ix3, Ix4};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use ritk_core::image::{Image, ImageMetadata};
use ritk_core::spatial::{Direction, Point, Spacing, Vector};
use std::path::Path;

/// NIfTI intent code for a displacement vector field.
pub const INTENT_DISPVECT: i16 = 1007;

/// A volume read from disk together with its header and geometry.
#[derive(Debug, Clone)]
pub struct NiftiVolume {
    pub header: NiftiHeader,
    pub metadata: ImageMetadata<3>,
    /// Voxels indexed `[[x, y, z]]`.
    pub data: Array3<f32>,
}

impl NiftiVolume {
    /// `(nx, ny, nz)`
    pub fn dims(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[0], s[1], s[2]]
    }

    /// Convert to a tensor image in `[Z, Y, X]` layout.
    pub fn to_image<B: Backend>(&self, device: &B::Device) -> Image<B, 3> {
        let [nx, ny, nz] = self.dims();
        let values: Vec<f32> = self.data.view().permuted_axes([2, 1, 0]).iter().copied().collect();
        let tensor = Tensor::<B, 3>::from_data(TensorData::new(values, Shape::new([nz, ny, nx])), device);
        Image::from_metadata(tensor, self.metadata)
    }
}

/// Affine rows `[srow_x, srow_y, srow_z]` of the voxel-to-world mapping.
fn header_affine(header: &NiftiHeader) -> [[f64; 4]; 3] {
    let rows: [[f32; 4]; 3] = if header.sform_code > 0 {
        [header.srow_x, header.srow_y, header.srow_z]
    } else if header.qform_code > 0 {
        let b = header.quatern_b;
        let c = header.quatern_c;
        let d = header.quatern_d;
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if header.pixdim[0] == 0.0 { 1.0 } else { header.pixdim[0] };

        let dx = header.pixdim[1];
        let dy = header.pixdim[2];
        let dz = header.pixdim[3] * qfac;
        [
            [
                (a * a + b * b - c * c - d * d) * dx,
                (2.0 * b * c - 2.0 * a * d) * dy,
                (2.0 * b * d + 2.0 * a * c) * dz,
                header.quatern_x,
            ],
            [
                (2.0 * b * c + 2.0 * a * d) * dx,
                (a * a + c * c - b * b - d * d) * dy,
                (2.0 * c * d - 2.0 * a * b) * dz,
                header.quatern_y,
            ],
            [
                (2.0 * b * d - 2.0 * a * c) * dx,
                (2.0 * c * d + 2.0 * a * b) * dy,
                (a * a + d * d - c * c - b * b) * dz,
                header.quatern_z,
            ],
        ]
    } else {
        [
            [header.pixdim[1], 0.0, 0.0, 0.0],
            [0.0, header.pixdim[2], 0.0, 0.0],
            [0.0, 0.0, header.pixdim[3], 0.0],
        ]
    };
    rows.map(|row| row.map(f64::from))
}

/// Decompose the header affine into origin, spacing and direction cosines.
pub fn metadata_from_header(header: &NiftiHeader) -> ImageMetadata<3> {
    let m = header_affine(header);
    let origin = Point::new([m[0][3], m[1][3], m[2][3]]);

    let columns = [0, 1, 2].map(|j| Vector::new([m[0][j], m[1][j], m[2][j]]));
    let spacing = Spacing::new(columns.map(|c| c.norm()));

    let axes = [
        nalgebra::Vector3::x_axis().into_inner(),
        nalgebra::Vector3::y_axis().into_inner(),
        nalgebra::Vector3::z_axis().into_inner(),
    ];
    let mut unit = axes;
    for j in 0..3 {
        let norm = spacing[j];
        if norm > 1e-9 {
            unit[j] = *columns[j].inner() / norm;
        }
    }
    let direction = Direction(SMatrix::<f64, 3, 3>::from_columns(&unit));

    ImageMetadata::new(origin, spacing, direction)
}

/// Build a header whose sform encodes `metadata` for a `dims` volume.
pub fn header_from_metadata(metadata: &ImageMetadata<3>, dims: [usize; 3]) -> NiftiHeader {
    let mut header = NiftiHeader::default();
    header.dim = [3, 1, 1, 1, 1, 1, 1, 1];
    for (k, &n) in dims.iter().enumerate() {
        header.dim[k + 1] = n as u16;
    }

    let spacing = metadata.spacing();
    let direction = metadata.direction();
    let origin = metadata.origin();
    header.pixdim = [1.0; 8];
    let mut rows = [[0.0f32; 4]; 3];
    for (i, row) in rows.iter_mut().enumerate() {
        for j in 0..3 {
            row[j] = (direction[(i, j)] * spacing[j]) as f32;
        }
        row[3] = origin[i] as f32;
    }
    for j in 0..3 {
        header.pixdim[j + 1] = spacing[j] as f32;
    }
    header.srow_x = rows[0];
    header.srow_y = rows[1];
    header.srow_z = rows[2];
    header.sform_code = 1;
    header.qform_code = 0;
    header.xyzt_units = 2; // millimetres
    header
}

/// Read a 3D volume with its header.
///
/// Trailing singleton dimensions are dropped and 2D images gain a
/// singleton z axis.
pub fn read_nifti_volume<P: AsRef<Path>>(path: P) -> Result<NiftiVolume> {
    let path = path.as_ref();
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read NIfTI file {}", path.display()))?;
    let header = obj.header().clone();
    let metadata = metadata_from_header(&header);

    let mut array = obj
        .into_volume()
        .into_ndarray::<f32>()
        .context("Failed to convert volume to ndarray")?;
    while array.ndim() > 3 && array.shape()[array.ndim() - 1] == 1 {
        let last = array.ndim() - 1;
        array = array.index_axis_move(Axis(last), 0);
    }
    if array.ndim() == 2 {
        array = array.insert_axis(Axis(2));
    }
    if array.ndim() != 3 {
        anyhow::bail!("Expected 3D NIfTI file, found {} dimensions", array.ndim());
    }
    let data = array
        .into_dimensionality::<Ix3>()
        .context("Failed to view volume as 3D")?;

    tracing::debug!(path = %path.display(), shape = ?data.shape(), "read NIfTI volume");
    Ok(NiftiVolume { header, metadata, data })
}

/// Read a NIfTI file as a `[Z, Y, X]` tensor image.
pub fn read_nifti<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<Image<B, 3>> {
    Ok(read_nifti_volume(path)?.to_image(device))
}

/// Write `(x, y, z)` voxels using `header` for geometry and metadata.
pub fn write_volume<P: AsRef<Path>>(path: P, data: &Array3<f32>, header: &NiftiHeader) -> Result<()> {
    let path = path.as_ref();
    WriterOptions::new(path)
        .reference_header(header)
        .write_nifti(data)
        .with_context(|| format!("Failed to write NIfTI file {}", path.display()))?;
    tracing::debug!(path = %path.display(), shape = ?data.shape(), "wrote NIfTI volume");
    Ok(())
}

/// Write a tensor image, encoding its geometry in the sform.
pub fn write_nifti<B: Backend, P: AsRef<Path>>(path: P, image: &Image<B, 3>) -> Result<()> {
    let [nz, ny, nx] = image.shape();
    let values = image
        .data()
        .clone()
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Failed to get tensor data: {:?}", e))?;
    let array = Array3::from_shape_fn((nx, ny, nz), |(x, y, z)| values[(z * ny + y) * nx + x]);
    let header = header_from_metadata(image.metadata(), [nx, ny, nz]);
    write_volume(path, &array, &header)
}

/// Write a `(nx, ny, nz, 1, 3)` displacement field on the grid of `reference`.
pub fn write_displacement_field<P: AsRef<Path>>(
    path: P,
    field: &Array5<f32>,
    reference: &NiftiHeader,
) -> Result<()> {
    let path = path.as_ref();
    let shape = field.shape();
    if shape[3] != 1 || shape[4] != 3 {
        anyhow::bail!("Displacement field must have shape (nx, ny, nz, 1, 3), got {:?}", shape);
    }
    let mut header = reference.clone();
    header.intent_code = INTENT_DISPVECT;
    header.pixdim[4] = 1.0;
    header.pixdim[5] = 1.0;

    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(field)
        .with_context(|| format!("Failed to write displacement field {}", path.display()))?;
    tracing::debug!(path = %path.display(), shape = ?shape, "wrote displacement field");
    Ok(())
}

/// Read a displacement field as `(nx, ny, nz, components)`.
///
/// Both the `(nx, ny, nz, 1, c)` layout of vector images and a plain
/// `(nx, ny, nz, c)` array are accepted; a 2D field gains a singleton z axis.
pub fn read_displacement_field<P: AsRef<Path>>(path: P) -> Result<(NiftiHeader, Array4<f32>)> {
    let path = path.as_ref();
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read displacement field {}", path.display()))?;
    let header = obj.header().clone();
    let mut array = obj
        .into_volume()
        .into_ndarray::<f32>()
        .context("Failed to convert displacement field to ndarray")?;
    if array.ndim() == 5 {
        if array.shape()[3] != 1 {
            anyhow::bail!("Displacement field has {} time points, expected 1", array.shape()[3]);
        }
        array = array.index_axis_move(Axis(3), 0);
    }
    if array.ndim() == 3 {
        array = array.insert_axis(Axis(2));
    }
    let field = array
        .into_dimensionality::<Ix4>()
        .with_context(|| format!("Displacement field {} is not (nx, ny, nz, c)", path.display()))?;
    tracing::debug!(path = %path.display(), shape = ?field.shape(), "read displacement field");
    Ok((header, field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use tempfile::tempdir;

    type TestBackend = NdArray<f32>;

    fn ramp(nx: usize, ny: usize, nz: usize) -> Array3<f32> {
        Array3::from_shape_fn((nx, ny, nz), |(x, y, z)| (x + 10 * y + 100 * z) as f32)
    }

    #[test]
    fn test_read_nifti_basic() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.nii");
        let array = ramp(3, 4, 5);
        WriterOptions::new(&file_path).write_nifti(&array)?;

        let device = Default::default();
        let image = read_nifti::<TestBackend, _>(&file_path, &device)?;
        assert_eq!(image.shape(), [5, 4, 3]);

        let values = image.data().clone().into_data().to_vec::<f32>().unwrap();
        // [Z, Y, X] with x fastest
        assert_eq!(values[0], 0.0);
        assert_eq!(values[1], 1.0);
        assert_eq!(values[3], 10.0);
        assert_eq!(values[12], 100.0);
        Ok(())
    }

    #[test]
    fn test_geometry_survives_write_and_read() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("geom.nii.gz");

        let mut direction = Direction::<3>::identity();
        direction[(0, 0)] = -1.0;
        let metadata = ImageMetadata::new(
            Point::new([12.0, -30.0, 4.5]),
            Spacing::new([0.5, 0.75, 5.0]),
            direction,
        );
        let header = header_from_metadata(&metadata, [6, 7, 2]);
        write_volume(&file_path, &ramp(6, 7, 2), &header)?;

        let volume = read_nifti_volume(&file_path)?;
        assert_eq!(volume.dims(), [6, 7, 2]);
        assert_eq!(volume.data[[5, 6, 1]], 5.0 + 60.0 + 100.0);
        for k in 0..3 {
            assert!((volume.metadata.spacing()[k] - metadata.spacing()[k]).abs() < 1e-5);
            assert!((volume.metadata.origin()[k] - metadata.origin()[k]).abs() < 1e-4);
        }
        assert!((volume.metadata.direction()[(0, 0)] + 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_write_nifti_image_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("image.nii");
        let device = Default::default();

        let volume = NiftiVolume {
            header: NiftiHeader::default(),
            metadata: ImageMetadata::default(),
            data: ramp(4, 3, 2),
        };
        write_nifti(&file_path, &volume.to_image::<TestBackend>(&device))?;

        let back = read_nifti_volume(&file_path)?;
        assert_eq!(back.data, volume.data);
        Ok(())
    }

    #[test]
    fn test_displacement_field_header() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("warp.nii.gz");
        let header = header_from_metadata(&ImageMetadata::default(), [4, 3, 2]);
        let field = Array5::<f32>::from_elem((4, 3, 2, 1, 3), 0.25);
        write_displacement_field(&file_path, &field, &header)?;

        let obj = ReaderOptions::new().read_file(&file_path)?;
        assert_eq!(obj.header().intent_code, INTENT_DISPVECT);
        assert_eq!(obj.header().dim[0], 5);
        assert_eq!(&obj.header().dim[1..6], &[4, 3, 2, 1, 3]);

        let bad = Array5::<f32>::zeros((4, 3, 2, 3, 1));
        assert!(write_displacement_field(dir.path().join("bad.nii"), &bad, &header).is_err());
        Ok(())
    }

    #[test]
    fn test_read_displacement_field_drops_time_axis() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("warp.nii.gz");
        let header = header_from_metadata(&ImageMetadata::default(), [4, 3, 2]);
        let field = Array5::from_shape_fn((4, 3, 2, 1, 3), |(x, y, z, _, c)| (x + 10 * y + 100 * z + 1000 * c) as f32);
        write_displacement_field(&file_path, &field, &header)?;

        let (header, back) = read_displacement_field(&file_path)?;
        assert_eq!(header.intent_code, INTENT_DISPVECT);
        assert_eq!(back.shape(), &[4, 3, 2, 3]);
        assert_eq!(back[[3, 2, 1, 2]], 2123.0);
        Ok(())
    }

    #[test]
    fn test_read_planar_displacement_field() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("warp2d.nii.gz");
        let field = ndarray::Array3::from_shape_fn((5, 4, 2), |(x, y, c)| if c == 0 { x as f32 } else { -(y as f32) });
        WriterOptions::new(&file_path).write_nifti(&field)?;

        let (_, back) = read_displacement_field(&file_path)?;
        assert_eq!(back.shape(), &[5, 4, 1, 2]);
        assert_eq!(back[[4, 3, 0, 1]], -3.0);
        Ok(())
    }
}
