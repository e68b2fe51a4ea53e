//! Assembly of the on-disk displacement-field volume.
//!
//! The stored vector is `(-dx, -dy, 0)`: the artifact points to where the
//! content came from, so both in-plane components are negated.

use std::path::Path;

use ndarray::{Array3, Array5};
use nifti::NiftiHeader;
use ritk_io::write_displacement_field;
use tracing::info;

use crate::error::{Result, SlicewiseError};
use crate::field::DisplacementField;

/// `(nx, ny, nz, 1, 3)` vectors `(-dx, -dy, 0)`.
pub fn generate_warping_field(dx: &Array3<f64>, dy: &Array3<f64>) -> Result<Array5<f32>> {
    if dx.shape() != dy.shape() {
        return Err(SlicewiseError::ShapeMismatch {
            expected: dx.shape().to_vec(),
            actual: dy.shape().to_vec(),
        });
    }
    let (nx, ny, nz) = dx.dim();
    Ok(Array5::from_shape_fn((nx, ny, nz, 1, 3), |(x, y, z, _, c)| match c {
        0 => -dx[[x, y, z]] as f32,
        1 => -dy[[x, y, z]] as f32,
        _ => 0.0,
    }))
}

/// Grid size recorded in a NIfTI header.
pub fn header_dims(header: &NiftiHeader) -> [usize; 3] {
    [1, 2, 3].map(|k| if (k as u16) <= header.dim[0] { header.dim[k] as usize } else { 1 })
}

/// Write `field` as a displacement-field volume on the grid of `reference`.
pub fn write_warping_field<P: AsRef<Path>>(path: P, field: &DisplacementField, reference: &NiftiHeader) -> Result<()> {
    let path = path.as_ref();
    let grid = header_dims(reference);
    if grid != field.dims() {
        return Err(SlicewiseError::ShapeMismatch {
            expected: grid.to_vec(),
            actual: field.dims().to_vec(),
        });
    }
    let (dx, dy) = field.to_components();
    let warp = generate_warping_field(&dx, &dy)?;
    write_displacement_field(path, &warp, reference)?;
    info!(path = %path.display(), dims = ?grid, slices = field.written_slices().len(), "wrote warping field");
    Ok(())
}
