//! Deterministic per-slice names inside the scratch workspace.

use crate::error::{Result, SlicewiseError};

/// Largest slice index that fits the four-digit naming scheme.
pub const MAX_SLICE_INDEX: usize = 9999;

/// Zero-padded four-digit slice number.
pub fn slice_name(z: usize) -> Result<String> {
    if z > MAX_SLICE_INDEX {
        return Err(SlicewiseError::configuration(format!(
            "slice index {z} does not fit four digits"
        )));
    }
    Ok(format!("{z:04}"))
}

/// Name of a staged 2D slice, e.g. `src_Z0003`.
pub fn staged_slice_name(prefix: &str, z: usize) -> Result<String> {
    Ok(format!("{prefix}_Z{}", slice_name(z)?))
}

/// File of a staged 2D slice, e.g. `src_Z0003.nii`.
pub fn staged_slice_file(prefix: &str, z: usize, extension: &str) -> Result<String> {
    Ok(format!("{}.{extension}", staged_slice_name(prefix, z)?))
}

/// Output prefix of the engine artifacts for one slice, e.g. `warp2d_0003`.
pub fn warp_prefix(z: usize) -> Result<String> {
    Ok(format!("warp2d_{}", slice_name(z)?))
}
