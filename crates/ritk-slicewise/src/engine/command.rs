//! Registration engine backed by an external command-line program.
//!
//! Every slice is staged to the workspace under its four-digit name, the
//! program runs once per slice with ANTs-style arguments, and its artifacts
//! are read back: an ITK MATLAB transform for the linear families, forward
//! and inverse displacement images for the deformable ones.
//!
//! The program works in ITK's LPS frame. Maps and vectors are converted to
//! the NIfTI frame of the staged volumes on the way back.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use nalgebra::{Matrix2, Vector2};
use ndarray::Axis;
use ritk_core::image::ImageMetadata;
use ritk_core::spatial::{Direction, Point, Spacing};
use ritk_core::transform::AffineMap2;
use ritk_io::{header_from_metadata, read_displacement_field, write_volume};
use tracing::debug;

use super::{SliceRegistrationEngine, SliceRequest, SliceResponse};
use crate::error::{Result, SlicewiseError};
use crate::field::DisplacementPlane;
use crate::naming::staged_slice_name;
use crate::plane::Plane;

/// Program run when no other is configured.
pub const DEFAULT_PROGRAM: &str = "isct_antsRegistration";

#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl Default for CommandEngine {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Arguments placed before the per-slice ones, e.g. a wrapper script.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Per-slice arguments. File names are relative to the workspace.
    pub fn arguments(&self, request: &SliceRequest<'_>) -> Result<Vec<String>> {
        let fixed = request.fixed_file()?;
        let moving = request.moving_file()?;
        let mut args = self.leading_args.clone();
        args.extend([
            "--dimensionality".to_string(),
            "2".to_string(),
            "--transform".to_string(),
            request.transform_spec(),
            "--metric".to_string(),
            request.metric_spec()?,
            "--convergence".to_string(),
            schedule(request.iterations),
            "--shrink-factors".to_string(),
            schedule(request.shrink_factors),
            "--smoothing-sigmas".to_string(),
            format!("{}mm", schedule(request.smoothing_sigmas)),
            "--output".to_string(),
            format!("[{},{}_reg.nii]", request.output_prefix, staged_slice_name("src", request.z)?),
            "--interpolation".to_string(),
            "BSpline[3]".to_string(),
            "--verbose".to_string(),
            "0".to_string(),
        ]);
        if request.mask.is_some() {
            args.extend(["-x".to_string(), request.mask_file()?]);
        }
        if let Some(initializer) = request.initializer {
            args.extend(["-r".to_string(), format!("[{fixed},{moving},{}]", initializer.code())]);
        }
        Ok(args)
    }

    fn stage(&self, request: &SliceRequest<'_>) -> Result<()> {
        write_plane(&request.workspace.join(request.fixed_file()?), &request.fixed)?;
        write_plane(&request.workspace.join(request.moving_file()?), &request.moving)?;
        if let Some(mask) = &request.mask {
            write_plane(&request.workspace.join(request.mask_file()?), mask)?;
        }
        Ok(())
    }

    fn execute(&self, request: &SliceRequest<'_>, args: &[String]) -> Result<()> {
        let program = self.program.display();
        debug!(z = request.z, program = %program, args = ?args, "running registration program");
        let output = match Command::new(&self.program).args(args).current_dir(request.workspace).output() {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SlicewiseError::configuration(format!("registration program {program} not found")));
            }
            Err(e) => return Err(SlicewiseError::engine(request.z, format!("cannot start {program}: {e}"))),
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            return Err(SlicewiseError::engine(
                request.z,
                format!("{program} exited with {}: {last}", output.status),
            ));
        }
        Ok(())
    }

    fn read_response(&self, request: &SliceRequest<'_>) -> Result<SliceResponse> {
        let artifact = |suffix: &str| request.workspace.join(format!("{}{suffix}", request.output_prefix));
        if request.family.is_deformable() {
            return Ok(SliceResponse::DenseWarp {
                forward: read_warp_plane(&artifact("0Warp.nii.gz"), request.fixed.dims(), request.z)?,
                inverse: read_warp_plane(&artifact("0InverseWarp.nii.gz"), request.moving.dims(), request.z)?,
            });
        }
        let path = artifact("0GenericAffine.mat");
        let bytes = fs::read(&path)
            .map_err(|e| SlicewiseError::engine(request.z, format!("cannot read {}: {e}", path.display())))?;
        let map = itk_affine_from_mat(&bytes)
            .ok_or_else(|| SlicewiseError::engine(request.z, format!("{} holds no 2D affine transform", path.display())))?;
        Ok(SliceResponse::Affine(from_lps(&map)))
    }
}

impl SliceRegistrationEngine for CommandEngine {
    fn register(&self, request: &SliceRequest<'_>) -> Result<SliceResponse> {
        let args = self.arguments(request)?;
        self.stage(request)?;
        self.execute(request, &args)?;
        self.read_response(request)
    }

    fn name(&self) -> &str {
        "command"
    }
}

fn schedule<T: ToString>(levels: &[T]) -> String {
    levels.iter().map(ToString::to_string).collect::<Vec<_>>().join("x")
}

/// Write one slice as a single-slice volume with its in-plane geometry.
fn write_plane(path: &Path, plane: &Plane<'_>) -> Result<()> {
    let [nx, ny] = plane.dims();
    let g = &plane.geometry;
    let mut direction = Direction::<3>::identity();
    for i in 0..2 {
        for j in 0..2 {
            direction[(i, j)] = g.direction()[(i, j)];
        }
    }
    let metadata = ImageMetadata::new(
        Point::new([g.origin()[0], g.origin()[1], 0.0]),
        Spacing::new([g.spacing()[0], g.spacing()[1], 1.0]),
        direction,
    );
    let data = plane.data.to_owned().insert_axis(Axis(2));
    write_volume(path, &data, &header_from_metadata(&metadata, [nx, ny, 1]))?;
    Ok(())
}

/// Forward or inverse displacement image of one slice, in the NIfTI frame.
fn read_warp_plane(path: &Path, dims: [usize; 2], z: usize) -> Result<DisplacementPlane> {
    let (_, field) = read_displacement_field(path)
        .map_err(|e| SlicewiseError::engine(z, format!("cannot read warp: {e:#}")))?;
    let shape = field.shape();
    if shape[..3] != [dims[0], dims[1], 1] || shape[3] < 2 {
        return Err(SlicewiseError::engine(
            z,
            format!("warp {} has shape {shape:?}, expected ({}, {}, 1, 2)", path.display(), dims[0], dims[1]),
        ));
    }
    Ok(DisplacementPlane::from_fn(dims[0], dims[1], |x, y| {
        [-(field[[x, y, 0, 0]] as f64), -(field[[x, y, 0, 1]] as f64)]
    }))
}

/// Conjugate an LPS map by the in-plane flip `(x, y) -> (-x, -y)`.
fn from_lps(map: &AffineMap2) -> AffineMap2 {
    let flip = AffineMap2::new(-Matrix2::identity(), Vector2::zeros());
    flip.compose(map).compose(&flip)
}

/// The `A (x - c) + c + t` transform of an ITK MATLAB v4 file, from its
/// six parameters and its `fixed` center.
pub fn itk_affine_from_mat(bytes: &[u8]) -> Option<AffineMap2> {
    let mut parameters = None;
    let mut center = None;
    let mut rest = bytes;
    while rest.len() >= 20 {
        let word = |i: usize| -> Option<usize> {
            let raw = i32::from_le_bytes(<[u8; 4]>::try_from(rest.get(4 * i..4 * i + 4)?).ok()?);
            usize::try_from(raw).ok()
        };
        let (kind, rows, cols, imaginary, name_len) = (word(0)?, word(1)?, word(2)?, word(3)?, word(4)?);
        // Little-endian numeric only: type code 0 (f64) or 10 (f32).
        let width = match kind {
            0 => 8,
            10 => 4,
            _ => return None,
        };
        if imaginary != 0 {
            return None;
        }
        let data_start = 20 + name_len;
        let data_end = data_start.checked_add(rows.checked_mul(cols)?.checked_mul(width)?)?;
        let name = std::str::from_utf8(rest.get(20..data_start)?).ok()?.trim_end_matches('\0');
        let values = rest
            .get(data_start..data_end)?
            .chunks_exact(width)
            .map(|c| match width {
                8 => <[u8; 8]>::try_from(c).ok().map(f64::from_le_bytes),
                _ => <[u8; 4]>::try_from(c).ok().map(f32::from_le_bytes).map(f64::from),
            })
            .collect::<Option<Vec<f64>>>()?;
        if name == "fixed" {
            center = Some(values);
        } else if values.len() == 6 {
            parameters = Some(values);
        }
        rest = &rest[data_end..];
    }
    let p = parameters?;
    let c = center.unwrap_or_else(|| vec![0.0, 0.0]);
    if c.len() != 2 {
        return None;
    }
    let map = AffineMap2::centered(Matrix2::new(p[0], p[1], p[2], p[3]), [c[0], c[1]], [p[4], p[5]]);
    map.is_finite().then_some(map)
}
