//! Non-linear slice matching by scaling binary masks column by column.
//!
//! A global x scale first matches the x extent of the two masks. Each
//! column of the x-scaled source is then matched to the same destination
//! column by its own y scale. The per-pixel y targets are smoothed to hide
//! the seams between columns.

use burn::tensor::{Tensor, TensorData};
use burn_ndarray::NdArray;
use ndarray::{Array2, ArrayView2};
use ritk_core::filter::{BoundaryMode, GaussianFilter};
use ritk_core::interpolation::{Interpolator, LinearInterpolator};
use ritk_core::spatial::Spacing;
use ritk_io::NiftiVolume;
use tracing::{info, warn};

use crate::debug::DebugRenderer;
use crate::error::{Result, SlicewiseError};
use crate::field::{DisplacementPlane, FieldPair};
use crate::plane::{plane_to_tensor, tensor_to_plane, Plane};

type B = NdArray<f32>;

/// Pixels below this value are background.
pub const MASK_THRESHOLD: f32 = 0.5;

/// Linear map between the foreground extents of one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisScale {
    pub scale: f64,
    pub source_center: f64,
    pub destination_center: f64,
}

impl AxisScale {
    /// Map the inclusive source extent onto the inclusive destination extent.
    pub fn between(source: (usize, usize), destination: (usize, usize)) -> Self {
        let span = |(lo, hi): (usize, usize)| (hi - lo + 1) as f64;
        let center = |(lo, hi): (usize, usize)| (lo + hi) as f64 / 2.0;
        Self {
            scale: span(destination) / span(source),
            source_center: center(source),
            destination_center: center(destination),
        }
    }

    /// Source coordinate to destination coordinate.
    pub fn forward(&self, s: f64) -> f64 {
        (s - self.source_center) * self.scale + self.destination_center
    }

    /// Destination coordinate to source coordinate.
    pub fn backward(&self, d: f64) -> f64 {
        (d - self.destination_center) / self.scale + self.source_center
    }
}

/// First and last index whose flag is set.
fn extent(flags: impl Iterator<Item = bool>) -> Option<(usize, usize)> {
    flags
        .enumerate()
        .filter(|(_, f)| *f)
        .fold(None, |acc, (i, _)| match acc {
            None => Some((i, i)),
            Some((lo, _)) => Some((lo, i)),
        })
}

fn x_extent(mask: ArrayView2<'_, f32>) -> Option<(usize, usize)> {
    extent(mask.outer_iter().map(|column| column.iter().any(|&v| v >= MASK_THRESHOLD)))
}

#[derive(Debug, Clone)]
pub struct ColumnwiseOutcome {
    pub fields: FieldPair,
    /// Slices left at identity because one side had no foreground.
    pub skipped: Vec<usize>,
}

pub struct ColumnwiseEstimator<'r> {
    smooth_width: f64,
    renderer: &'r dyn DebugRenderer,
}

impl<'r> ColumnwiseEstimator<'r> {
    /// `smooth_width` is the Gaussian sigma, in pixels, applied to the y
    /// target grids; 0 disables smoothing.
    pub fn new(smooth_width: f64, renderer: &'r dyn DebugRenderer) -> Self {
        Self { smooth_width, renderer }
    }

    pub fn run(&self, source: &NiftiVolume, destination: &NiftiVolume) -> Result<ColumnwiseOutcome> {
        if source.dims() != destination.dims() {
            return Err(SlicewiseError::ShapeMismatch {
                expected: destination.dims().to_vec(),
                actual: source.dims().to_vec(),
            });
        }
        let mut fields = FieldPair::new(destination.dims(), source.dims());
        fields.fill_parallel(|z| self.estimate_slice(&Plane::of(source, z), &Plane::of(destination, z)))?;

        let skipped: Vec<usize> = (0..destination.dims()[2]).filter(|&z| !fields.forward.is_written(z)).collect();
        for &z in &skipped {
            warn!(z, "slice left at identity: no foreground on one side");
        }
        info!(slices = destination.dims()[2], skipped = skipped.len(), "columnwise estimation done");
        Ok(ColumnwiseOutcome { fields, skipped })
    }

    /// Forward and inverse planes of one slice, `None` when a mask is empty.
    pub fn estimate_slice(
        &self,
        source: &Plane<'_>,
        destination: &Plane<'_>,
    ) -> Result<Option<(DisplacementPlane, DisplacementPlane)>> {
        let z = destination.z;
        let [nx, ny] = destination.dims();
        let src = source.data.mapv(|v| if v < MASK_THRESHOLD { 0.0 } else { v });
        let dest = destination.data.mapv(|v| if v < MASK_THRESHOLD { 0.0 } else { v });

        let (Some(src_x), Some(dest_x)) = (x_extent(src.view()), x_extent(dest.view())) else {
            return Ok(None);
        };
        let scale_x = AxisScale::between(src_x, dest_x);
        let scaled = resample_x(&src, &scale_x)?;

        // Row x of an [[x, y]] array is image column x.
        // y targets per destination column: dest y -> src y, and src y -> dest y.
        let mut to_source = Array2::from_shape_fn((nx, ny), |(_, y)| y as f64);
        let mut to_destination = to_source.clone();
        let mut matched = 0;
        for x in 0..nx {
            let s = extent(scaled.row(x).iter().map(|&v| v >= MASK_THRESHOLD));
            let d = extent(dest.row(x).iter().map(|&v| v >= MASK_THRESHOLD));
            if let (Some(s), Some(d)) = (s, d) {
                let scale_y = AxisScale::between(s, d);
                for y in 0..ny {
                    to_source[[x, y]] = scale_y.backward(y as f64);
                    to_destination[[x, y]] = scale_y.forward(y as f64);
                }
                matched += 1;
            }
        }
        self.renderer.columnwise(z, scale_x.scale, matched);

        if self.smooth_width > 0.0 {
            to_source = self.smooth(&to_source)?;
            to_destination = self.smooth(&to_destination)?;
        }

        let forward = DisplacementPlane::from_fn(nx, ny, |x, y| {
            let s = source.physical(scale_x.backward(x as f64), to_source[[x, y]]);
            let p = destination.physical(x as f64, y as f64);
            [s[0] - p[0], s[1] - p[1]]
        });
        let inverse = DisplacementPlane::from_fn(nx, ny, |x, y| {
            let dx = scale_x.forward(x as f64);
            let column = (dx.round().max(0.0) as usize).min(nx - 1);
            let d = destination.physical(dx, to_destination[[column, y]]);
            let p = source.physical(x as f64, y as f64);
            [d[0] - p[0], d[1] - p[1]]
        });
        Ok(Some((forward, inverse)))
    }

    fn smooth(&self, grid: &Array2<f64>) -> Result<Array2<f64>> {
        let device = Default::default();
        let values = grid.mapv(|v| v as f32);
        let tensor = plane_to_tensor::<B>(values.view(), &device);
        let smoothed = GaussianFilter::<B>::new(vec![self.smooth_width])
            .with_truncate(4.0)
            .with_boundary(BoundaryMode::Nearest)
            .with_max_kernel_width(usize::MAX)
            .apply_tensor(tensor, &Spacing::<2>::uniform(1.0));
        tensor_to_plane(smoothed)
            .map(|p| p.mapv(|v| v as f64))
            .ok_or_else(|| SlicewiseError::Numerical("columnwise smoothing readback failed".into()))
    }
}

/// Source mask sampled at `(scale_x.backward(x), y)`, zero outside.
fn resample_x(source: &Array2<f32>, scale_x: &AxisScale) -> Result<Array2<f32>> {
    let device = Default::default();
    let (nx, ny) = source.dim();
    let data = plane_to_tensor::<B>(source.view(), &device);

    let mut indices = Vec::with_capacity(nx * ny * 2);
    for y in 0..ny {
        for x in 0..nx {
            indices.push(scale_x.backward(x as f64) as f32);
            indices.push(y as f32);
        }
    }
    let indices = Tensor::<B, 2>::from_data(TensorData::new(indices, [nx * ny, 2]), &device);
    let values = LinearInterpolator::zero_padded().interpolate(&data, indices);
    tensor_to_plane(values.reshape([ny, nx]))
        .ok_or_else(|| SlicewiseError::Numerical("columnwise resampling readback failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::NullRenderer;
    use ritk_core::image::ImageMetadata;

    fn rect(n: usize, x: (usize, usize), y: (usize, usize)) -> Array2<f32> {
        Array2::from_shape_fn((n, n), |(i, j)| {
            if (x.0..=x.1).contains(&i) && (y.0..=y.1).contains(&j) { 1.0 } else { 0.0 }
        })
    }

    #[test]
    fn test_axis_scale_maps_extents() {
        let scale = AxisScale::between((10, 19), (8, 27));
        assert_eq!(scale.scale, 2.0);
        assert_eq!(scale.forward(14.5), 17.5);
        assert_eq!(scale.backward(scale.forward(3.0)), 3.0);
    }

    #[test]
    fn test_extent() {
        assert_eq!(extent([false, true, false, true, false].into_iter()), Some((1, 3)));
        assert_eq!(extent([false, false].into_iter()), None);
    }

    #[test]
    fn test_resample_x_stretches_mask() {
        let src = rect(20, (5, 9), (0, 19));
        let scale = AxisScale::between((5, 9), (5, 14));
        let scaled = resample_x(&src, &scale).unwrap();
        assert_eq!(x_extent(scaled.view()), Some((5, 14)));
    }

    #[test]
    fn test_empty_mask_leaves_slice_alone() {
        let src = Array2::<f32>::zeros((12, 12));
        let dest = rect(12, (2, 6), (3, 8));
        let geometry = ImageMetadata::default();
        let estimator = ColumnwiseEstimator::new(1.0, &NullRenderer);
        let result = estimator
            .estimate_slice(&Plane::new(0, src.view(), geometry), &Plane::new(0, dest.view(), geometry))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_identical_masks_give_zero_displacement() {
        let mask = rect(16, (4, 10), (3, 12));
        let geometry = ImageMetadata::default();
        let estimator = ColumnwiseEstimator::new(0.0, &NullRenderer);
        let (forward, inverse) = estimator
            .estimate_slice(&Plane::new(0, mask.view(), geometry), &Plane::new(0, mask.view(), geometry))
            .unwrap()
            .unwrap();
        assert!(forward.dx.iter().chain(forward.dy.iter()).all(|v| v.abs() < 1e-9));
        assert!(inverse.dx.iter().chain(inverse.dy.iter()).all(|v| v.abs() < 1e-9));
    }
}
