//! Optional per-slice diagnostics.
//!
//! Estimators report intermediate results to a [`DebugRenderer`]. Nothing a
//! renderer does feeds back into the estimation.

use std::fmt;

use tracing::debug;

use crate::angle::{PrincipalAxes, SymmetryEstimate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Source => "src",
            Self::Destination => "dest",
        })
    }
}

/// Sink for diagnostics; every hook defaults to doing nothing.
pub trait DebugRenderer: Send + Sync {
    fn principal_axes(&self, _z: usize, _side: Side, _axes: &PrincipalAxes) {}

    fn symmetry(&self, _z: usize, _side: Side, _estimate: &SymmetryEstimate) {}

    /// Slice angle before and after regularization along z.
    fn slice_angle(&self, _z: usize, _raw: f64, _regularized: f64) {}

    /// Global x scale and the number of columns matched in y.
    fn columnwise(&self, _z: usize, _scale_x: f64, _matched_columns: usize) {}

    fn engine_slice(&self, _z: usize, _summary: &str) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderer;

impl DebugRenderer for NullRenderer {}

/// Emits diagnostics as `debug` level tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRenderer;

impl DebugRenderer for TracingRenderer {
    fn principal_axes(&self, z: usize, side: Side, axes: &PrincipalAxes) {
        debug!(
            z,
            %side,
            cx = axes.center_of_mass[0],
            cy = axes.center_of_mass[1],
            ex = axes.axes[0][0],
            ey = axes.axes[0][1],
            eigenratio = axes.eigenratio(),
            "principal axes"
        );
    }

    fn symmetry(&self, z: usize, side: Side, estimate: &SymmetryEstimate) {
        debug!(
            z,
            %side,
            angle_deg = estimate.angle.to_degrees(),
            confidence = estimate.confidence,
            peak = estimate.peak_offset,
            "symmetry axis"
        );
    }

    fn slice_angle(&self, z: usize, raw: f64, regularized: f64) {
        debug!(z, raw_deg = raw.to_degrees(), regularized_deg = regularized.to_degrees(), "slice angle");
    }

    fn columnwise(&self, z: usize, scale_x: f64, matched_columns: usize) {
        debug!(z, scale_x, matched_columns, "columnwise scaling");
    }

    fn engine_slice(&self, z: usize, summary: &str) {
        debug!(z, summary, "engine slice");
    }
}
