//! Per-slice delegation to an iterative registration engine.
//!
//! The engine sees one 2D slice pair per call. [`adapter`] turns its answers
//! into displacement planes and merges them along z.

pub mod adapter;
pub mod command;
pub mod gradient;

pub use adapter::EngineAdapter;
pub use command::CommandEngine;
pub use gradient::GradientSliceEngine;

use std::path::Path;

use ritk_core::transform::AffineMap2;

use crate::config::{Algorithm, Initializer, SimilarityMetric};
use crate::error::{Result, SlicewiseError};
use crate::field::DisplacementPlane;
use crate::naming::staged_slice_file;
use crate::plane::Plane;

/// Transform families that need iterative optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformFamily {
    Translation,
    Rigid,
    Affine,
    Syn,
    BSplineSyn,
}

impl TransformFamily {
    pub fn from_algorithm(algorithm: Algorithm) -> Result<Self> {
        match algorithm {
            Algorithm::Translation => Ok(Self::Translation),
            Algorithm::Rigid => Ok(Self::Rigid),
            Algorithm::Affine => Ok(Self::Affine),
            Algorithm::Syn => Ok(Self::Syn),
            Algorithm::BSplineSyn => Ok(Self::BSplineSyn),
            other => Err(SlicewiseError::configuration(format!(
                "algorithm {other} does not use a registration engine"
            ))),
        }
    }

    pub fn algorithm(self) -> Algorithm {
        match self {
            Self::Translation => Algorithm::Translation,
            Self::Rigid => Algorithm::Rigid,
            Self::Affine => Algorithm::Affine,
            Self::Syn => Algorithm::Syn,
            Self::BSplineSyn => Algorithm::BSplineSyn,
        }
    }

    /// Families whose linear result is composed with a null deformable field.
    pub fn composes_null_field(self) -> bool {
        matches!(self, Self::Rigid | Self::Affine)
    }

    /// Families whose result is a dense warp rather than a linear map.
    pub fn is_deformable(self) -> bool {
        matches!(self, Self::Syn | Self::BSplineSyn)
    }
}

/// Everything the engine needs to register one slice.
///
/// `fixed` is the destination slice and `moving` the source slice. The
/// returned transforms map fixed physical points to moving ones.
#[derive(Debug, Clone)]
pub struct SliceRequest<'a> {
    pub z: usize,
    pub family: TransformFamily,
    pub gradient_step: f64,
    pub metric: SimilarityMetric,
    pub metric_weight: f64,
    /// Histogram bins or neighbourhood radius.
    pub metric_parameter: usize,
    pub fixed: Plane<'a>,
    pub moving: Plane<'a>,
    pub iterations: &'a [usize],
    pub shrink_factors: &'a [usize],
    /// Per-level smoothing, mm.
    pub smoothing_sigmas: &'a [f64],
    pub output_prefix: String,
    pub mask: Option<Plane<'a>>,
    pub initializer: Option<Initializer>,
    /// Directory for per-slice files of engines that work on disk.
    pub workspace: &'a Path,
}

impl SliceRequest<'_> {
    /// Transform argument, e.g. `SyN[0.5,3,0]`.
    pub fn transform_spec(&self) -> String {
        let algorithm = self.family.algorithm();
        let extra = algorithm.transform_parameters();
        let sep = if extra.is_empty() { "" } else { "," };
        format!("{}[{}{sep}{extra}]", algorithm.engine_name(), self.gradient_step)
    }

    /// Metric argument, e.g. `MI[dest_Z0003.nii,src_Z0003.nii,1,32]`.
    pub fn metric_spec(&self) -> Result<String> {
        let name = match self.metric {
            SimilarityMetric::MutualInformation => "MI",
            SimilarityMetric::MeanSquares => "MeanSquares",
            SimilarityMetric::CrossCorrelation => "CC",
        };
        Ok(format!(
            "{name}[{},{},{},{}]",
            self.fixed_file()?,
            self.moving_file()?,
            self.metric_weight,
            self.metric_parameter
        ))
    }

    /// Staged destination slice, relative to the workspace.
    pub fn fixed_file(&self) -> Result<String> {
        staged_slice_file("dest", self.z, "nii")
    }

    /// Staged source slice, relative to the workspace.
    pub fn moving_file(&self) -> Result<String> {
        staged_slice_file("src", self.z, "nii")
    }

    pub fn mask_file(&self) -> Result<String> {
        staged_slice_file("mask", self.z, "nii.gz")
    }
}

/// Result of one engine call.
#[derive(Debug, Clone)]
pub enum SliceResponse {
    /// Linear map from fixed to moving physical coordinates.
    Affine(AffineMap2),
    /// Forward plane on the fixed grid, inverse plane on the moving grid.
    DenseWarp {
        forward: DisplacementPlane,
        inverse: DisplacementPlane,
    },
}

/// A registration engine callable once per slice.
///
/// Calls for distinct slices may run concurrently.
pub trait SliceRegistrationEngine: Send + Sync {
    fn register(&self, request: &SliceRequest<'_>) -> Result<SliceResponse>;

    /// Whether `register` can produce a result for `family` at all.
    fn supports(&self, _family: TransformFamily) -> bool {
        true
    }

    /// Deformable fields after zero iterations, composed with linear results.
    fn null_field(&self, request: &SliceRequest<'_>) -> Result<(DisplacementPlane, DisplacementPlane)> {
        let [fx, fy] = request.fixed.dims();
        let [mx, my] = request.moving.dims();
        Ok((DisplacementPlane::zeros(fx, fy), DisplacementPlane::zeros(mx, my)))
    }

    fn name(&self) -> &str;
}
