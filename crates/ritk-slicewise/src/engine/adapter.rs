//! Per-slice fan-out to a registration engine and merge along z.

use std::path::Path;

use rayon::prelude::*;
use ritk_core::transform::AffineMap2;
use ritk_io::NiftiVolume;
use tracing::{error, info};

use super::{SliceRegistrationEngine, SliceRequest, SliceResponse, TransformFamily};
use crate::config::{FallbackPolicy, RegistrationParams};
use crate::debug::DebugRenderer;
use crate::error::{Result, SlicewiseError};
use crate::field::{DisplacementPlane, FieldPair};
use crate::naming::warp_prefix;
use crate::plane::Plane;
use crate::rotation::displacement_of;

/// Forward and inverse planes of one slice.
type PlanePair = (DisplacementPlane, DisplacementPlane);

#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub fields: FieldPair,
    /// Slices whose planes came from the fallback policy.
    pub failed: Vec<usize>,
}

pub struct EngineAdapter<'a> {
    engine: &'a dyn SliceRegistrationEngine,
    params: &'a RegistrationParams,
    renderer: &'a dyn DebugRenderer,
}

impl<'a> EngineAdapter<'a> {
    pub fn new(engine: &'a dyn SliceRegistrationEngine, params: &'a RegistrationParams, renderer: &'a dyn DebugRenderer) -> Self {
        Self { engine, params, renderer }
    }

    /// Register every slice of `source` onto `destination`.
    ///
    /// Engine calls run on the current rayon pool. Results are merged in z
    /// order, so the fallback for a failed slice never depends on timing.
    /// Engines that work on disk put their per-slice files in `workspace`.
    pub fn run(
        &self,
        source: &NiftiVolume,
        destination: &NiftiVolume,
        mask: Option<&NiftiVolume>,
        workspace: &Path,
    ) -> Result<EngineOutcome> {
        let family = TransformFamily::from_algorithm(self.params.algorithm)?;
        let nz = destination.dims()[2];
        if source.dims()[2] != nz {
            return Err(SlicewiseError::ShapeMismatch {
                expected: destination.dims().to_vec(),
                actual: source.dims().to_vec(),
            });
        }
        if let Some(mask) = mask {
            if mask.dims() != destination.dims() {
                return Err(SlicewiseError::ShapeMismatch {
                    expected: destination.dims().to_vec(),
                    actual: mask.dims().to_vec(),
                });
            }
        }

        let requests = (0..nz)
            .map(|z| self.request(z, family, source, destination, mask, workspace))
            .collect::<Result<Vec<_>>>()?;
        info!(
            slices = nz,
            engine = self.engine.name(),
            transform = %requests.first().map(SliceRequest::transform_spec).unwrap_or_default(),
            "registering slices"
        );

        let results: Vec<Result<PlanePair>> = requests.par_iter().map(|request| self.register(request)).collect();

        let mut fields = FieldPair::new(destination.dims(), source.dims());
        let mut failed = Vec::new();
        let mut previous: Option<PlanePair> = None;
        for (request, result) in requests.iter().zip(results) {
            let z = request.z;
            let planes = match result {
                Ok(planes) => {
                    previous = Some(planes.clone());
                    planes
                }
                Err(err) if err.is_recoverable() => {
                    error!(z, error = %err, policy = ?self.params.fallback, "slice registration failed");
                    failed.push(z);
                    match (self.params.fallback, &previous) {
                        (FallbackPolicy::AbortVolume, _) => return Err(err),
                        (FallbackPolicy::RepeatPrevious, Some(planes)) => planes.clone(),
                        _ => identity(request),
                    }
                }
                Err(err) => return Err(err),
            };
            fields.forward.write(z, planes.0)?;
            fields.inverse.write(z, planes.1)?;
        }
        Ok(EngineOutcome { fields, failed })
    }

    fn request<'v>(
        &self,
        z: usize,
        family: TransformFamily,
        source: &'v NiftiVolume,
        destination: &'v NiftiVolume,
        mask: Option<&'v NiftiVolume>,
        workspace: &'v Path,
    ) -> Result<SliceRequest<'v>>
    where
        'a: 'v,
    {
        Ok(SliceRequest {
            z,
            family,
            gradient_step: self.params.gradient_step,
            metric: self.params.metric,
            metric_weight: 1.0,
            metric_parameter: self.params.metric_parameter(),
            fixed: Plane::of(destination, z),
            moving: Plane::of(source, z),
            iterations: &self.params.iterations,
            shrink_factors: &self.params.shrink_factors,
            smoothing_sigmas: &self.params.smoothing_sigmas,
            output_prefix: warp_prefix(z)?,
            mask: mask.map(|m| Plane::of(m, z)),
            initializer: self.params.initializer,
            workspace,
        })
    }

    /// One engine call turned into displacement planes.
    fn register(&self, request: &SliceRequest<'_>) -> Result<PlanePair> {
        let response = self.engine.register(request)?;
        let planes = match response {
            SliceResponse::Affine(map) if request.family == TransformFamily::Translation => {
                translation_planes(request, &map)
            }
            SliceResponse::Affine(map) => {
                let inverse = map
                    .inverse()
                    .ok_or_else(|| SlicewiseError::engine(request.z, "affine result is not invertible"))?;
                let forward = displacement_of(&map, &request.fixed);
                let inverse = displacement_of(&inverse, &request.moving);
                if request.family.composes_null_field() {
                    let (null_forward, null_inverse) = self.engine.null_field(request)?;
                    (compose(request.z, forward, &null_forward)?, compose(request.z, inverse, &null_inverse)?)
                } else {
                    (forward, inverse)
                }
            }
            SliceResponse::DenseWarp { forward, inverse } => {
                let expected = (request.fixed.dims(), request.moving.dims());
                if (forward.dims(), inverse.dims()) != expected {
                    return Err(SlicewiseError::engine(request.z, "dense warp does not match the slice grids"));
                }
                (forward, inverse)
            }
        };
        self.renderer.engine_slice(
            request.z,
            &format!("{} forward={:?}", request.transform_spec(), planes.0.at(0, 0)),
        );
        Ok(planes)
    }
}

/// Constant `(tx, ty)` forward and `(-tx, -ty)` inverse.
fn translation_planes(request: &SliceRequest<'_>, map: &AffineMap2) -> PlanePair {
    let t = [map.translation[0], map.translation[1]];
    let [fx, fy] = request.fixed.dims();
    let [mx, my] = request.moving.dims();
    (
        DisplacementPlane::constant(fx, fy, t),
        DisplacementPlane::constant(mx, my, [-t[0], -t[1]]),
    )
}

/// Add a null deformable field pixel by pixel.
fn compose(z: usize, mut linear: DisplacementPlane, null: &DisplacementPlane) -> Result<DisplacementPlane> {
    if linear.dims() != null.dims() {
        return Err(SlicewiseError::engine(z, "null field grid mismatch"));
    }
    linear.dx += &null.dx;
    linear.dy += &null.dy;
    Ok(linear)
}

fn identity(request: &SliceRequest<'_>) -> PlanePair {
    let [fx, fy] = request.fixed.dims();
    let [mx, my] = request.moving.dims();
    (DisplacementPlane::zeros(fx, fy), DisplacementPlane::zeros(mx, my))
}
