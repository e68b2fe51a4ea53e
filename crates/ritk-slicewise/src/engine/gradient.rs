//! In-process registration engine built on `ritk-registration`.

use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use ritk_core::image::Image;
use ritk_core::transform::{AffineMap2, AffineTransform, RigidTransform, ToAffineMap, TranslationTransform};
use ritk_registration::metric::{MeanSquaredError, Metric, MutualInformation, NormalizedCrossCorrelation};
use ritk_registration::optimizer::AdamOptimizer;
use ritk_registration::{MultiResolutionRegistration, RegistrationError, RegistrationSchedule};

use super::{SliceRegistrationEngine, SliceRequest, SliceResponse, TransformFamily};
use crate::config::{Initializer, SimilarityMetric};
use crate::error::{Result, SlicewiseError};
use crate::plane::Plane;

/// Gradient-descent engine for the translation, rigid and affine families.
///
/// Transforms are optimized with Adam over the requested pyramid. The
/// gradient step is the learning rate; rotational parameters are scaled by
/// the slice radius so one step moves the slice border by about one step.
#[derive(Debug, Clone)]
pub struct GradientSliceEngine<B: AutodiffBackend> {
    device: B::Device,
}

impl<B: AutodiffBackend> GradientSliceEngine<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: AutodiffBackend> Default for GradientSliceEngine<B> {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl<B: AutodiffBackend> SliceRegistrationEngine for GradientSliceEngine<B> {
    fn register(&self, request: &SliceRequest<'_>) -> Result<SliceResponse> {
        if !self.supports(request.family) {
            return Err(SlicewiseError::engine(
                request.z,
                format!("{} is not available in the gradient engine", request.transform_spec()),
            ));
        }

        let fixed = request.fixed.to_image::<B>(&self.device);
        let moving = request.moving.to_image::<B>(&self.device);
        let schedule = RegistrationSchedule::<2>::from_levels(
            request.iterations,
            request.shrink_factors,
            request.smoothing_sigmas,
            request.gradient_step,
        )
        .map_err(|e| engine_error(request.z, e))?;

        // Masks are read in the fixed tensor's [Y, X] order.
        let mask = request
            .mask
            .map(|m| m.data.t().iter().map(|&v| if v > 0.0 { 1.0 } else { 0.0 }).collect::<Vec<f32>>());

        let map = match request.metric {
            SimilarityMetric::MeanSquares => {
                let metric = MeanSquaredError::new();
                let metric = match mask {
                    Some(mask) => metric.with_mask(mask),
                    None => metric,
                };
                self.optimize(request, &fixed, &moving, &schedule, metric)?
            }
            SimilarityMetric::CrossCorrelation => {
                let metric = NormalizedCrossCorrelation::new();
                let metric = match mask {
                    Some(mask) => metric.with_mask(mask),
                    None => metric,
                };
                self.optimize(request, &fixed, &moving, &schedule, metric)?
            }
            SimilarityMetric::MutualInformation => {
                let bins = request.metric_parameter.max(2);
                let metric = MutualInformation::new(bins, 1.0 / (bins - 1) as f64);
                let metric = match mask {
                    Some(mask) => metric.with_mask(mask),
                    None => metric,
                };
                self.optimize(request, &fixed, &moving, &schedule, metric)?
            }
        };
        Ok(SliceResponse::Affine(map))
    }

    fn supports(&self, family: TransformFamily) -> bool {
        !family.is_deformable()
    }

    fn name(&self) -> &str {
        "gradient"
    }
}

impl<B: AutodiffBackend> GradientSliceEngine<B> {
    fn optimize<M: Metric<B, 2> + Clone>(
        &self,
        request: &SliceRequest<'_>,
        fixed: &Image<B, 2>,
        moving: &Image<B, 2>,
        schedule: &RegistrationSchedule<2>,
        metric: M,
    ) -> Result<AffineMap2> {
        let z = request.z;
        let offset = initial_offset(request);
        let center = geometric_center(&request.fixed);
        let radius = slice_radius(&request.fixed);

        let device = &self.device;
        let translation = || Tensor::<B, 1>::from_floats([offset[0] as f32, offset[1] as f32], device);
        let center = Tensor::<B, 1>::from_floats([center[0] as f32, center[1] as f32], device);

        let map = match request.family {
            TransformFamily::Translation => MultiResolutionRegistration::new(metric)
                .execute(fixed, moving, TranslationTransform::<B, 2>::new(translation()), AdamOptimizer::new, schedule)
                .map_err(|e| engine_error(z, e))?
                .to_affine_map(),
            TransformFamily::Rigid => {
                let transform = RigidTransform::<B>::new(translation(), Tensor::zeros([1], device), center).with_radius(radius);
                MultiResolutionRegistration::new(metric)
                    .execute(fixed, moving, transform, AdamOptimizer::new, schedule)
                    .map_err(|e| engine_error(z, e))?
                    .to_affine_map()
            }
            TransformFamily::Affine => {
                let transform = AffineTransform::<B, 2>::new(Tensor::eye(2, device), translation(), center).with_radius(radius);
                MultiResolutionRegistration::new(metric)
                    .execute(fixed, moving, transform, AdamOptimizer::new, schedule)
                    .map_err(|e| engine_error(z, e))?
                    .to_affine_map()
            }
            TransformFamily::Syn | TransformFamily::BSplineSyn => None,
        };
        map.filter(AffineMap2::is_finite)
            .ok_or_else(|| SlicewiseError::engine(z, "transform parameters are not finite"))
    }
}

fn engine_error(z: usize, err: RegistrationError) -> SlicewiseError {
    SlicewiseError::engine(z, err.to_string())
}

fn geometric_center(plane: &Plane<'_>) -> [f64; 2] {
    let [nx, ny] = plane.dims();
    plane.physical((nx as f64 - 1.0) / 2.0, (ny as f64 - 1.0) / 2.0)
}

/// Half the physical diagonal of the slice, at least one unit.
fn slice_radius(plane: &Plane<'_>) -> f64 {
    let [nx, ny] = plane.dims();
    let spacing = plane.geometry.spacing();
    (0.5 * (nx as f64 * spacing[0]).hypot(ny as f64 * spacing[1])).max(1.0)
}

/// Intensity-weighted centroid in physical space.
fn center_of_mass(plane: &Plane<'_>) -> Option<[f64; 2]> {
    let (mut sx, mut sy, mut total) = (0.0, 0.0, 0.0);
    for ((x, y), &v) in plane.data.indexed_iter() {
        let w = v.max(0.0) as f64;
        sx += w * x as f64;
        sy += w * y as f64;
        total += w;
    }
    (total > 0.0).then(|| plane.physical(sx / total, sy / total))
}

/// Starting translation of the fixed-to-moving map.
fn initial_offset(request: &SliceRequest<'_>) -> [f64; 2] {
    let pair = match request.initializer {
        None => None,
        Some(Initializer::Geometric) => Some((geometric_center(&request.fixed), geometric_center(&request.moving))),
        Some(Initializer::CenterMass) => center_of_mass(&request.fixed).zip(center_of_mass(&request.moving)),
        Some(Initializer::Origin) => Some((request.fixed.physical(0.0, 0.0), request.moving.physical(0.0, 0.0))),
    };
    pair.map_or([0.0, 0.0], |(f, m)| [m[0] - f[0], m[1] - f[1]])
}
