//! Slice-wise 2D registration producing forward and inverse 3D displacement
//! fields.
//!
//! Each axial slice of a source volume is aligned with the matching slice of
//! a destination volume, by center of mass and rotation ([`rotation`]), by
//! columnwise mask scaling ([`columnwise`]) or by an iterative registration
//! engine per slice ([`engine`]). The per-slice results are merged into two
//! displacement fields and written by [`warp_field`].

pub mod angle;
pub mod columnwise;
pub mod config;
pub mod debug;
pub mod engine;
pub mod error;
pub mod field;
pub mod naming;
pub mod orchestrator;
pub mod plane;
pub mod rotation;
pub mod warp_field;
pub mod workspace;

pub use config::{
    Algorithm, FallbackPolicy, HistogramSmoothing, Initializer, InputType, RegistrationParams, RotationMethod,
    SimilarityMetric,
};
pub use debug::{DebugRenderer, NullRenderer, TracingRenderer};
pub use engine::{CommandEngine, GradientSliceEngine, SliceRegistrationEngine, SliceRequest, SliceResponse, TransformFamily};
pub use error::{Result, SlicewiseError};
pub use field::{DisplacementField, DisplacementPlane, FieldPair};
pub use orchestrator::{Inputs, Outputs, RunReport, SlicewiseRegistration, Stage};
pub use warp_field::{generate_warping_field, write_warping_field};
