//! Spatial transforms: trainable tensor transforms and their closed-form readback.

pub mod trait_;
pub mod map;
pub mod translation;
pub mod rigid;
pub mod affine;

pub use trait_::{ToAffineMap, Transform};
pub use map::AffineMap2;
pub use translation::TranslationTransform;
pub use rigid::RigidTransform;
pub use affine::AffineTransform;
