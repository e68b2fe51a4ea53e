pub mod gaussian;
pub mod downsample;
pub mod pyramid;

pub use gaussian::{BoundaryMode, GaussianFilter};
pub use pyramid::MultiResolutionPyramid;
pub use downsample::DownsampleFilter;
