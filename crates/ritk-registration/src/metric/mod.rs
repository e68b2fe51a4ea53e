//! Similarity metrics used to drive slice registration.

pub mod trait_;
pub mod mse;
pub mod mutual_information;
pub mod ncc;

pub use trait_::Metric;
pub use mse::MeanSquaredError;
pub use mutual_information::MutualInformation;
pub use ncc::NormalizedCrossCorrelation;
