//! Error types for slice-wise registration.

use thiserror::Error;

/// Errors raised while estimating or assembling slice-wise fields.
///
/// Per-slice kinds carry the slice index. [`SlicewiseError::is_recoverable`]
/// tells the per-z loops which errors exclude a single slice and which abort
/// the volume.
#[derive(Error, Debug)]
pub enum SlicewiseError {
    /// Unknown option, bad value or inconsistent schedule.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The slice has no foreground pixel.
    #[error("Slice {z} has no foreground")]
    EmptySlice { z: usize },

    /// The symmetry detector found no peak inside the capture range.
    #[error("No symmetry axis found in slice {z}")]
    AngleNotFound { z: usize },

    /// The registration engine failed on one slice.
    #[error("Registration engine failed on slice {z}: {message}")]
    ExternalEngine { z: usize, message: String },

    /// A zero-length or non-finite vector reached the angle computation.
    #[error("Degenerate vector: {0}")]
    DegenerateVector(String),

    /// A tensor computation produced no readable result.
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// Reading, writing or staging a file failed.
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A z-plane of a displacement field was written twice in one run.
    #[error("Plane {z} was already written")]
    PlaneAlreadyWritten { z: usize },
}

/// Result type for slice-wise registration.
pub type Result<T> = std::result::Result<T, SlicewiseError>;

impl SlicewiseError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn engine(z: usize, msg: impl Into<String>) -> Self {
        Self::ExternalEngine { z, message: msg.into() }
    }

    /// Whether the error only invalidates the slice it was raised for.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::EmptySlice { .. } | Self::AngleNotFound { .. } | Self::ExternalEngine { .. }
        )
    }

    /// Slice the error refers to, if any.
    pub fn slice_index(&self) -> Option<usize> {
        match self {
            Self::EmptySlice { z }
            | Self::AngleNotFound { z }
            | Self::ExternalEngine { z, .. }
            | Self::PlaneAlreadyWritten { z } => Some(*z),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for SlicewiseError {
    fn from(err: anyhow::Error) -> Self {
        Self::Io(format!("{err:#}"))
    }
}

impl From<std::io::Error> for SlicewiseError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
