//! Error types for surfbridge-core.
//!
//! Validation failures for dimensions and parameters. Native API failures
//! live in `surfbridge-compute`, which wraps this type.

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Validation errors for surface geometry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Width or height is zero, or violates a layout constraint.
    ///
    /// Biplanar layouts (NV12) need even dimensions because the chroma plane
    /// is sampled at half resolution in both directions.
    #[error("invalid dimensions: {width}x{height} ({reason})")]
    InvalidDimensions {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
        /// Reason why dimensions are invalid
        reason: String,
    },

    /// A scalar parameter is out of range.
    #[error("invalid parameter `{name}` = {value}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Offending value
        value: i64,
        /// Constraint that was violated
        reason: &'static str,
    },
}

impl Error {
    /// Shorthand for [`Error::InvalidDimensions`].
    pub fn dimensions(width: u32, height: u32, reason: impl Into<String>) -> Self {
        Self::InvalidDimensions {
            width,
            height,
            reason: reason.into(),
        }
    }
}
