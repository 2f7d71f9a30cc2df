//! Error types for scheduling and lowering
//!
//! Every failure at this layer is an internal-consistency violation: the
//! graph handed in is assumed to be validated upstream, so an `Err` means the
//! compilation cannot continue. Each variant carries the identity of the
//! offending tensor or operation plus expected-vs-actual data for diagnosis.

use thiserror::Error;

/// Main error type for the inlining and lowering passes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoweringError {
    /// A cross-tensor axis correspondence was required but missing
    #[error(
        "Mapping failure on {tensor} (against {other}): expected {expected} mapped axes, found {actual}: {detail}"
    )]
    MappingFailure {
        tensor: String,
        other: String,
        expected: usize,
        actual: usize,
        detail: String,
    },

    /// The linearizer broke its count-preservation or score-order contract
    #[error("Ordering violation: {detail} (expected {expected}, actual {actual})")]
    OrderingViolation {
        detail: String,
        expected: usize,
        actual: usize,
    },

    /// An allocation, barrier or scope could not be placed consistently
    #[error("Structural violation on {tensor}: {detail}")]
    StructuralViolation { tensor: String, detail: String },
}

impl LoweringError {
    pub fn mapping(
        tensor: impl ToString,
        other: impl ToString,
        expected: usize,
        actual: usize,
        detail: impl Into<String>,
    ) -> Self {
        LoweringError::MappingFailure {
            tensor: tensor.to_string(),
            other: other.to_string(),
            expected,
            actual,
            detail: detail.into(),
        }
    }

    pub fn ordering(detail: impl Into<String>, expected: usize, actual: usize) -> Self {
        LoweringError::OrderingViolation {
            detail: detail.into(),
            expected,
            actual,
        }
    }

    pub fn structural(tensor: impl ToString, detail: impl Into<String>) -> Self {
        LoweringError::StructuralViolation {
            tensor: tensor.to_string(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LoweringError>;
