//! Error taxonomy for the reconstruction engine.

use std::fmt;

use thiserror::Error;

/// Which representation of the object is currently authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Domain {
    /// `fs_image` holds the current estimate.
    Fourier,
    /// `ds_image` holds the current estimate.
    #[default]
    Direct,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fourier => f.write_str("Fourier"),
            Self::Direct => f.write_str("Direct"),
        }
    }
}

/// Root error type for all reconstruction failures.
///
/// None of these are transient: every computation is deterministic given its
/// inputs and seed, so callers should never retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhasingError {
    /// A numeric argument lies outside its allowed range.
    #[error("invalid parameter `{name}` = {value}: expected {expected}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },

    /// An array does not have the required square shape.
    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// An operation was called while the solver was in the wrong domain.
    #[error("`{operation}` requires the {required} domain, but the solver is in the {actual} domain")]
    OrderingViolation {
        operation: &'static str,
        required: Domain,
        actual: Domain,
    },

    /// Diffraction data with no pixels.
    #[error("diffraction array is empty")]
    EmptyInput,
}

pub type PhasingResult<T> = Result<T, PhasingError>;

impl PhasingError {
    pub(crate) fn invalid(name: &'static str, value: f64, expected: &'static str) -> Self {
        Self::InvalidParameter {
            name,
            value,
            expected,
        }
    }
}
