//! Solver configuration and live-loop parameters.

use crate::error::{PhasingError, PhasingResult};
use crate::float_trait::PhaseFloat;
use crate::support::{validate_oversampling, validate_sigma, validate_threshold, DEFAULT_OVERSAMPLING};

// =============================================================================
// Constants
// =============================================================================

/// Default HIO feedback coefficient.
const DEFAULT_BETA: f64 = 0.9;

/// Default Gaussian width for shrinkwrap, in pixels.
const DEFAULT_SHRINKWRAP_SIGMA: f64 = 2.0;

/// Default normalized amplitude threshold for shrinkwrap.
const DEFAULT_SHRINKWRAP_THRESHOLD: f64 = 0.1;

/// Default Gaussian width for the cosmetic reconstruction blur.
const DEFAULT_BLUR_SIGMA: f64 = 2.0;

// =============================================================================
// Validation helpers
// =============================================================================

/// HIO feedback must lie strictly inside (0, 1).
pub(crate) fn validate_beta(beta: f64) -> PhasingResult<()> {
    if !(beta > 0.0 && beta < 1.0) {
        return Err(PhasingError::invalid("beta", beta, "0 < beta < 1"));
    }
    Ok(())
}

/// Partial modulus update probability.
pub(crate) fn validate_fraction(fraction: f64) -> PhasingResult<()> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(PhasingError::invalid("fraction", fraction, "0 <= fraction <= 1"));
    }
    Ok(())
}

// =============================================================================
// Types
// =============================================================================

/// Which pixels [`crate::Solver::remove_twin`] zeroes.
///
/// A magnitude-only measurement cannot distinguish the object from its
/// centro-symmetric conjugate. Zeroing part of the field breaks the tie.
#[derive(Debug, Clone, Copy, Default)]
pub enum TwinConvention {
    /// Zero every pixel with `row >= N/2` or `col >= N/2`, keeping the
    /// upper-left quadrant.
    #[default]
    Quadrant,
    /// Zero every pixel with `row >= N/2`.
    LowerHalf,
    /// Zero every pixel with `col >= N/2`.
    RightHalf,
    /// Zero every pixel for which the predicate `(row, col, n)` returns true.
    Custom(fn(usize, usize, usize) -> bool),
}

impl TwinConvention {
    /// Whether pixel `(row, col)` of an `n x n` field is zeroed.
    pub fn zeroes(&self, row: usize, col: usize, n: usize) -> bool {
        let half = n / 2;
        match self {
            Self::Quadrant => row >= half || col >= half,
            Self::LowerHalf => row >= half,
            Self::RightHalf => col >= half,
            Self::Custom(predicate) => predicate(row, col, n),
        }
    }
}

/// Construction-time settings for a [`crate::Solver`].
///
/// All parameters have defaults matching the interactive reconstruction tool.
#[derive(Debug, Clone)]
pub struct SolverConfig<F: PhaseFloat> {
    /// Ratio of field size to the initial support box. Default: 1.75
    pub oversampling: F,
    /// Seed for the solver-owned RNG; `None` draws from OS entropy. Default: None
    pub seed: Option<u64>,
    /// Half-plane convention for twin removal. Default: Quadrant
    pub twin_convention: TwinConvention,
}

impl<F: PhaseFloat> Default for SolverConfig<F> {
    fn default() -> Self {
        Self {
            oversampling: F::from_f64_c(DEFAULT_OVERSAMPLING),
            seed: None,
            twin_convention: TwinConvention::default(),
        }
    }
}

impl<F: PhaseFloat> SolverConfig<F> {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration with a fixed seed, for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    /// Validate the configuration parameters.
    pub fn validate(&self) -> PhasingResult<()> {
        validate_oversampling(self.oversampling.as_f64())
    }
}

/// Parameters for the continuous HIO + shrinkwrap loop.
#[derive(Debug, Clone, Copy)]
pub struct LiveParams<F: PhaseFloat> {
    /// HIO feedback coefficient. Default: 0.9
    pub beta: F,
    /// Shrinkwrap Gaussian width. Default: 2.0
    pub shrinkwrap_sigma: F,
    /// Shrinkwrap threshold on the normalized blurred amplitude. Default: 0.1
    pub shrinkwrap_threshold: F,
    /// Width for [`crate::Solver::gaussian_blur`]. Default: 2.0
    pub blur_sigma: F,
}

impl<F: PhaseFloat> Default for LiveParams<F> {
    fn default() -> Self {
        Self {
            beta: F::from_f64_c(DEFAULT_BETA),
            shrinkwrap_sigma: F::from_f64_c(DEFAULT_SHRINKWRAP_SIGMA),
            shrinkwrap_threshold: F::from_f64_c(DEFAULT_SHRINKWRAP_THRESHOLD),
            blur_sigma: F::from_f64_c(DEFAULT_BLUR_SIGMA),
        }
    }
}

impl<F: PhaseFloat> LiveParams<F> {
    /// Create a new parameter set with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the parameters.
    pub fn validate(&self) -> PhasingResult<()> {
        validate_beta(self.beta.as_f64())?;
        validate_sigma(self.shrinkwrap_sigma.as_f64())?;
        validate_threshold(self.shrinkwrap_threshold.as_f64())?;
        validate_sigma(self.blur_sigma.as_f64())
    }
}
