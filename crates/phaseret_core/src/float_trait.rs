//! Float trait abstraction for f32/f64 support.
//!
//! Every generic routine in this crate (transforms, blur, solver) is written
//! against [`PhaseFloat`] so reconstructions can run in either precision.

use num_traits::{Float, FromPrimitive, NumAssign};
use rustfft::FftNum;
use std::fmt::{Debug, Display};
use std::iter::Sum;

/// Floating point types usable for phase retrieval.
///
/// `FftNum` for the centered transforms, `Float` and `NumAssign` for complex
/// field math, `Display` for parameter logging.
pub trait PhaseFloat:
    Float + FftNum + FromPrimitive + NumAssign + Sum + Debug + Display + Send + Sync + 'static
{
    /// One full turn of phase, in radians.
    const TWO_PI: Self;

    /// Gaussian kernels are truncated at this many standard deviations.
    const GAUSSIAN_TRUNCATE: Self;

    /// Narrow an f64 parameter or random draw to this precision.
    fn from_f64_c(val: f64) -> Self;

    /// Pixel counts and offsets.
    fn usize_as(val: usize) -> Self;

    /// Widen to f64 for validation and error reporting.
    fn as_f64(self) -> f64;

    /// Phase angle for a uniform draw `u` in `[0, 1)`.
    #[inline]
    fn turn(u: f64) -> Self {
        Self::TWO_PI * Self::from_f64_c(u)
    }
}

impl PhaseFloat for f32 {
    const TWO_PI: Self = std::f32::consts::TAU;
    const GAUSSIAN_TRUNCATE: Self = 4.0;

    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    fn usize_as(val: usize) -> Self {
        val as f32
    }

    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl PhaseFloat for f64 {
    const TWO_PI: Self = std::f64::consts::TAU;
    const GAUSSIAN_TRUNCATE: Self = 4.0;

    fn from_f64_c(val: f64) -> Self {
        val
    }

    fn usize_as(val: usize) -> Self {
        val as f64
    }

    fn as_f64(self) -> f64 {
        self
    }
}
