//! Synthetic diffraction data.
//!
//! Turns a known object into the amplitude a detector would report, so that
//! reconstructions can be checked against ground truth.

use ndarray::{Array2, ArrayView2};
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use rustfft::num_complex::Complex;

use crate::error::{PhasingError, PhasingResult};
use crate::filters::normalize;
use crate::float_trait::PhaseFloat;
use crate::transforms::centered_fft2;

/// Far-field intensity `|F(object)|^2` of a square complex object.
pub fn diffract<F: PhaseFloat>(object: ArrayView2<Complex<F>>) -> PhasingResult<Array2<F>> {
    if object.is_empty() {
        return Err(PhasingError::EmptyInput);
    }
    Ok(centered_fft2(object)?.mapv(|z| z.norm_sqr()))
}

/// Camera response applied by [`detect`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorModel {
    /// Counts are clipped at `saturation * max`. Default: 1.0 (no clipping)
    pub saturation: f64,
    /// Quantize to `2^bits - 1` levels with shot noise. `None` models an
    /// ideal, noiseless detector. Default: None
    pub bit_depth: Option<u32>,
}

impl Default for DetectorModel {
    fn default() -> Self {
        Self {
            saturation: 1.0,
            bit_depth: None,
        }
    }
}

impl DetectorModel {
    pub fn validate(&self) -> PhasingResult<()> {
        if !(self.saturation > 0.0 && self.saturation <= 1.0) {
            return Err(PhasingError::invalid(
                "saturation",
                self.saturation,
                "0 < saturation <= 1",
            ));
        }
        if let Some(bits) = self.bit_depth {
            if !(1..=31).contains(&bits) {
                return Err(PhasingError::invalid("bit_depth", bits as f64, "1 <= bit_depth <= 31"));
            }
        }
        Ok(())
    }
}

/// Record `intensity` on a detector and return the measured amplitude.
///
/// With a bit depth the intensity is scaled to the full count range, given
/// Poisson shot noise, clipped at saturation and truncated back onto integer
/// levels. Without one only the saturation clip applies.
pub fn detect<F, R>(intensity: ArrayView2<F>, model: &DetectorModel, rng: &mut R) -> PhasingResult<Array2<F>>
where
    F: PhaseFloat,
    R: Rng + ?Sized,
{
    model.validate()?;
    if intensity.is_empty() {
        return Err(PhasingError::EmptyInput);
    }
    let mut counts: Array2<f64> = intensity.mapv(|v| v.as_f64().max(0.0));

    let levels = model.bit_depth.map(|bits| ((1u64 << bits) - 1) as f64);
    if let Some(levels) = levels {
        counts = normalize(counts.view()).mapv(|v| v * levels);
        counts.mapv_inplace(|lambda| match Poisson::new(lambda) {
            Ok(poisson) => poisson.sample(&mut *rng),
            Err(_) => 0.0,
        });
    }

    let cap = model.saturation * counts.iter().cloned().fold(0.0, f64::max);
    counts.mapv_inplace(|v| v.min(cap));

    if let Some(levels) = levels {
        counts = normalize(counts.view()).mapv(|v| (v * levels).trunc());
    }
    log::debug!(
        "detected {}x{} frame (saturation={}, bit_depth={:?})",
        counts.nrows(),
        counts.ncols(),
        model.saturation,
        model.bit_depth
    );
    Ok(counts.mapv(|v| F::from_f64_c(v.sqrt())))
}
