//! The support mask: the region where the object is allowed to be nonzero.

use ndarray::{Array2, ArrayView2, Zip};
use rustfft::num_complex::Complex;

use crate::error::{PhasingError, PhasingResult};
use crate::filters::{gaussian_blur, normalize, value_range};
use crate::float_trait::PhaseFloat;
use crate::transforms::roll;

/// Default ratio of field size to initial support size.
pub const DEFAULT_OVERSAMPLING: f64 = 1.75;

/// Boolean mask over the direct-space field.
#[derive(Debug, Clone, PartialEq)]
pub struct Support {
    array: Array2<bool>,
}

/// Reject oversampling ratios that would produce an inverted or undefined box.
pub(crate) fn validate_oversampling(oversampling: f64) -> PhasingResult<()> {
    if !oversampling.is_finite() || oversampling < 1.0 {
        return Err(PhasingError::invalid(
            "oversampling",
            oversampling,
            "finite and >= 1",
        ));
    }
    Ok(())
}

/// Check that `threshold` is usable against a `[0, 1]` normalized amplitude.
pub(crate) fn validate_threshold(threshold: f64) -> PhasingResult<()> {
    if !(0.0..1.0).contains(&threshold) {
        return Err(PhasingError::invalid("threshold", threshold, "0 <= threshold < 1"));
    }
    Ok(())
}

/// Check a blur width.
pub(crate) fn validate_sigma(sigma: f64) -> PhasingResult<()> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(PhasingError::invalid("sigma", sigma, "finite and > 0"));
    }
    Ok(())
}

impl Support {
    /// Centered square box covering `1 / oversampling` of each dimension.
    ///
    /// The box starts `round(size * (1 - 1/oversampling) / 2)` pixels in from
    /// every edge; `oversampling == 1` selects the whole field.
    pub fn new(size: usize, oversampling: f64) -> PhasingResult<Self> {
        validate_oversampling(oversampling)?;
        let corner = (size as f64 * (1.0 - 1.0 / oversampling) / 2.0).round() as usize;
        let inside = corner..size.saturating_sub(corner);
        let array = Array2::from_shape_fn((size, size), |(r, c)| {
            inside.contains(&r) && inside.contains(&c)
        });
        Ok(Self { array })
    }

    /// Wrap an existing mask. Must be square.
    pub fn from_array(array: Array2<bool>) -> PhasingResult<Self> {
        let (rows, cols) = array.dim();
        if rows != cols {
            return Err(PhasingError::DimensionMismatch {
                expected: (rows, rows),
                actual: (rows, cols),
            });
        }
        Ok(Self { array })
    }

    pub fn array(&self) -> ArrayView2<'_, bool> {
        self.array.view()
    }

    pub fn size(&self) -> usize {
        self.array.nrows()
    }

    /// Number of pixels inside the support.
    pub fn count(&self) -> usize {
        self.array.iter().filter(|&&v| v).count()
    }

    /// Replace the mask wholesale; the new mask must have the same shape.
    pub fn replace(&mut self, array: Array2<bool>) -> PhasingResult<()> {
        if array.dim() != self.array.dim() {
            return Err(PhasingError::DimensionMismatch {
                expected: self.array.dim(),
                actual: array.dim(),
            });
        }
        self.array = array;
        Ok(())
    }

    /// Re-estimate the support from the current reconstruction.
    ///
    /// `support = normalize(blur(|image|, sigma)) > threshold`. A flat blurred
    /// amplitude carries no shape information and leaves the mask untouched.
    pub fn shrinkwrap<F: PhaseFloat>(
        &mut self,
        image: ArrayView2<Complex<F>>,
        sigma: F,
        threshold: F,
    ) -> PhasingResult<()> {
        validate_sigma(sigma.as_f64())?;
        validate_threshold(threshold.as_f64())?;
        if image.dim() != self.array.dim() {
            return Err(PhasingError::DimensionMismatch {
                expected: self.array.dim(),
                actual: image.dim(),
            });
        }

        let amplitude = image.mapv(|z| z.norm());
        let blurred = gaussian_blur(amplitude.view(), sigma);
        if value_range(blurred.view()).is_none() {
            log::warn!("shrinkwrap skipped: blurred amplitude is flat");
            return Ok(());
        }

        let normalized = normalize(blurred.view());
        self.array = normalized.mapv(|v| v > threshold);
        log::debug!(
            "shrinkwrap(sigma={}, threshold={}): {} pixels in support",
            sigma,
            threshold,
            self.count()
        );
        Ok(())
    }

    /// Elementwise ternary: `when_true` inside the support, `when_false` outside.
    pub fn select<T: Copy>(&self, when_true: ArrayView2<T>, when_false: ArrayView2<T>) -> Array2<T> {
        let mut output = when_false.to_owned();
        Zip::from(&mut output)
            .and(&self.array)
            .and(&when_true)
            .for_each(|out, &inside, &t| {
                if inside {
                    *out = t;
                }
            });
        output
    }

    /// Zero a complex field outside the support, in place.
    pub fn apply<F: PhaseFloat>(&self, field: &mut Array2<Complex<F>>) {
        Zip::from(field).and(&self.array).for_each(|z, &inside| {
            if !inside {
                *z = Complex::new(F::zero(), F::zero());
            }
        });
    }

    /// Center of mass `(row, col)` of the mask, or `None` when it is empty.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        let (sum_r, sum_c, count) = self
            .array
            .indexed_iter()
            .filter(|&(_, &v)| v)
            .fold((0.0, 0.0, 0usize), |(sr, sc, n), ((r, c), _)| {
                (sr + r as f64, sc + c as f64, n + 1)
            });
        if count == 0 {
            return None;
        }
        Some((sum_r / count as f64, sum_c / count as f64))
    }

    /// Circularly shift the mask.
    pub fn roll(&mut self, shift_rows: isize, shift_cols: isize) {
        self.array = roll(self.array.view(), shift_rows, shift_cols);
    }
}
