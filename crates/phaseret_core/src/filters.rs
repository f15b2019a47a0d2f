//! Real-valued image filters used by shrinkwrap and display collaborators.
//!
//! The Gaussian blur is separable and matches `scipy.ndimage.gaussian_filter`
//! with `mode='reflect'` and `truncate=4.0`.

use ndarray::{s, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use rustfft::num_complex::Complex;

use crate::error::{PhasingError, PhasingResult};
use crate::float_trait::PhaseFloat;

/// Minimum lane count for parallel blur passes.
const PARALLEL_LANE_THRESHOLD: usize = 512;

/// Build a normalized 1D Gaussian kernel of radius `ceil(4 * sigma)`.
fn gaussian_kernel_1d<F: PhaseFloat>(sigma: F) -> Vec<F> {
    if sigma <= F::zero() {
        return vec![F::one()];
    }

    let radius = (F::GAUSSIAN_TRUNCATE * sigma)
        .ceil()
        .to_usize()
        .unwrap_or(0);
    let two_sigma2 = F::from_f64_c(2.0) * sigma * sigma;

    let mut kernel: Vec<F> = (0..=2 * radius)
        .map(|i| {
            let x = F::usize_as(i) - F::usize_as(radius);
            (-(x * x) / two_sigma2).exp()
        })
        .collect();

    let inv_sum = F::one() / kernel.iter().copied().sum::<F>();
    for k in kernel.iter_mut() {
        *k *= inv_sum;
    }
    kernel
}

/// Map any index onto `[0, len)` using half-sample symmetric reflection
/// (`d c b a | a b c d | d c b a`). Valid for offsets larger than `len`.
#[inline(always)]
fn reflect_index(idx: isize, len: usize) -> usize {
    let period = 2 * len as isize;
    let m = idx.rem_euclid(period);
    if m < len as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Convolve one lane with `kernel`, reading through a reflected padded copy.
#[inline]
fn convolve_lane<F: PhaseFloat>(lane: &[F], kernel: &[F], padded: &mut Vec<F>, out: &mut [F]) {
    let n = lane.len();
    let radius = kernel.len() / 2;

    padded.clear();
    padded.extend((0..n + 2 * radius).map(|i| lane[reflect_index(i as isize - radius as isize, n)]));

    for (i, o) in out.iter_mut().enumerate() {
        let window = &padded[i..i + kernel.len()];
        *o = window
            .iter()
            .zip(kernel.iter())
            .fold(F::zero(), |acc, (&v, &k)| acc + v * k);
    }
}

/// Blur every lane along `axis` (Axis(1) blurs within rows).
fn blur_axis<F: PhaseFloat>(input: ArrayView2<F>, kernel: &[F], axis: Axis) -> Array2<F> {
    let mut output = Array2::zeros(input.dim());
    if input.is_empty() || kernel.len() == 1 {
        output.assign(&input);
        return output;
    }

    let lanes_in: Vec<_> = input.lanes(axis).into_iter().collect();
    let lanes_out: Vec<_> = output.lanes_mut(axis).into_iter().collect();

    if lanes_in.len() >= PARALLEL_LANE_THRESHOLD {
        lanes_out
            .into_par_iter()
            .zip(lanes_in.into_par_iter())
            .for_each(|(mut out_lane, in_lane)| {
                let lane: Vec<F> = in_lane.iter().copied().collect();
                let mut padded = Vec::with_capacity(lane.len() + kernel.len());
                let mut out = vec![F::zero(); lane.len()];
                convolve_lane(&lane, kernel, &mut padded, &mut out);
                for (dst, src) in out_lane.iter_mut().zip(out.iter()) {
                    *dst = *src;
                }
            });
    } else {
        let mut lane = Vec::new();
        let mut padded = Vec::new();
        let mut out = Vec::new();
        for (mut out_lane, in_lane) in lanes_out.into_iter().zip(lanes_in) {
            lane.clear();
            lane.extend(in_lane.iter().copied());
            out.resize(lane.len(), F::zero());
            convolve_lane(&lane, kernel, &mut padded, &mut out);
            for (dst, src) in out_lane.iter_mut().zip(out.iter()) {
                *dst = *src;
            }
        }
    }
    output
}

/// 2D Gaussian blur with separate sigma per axis.
/// `sigma_y` acts along axis 0, `sigma_x` along axis 1.
pub fn gaussian_blur_2d<F: PhaseFloat>(input: ArrayView2<F>, sigma_y: F, sigma_x: F) -> Array2<F> {
    let kernel_x = gaussian_kernel_1d(sigma_x);
    let kernel_y = gaussian_kernel_1d(sigma_y);
    let blurred_x = blur_axis(input, &kernel_x, Axis(1));
    blur_axis(blurred_x.view(), &kernel_y, Axis(0))
}

/// Isotropic 2D Gaussian blur.
pub fn gaussian_blur<F: PhaseFloat>(input: ArrayView2<F>, sigma: F) -> Array2<F> {
    gaussian_blur_2d(input, sigma, sigma)
}

/// Linearly map `input` onto `[0, 1]` using its own min and max.
///
/// A flat (or empty) input has no range to map and yields all zeros.
pub fn normalize<F: PhaseFloat>(input: ArrayView2<F>) -> Array2<F> {
    match value_range(input) {
        Some((lo, range)) => input.mapv(|v| (v - lo) / range),
        None => Array2::zeros(input.dim()),
    }
}

/// `(min, max - min)` of `input`, or `None` when the range is empty or not
/// finite.
pub fn value_range<F: PhaseFloat>(input: ArrayView2<F>) -> Option<(F, F)> {
    let (lo, hi) = input
        .iter()
        .fold((F::infinity(), F::neg_infinity()), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;
    (range.is_finite() && range > F::zero()).then_some((lo, range))
}

/// Compress the amplitude of a complex field to `ln(|z| + 1)`, keeping its phase.
pub fn log_amplitude<F: PhaseFloat>(input: ArrayView2<Complex<F>>) -> Array2<Complex<F>> {
    input.mapv(|z| Complex::from_polar(z.norm().ln_1p(), z.arg()))
}

/// Zero-pad a square array symmetrically to `new_size x new_size`.
///
/// When the size difference is odd the extra row/column goes to the trailing edge.
pub fn pad_to_size<T: Clone + num_traits::Zero>(
    input: ArrayView2<T>,
    new_size: usize,
) -> PhasingResult<Array2<T>> {
    let (rows, cols) = input.dim();
    if rows != cols || new_size < rows {
        return Err(PhasingError::DimensionMismatch {
            expected: (new_size, new_size),
            actual: (rows, cols),
        });
    }
    let lead = (new_size - rows) / 2;
    let mut output = Array2::zeros((new_size, new_size));
    output
        .slice_mut(s![lead..lead + rows, lead..lead + cols])
        .assign(&input);
    Ok(output)
}
