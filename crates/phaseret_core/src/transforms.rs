//! Centered 2D discrete Fourier transforms.
//!
//! The optical axis sits at index `N/2` in both domains. Every transform is
//! therefore `fftshift(FFT(ifftshift(x)))`: shift the center to the origin,
//! transform, shift back. Swapping the two shifts is harmless for even `N`
//! but silently corrupts the phase for odd `N`.

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::error::{PhasingError, PhasingResult};
use crate::float_trait::PhaseFloat;

// =============================================================================
// Constants
// =============================================================================

/// Minimum lane count before row/column passes are split across rayon workers.
const PARALLEL_LANE_THRESHOLD: usize = 256;

// =============================================================================
// Shifts
// =============================================================================

/// Circularly shift a 2D array by `(shift_rows, shift_cols)` with wraparound.
///
/// Element `[r, c]` moves to `[(r + shift_rows) mod rows, (c + shift_cols) mod cols]`,
/// matching `numpy.roll` over both axes.
pub fn roll<T: Clone>(input: ArrayView2<T>, shift_rows: isize, shift_cols: isize) -> Array2<T> {
    let (rows, cols) = input.dim();
    if rows == 0 || cols == 0 {
        return input.to_owned();
    }
    let dr = shift_rows.rem_euclid(rows as isize) as usize;
    let dc = shift_cols.rem_euclid(cols as isize) as usize;

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let src_r = (r + rows - dr) % rows;
        let src_c = (c + cols - dc) % cols;
        input[[src_r, src_c]].clone()
    })
}

/// Move the zero-frequency element from `[0, 0]` to `[rows/2, cols/2]`.
pub fn fftshift<T: Clone>(input: ArrayView2<T>) -> Array2<T> {
    let (rows, cols) = input.dim();
    roll(input, (rows / 2) as isize, (cols / 2) as isize)
}

/// Inverse of [`fftshift`]; differs from it only for odd dimensions.
pub fn ifftshift<T: Clone>(input: ArrayView2<T>) -> Array2<T> {
    let (rows, cols) = input.dim();
    roll(input, -((rows / 2) as isize), -((cols / 2) as isize))
}

// =============================================================================
// Unshifted 2D passes
// =============================================================================

/// In-place 1D transforms along every lane of `axis`.
fn process_lanes<F: PhaseFloat>(data: &mut Array2<Complex<F>>, plan: &Arc<dyn Fft<F>>, axis: Axis) {
    let lane_len = data.len_of(Axis(1 - axis.index()));
    let lane_count = data.len_of(axis);

    if lane_count >= PARALLEL_LANE_THRESHOLD {
        let lanes: Vec<_> = data.axis_iter_mut(axis).collect();
        lanes.into_par_iter().for_each(|mut lane| {
            let mut buffer: Vec<Complex<F>> = lane.iter().copied().collect();
            plan.process(&mut buffer);
            for (dst, src) in lane.iter_mut().zip(buffer.iter()) {
                *dst = *src;
            }
        });
    } else {
        let mut buffer = vec![Complex::new(F::zero(), F::zero()); lane_len];
        for mut lane in data.axis_iter_mut(axis) {
            for (dst, src) in buffer.iter_mut().zip(lane.iter()) {
                *dst = *src;
            }
            plan.process(&mut buffer);
            for (dst, src) in lane.iter_mut().zip(buffer.iter()) {
                *dst = *src;
            }
        }
    }
}

/// Unnormalized 2D transform of a square complex array, rows then columns.
fn transform_2d<F: PhaseFloat>(data: &mut Array2<Complex<F>>, plan: &Arc<dyn Fft<F>>) {
    // Axis(0) iterates rows, so each lane is one row.
    process_lanes(data, plan, Axis(0));
    process_lanes(data, plan, Axis(1));
}

// =============================================================================
// Centered transform with cached plans
// =============================================================================

/// Pre-planned centered forward/inverse FFT for one square size.
///
/// Planning is the expensive part of rustfft, so a solver builds this once
/// and reuses it for every iteration.
pub struct CenteredFft<F: PhaseFloat> {
    size: usize,
    fft: Arc<dyn Fft<F>>,
    ifft: Arc<dyn Fft<F>>,
}

impl<F: PhaseFloat> std::fmt::Debug for CenteredFft<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CenteredFft").field("size", &self.size).finish()
    }
}

impl<F: PhaseFloat> CenteredFft<F> {
    /// Plan transforms for `size x size` fields.
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let ifft = planner.plan_fft_inverse(size);
        Self { size, fft, ifft }
    }

    /// Edge length this plan was built for.
    pub fn size(&self) -> usize {
        self.size
    }

    fn check_shape<T>(&self, field: &ArrayView2<T>) -> PhasingResult<()> {
        let dim = field.dim();
        if dim != (self.size, self.size) {
            return Err(PhasingError::DimensionMismatch {
                expected: (self.size, self.size),
                actual: dim,
            });
        }
        Ok(())
    }

    /// Centered forward DFT. Unnormalized, like `numpy.fft.fftn`.
    pub fn forward(&self, field: ArrayView2<Complex<F>>) -> PhasingResult<Array2<Complex<F>>> {
        self.check_shape(&field)?;
        let mut data = ifftshift(field);
        transform_2d(&mut data, &self.fft);
        Ok(fftshift(data.view()))
    }

    /// Centered inverse DFT, normalized by `1 / N²`.
    pub fn inverse(&self, field: ArrayView2<Complex<F>>) -> PhasingResult<Array2<Complex<F>>> {
        self.check_shape(&field)?;
        let mut data = ifftshift(field);
        transform_2d(&mut data, &self.ifft);
        let norm = F::one() / F::usize_as(self.size * self.size);
        data.mapv_inplace(|z| z * norm);
        Ok(fftshift(data.view()))
    }

    /// Squared magnitude of [`CenteredFft::forward`]; the far-field intensity.
    pub fn forward_intensity(&self, field: ArrayView2<Complex<F>>) -> PhasingResult<Array2<F>> {
        Ok(self.forward(field)?.mapv(|z| z.norm_sqr()))
    }

    /// Squared magnitude of [`CenteredFft::inverse`].
    pub fn inverse_intensity(&self, field: ArrayView2<Complex<F>>) -> PhasingResult<Array2<F>> {
        Ok(self.inverse(field)?.mapv(|z| z.norm_sqr()))
    }
}

/// One-shot centered forward transform. Plans internally; prefer
/// [`CenteredFft`] inside loops.
pub fn centered_fft2<F: PhaseFloat>(field: ArrayView2<Complex<F>>) -> PhasingResult<Array2<Complex<F>>> {
    let (rows, cols) = field.dim();
    if field.is_empty() {
        return Err(PhasingError::EmptyInput);
    }
    if rows != cols {
        return Err(PhasingError::DimensionMismatch {
            expected: (rows, rows),
            actual: (rows, cols),
        });
    }
    CenteredFft::new(rows).forward(field)
}

/// One-shot centered inverse transform.
pub fn centered_ifft2<F: PhaseFloat>(field: ArrayView2<Complex<F>>) -> PhasingResult<Array2<Complex<F>>> {
    let (rows, cols) = field.dim();
    if field.is_empty() {
        return Err(PhasingError::EmptyInput);
    }
    if rows != cols {
        return Err(PhasingError::DimensionMismatch {
            expected: (rows, rows),
            actual: (rows, cols),
        });
    }
    CenteredFft::new(rows).inverse(field)
}

/// Lift a real array into the complex plane.
pub fn to_complex<F: PhaseFloat>(input: ArrayView2<F>) -> Array2<Complex<F>> {
    input.mapv(|v| Complex::new(v, F::zero()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    fn random_field(size: usize, seed: u64) -> Array2<Complex<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((size, size), |_| {
            Complex::new(rng.gen::<f64>() * 2.0 - 1.0, rng.gen::<f64>() * 2.0 - 1.0)
        })
    }

    fn max_relative_error(a: &Array2<Complex<f64>>, b: &Array2<Complex<f64>>) -> f64 {
        let scale = a.iter().map(|z| z.norm()).fold(0.0f64, f64::max).max(1e-300);
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).norm() / scale)
            .fold(0.0f64, f64::max)
    }

    // ==================== Shift Tests ====================

    #[test]
    fn test_roll_wraps_around() {
        let input = Array2::from_shape_fn((3, 4), |(r, c)| r * 10 + c);
        let rolled = roll(input.view(), 1, -1);
        assert_eq!(rolled[[1, 0]], input[[0, 1]]);
        assert_eq!(rolled[[0, 3]], input[[2, 0]]);
        assert_eq!(rolled[[2, 2]], input[[1, 3]]);
    }

    #[test]
    fn test_roll_by_full_period_is_identity() {
        let input = Array2::from_shape_fn((5, 5), |(r, c)| (r * 5 + c) as i32);
        assert_eq!(roll(input.view(), 5, -10), input);
    }

    #[test]
    fn test_shifts_are_inverse_for_odd_and_even() {
        for size in [4usize, 5, 8, 9] {
            let input = Array2::from_shape_fn((size, size), |(r, c)| r * size + c);
            let there = fftshift(input.view());
            let back = ifftshift(there.view());
            assert_eq!(back, input, "shift roundtrip failed for N={}", size);
        }
    }

    #[test]
    fn test_fftshift_moves_origin_to_center() {
        for size in [4usize, 7] {
            let mut input = Array2::<u8>::zeros((size, size));
            input[[0, 0]] = 1;
            let shifted = fftshift(input.view());
            assert_eq!(shifted[[size / 2, size / 2]], 1);
        }
    }

    // ==================== Round-Trip Tests ====================

    #[test]
    fn test_roundtrip_various_sizes() {
        for size in [1usize, 2, 7, 8, 16, 33, 64] {
            let input = random_field(size, (size * 7919) as u64);
            let plan = CenteredFft::<f64>::new(size);

            let freq = plan.forward(input.view()).unwrap();
            let output = plan.inverse(freq.view()).unwrap();

            let err = max_relative_error(&input, &output);
            assert!(err < 1e-9, "roundtrip failed for N={}: rel err {}", size, err);
        }
    }

    #[test]
    fn test_roundtrip_parallel_path() {
        let size = PARALLEL_LANE_THRESHOLD;
        let input = random_field(size, 4242);
        let plan = CenteredFft::<f64>::new(size);

        let output = plan.inverse(plan.forward(input.view()).unwrap().view()).unwrap();
        assert!(max_relative_error(&input, &output) < 1e-9);
    }

    #[test]
    fn test_roundtrip_f32() {
        let input64 = random_field(16, 99);
        let input = input64.mapv(|z| Complex::new(z.re as f32, z.im as f32));
        let plan = CenteredFft::<f32>::new(16);

        let output = plan.inverse(plan.forward(input.view()).unwrap().view()).unwrap();
        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).norm() < 1e-5);
        }
    }

    // ==================== Known-Value Tests ====================

    #[test]
    fn test_constant_field_concentrates_at_center() {
        for size in [8usize, 9] {
            let input = Array2::from_elem((size, size), Complex::new(1.0f64, 0.0));
            let freq = centered_fft2(input.view()).unwrap();
            let ctr = size / 2;

            let dc = freq[[ctr, ctr]];
            let n2 = (size * size) as f64;
            assert!((dc.re - n2).abs() < 1e-9 && dc.im.abs() < 1e-9, "DC = {:?}", dc);

            for ((r, c), z) in freq.indexed_iter() {
                if (r, c) != (ctr, ctr) {
                    assert!(z.norm() < 1e-9, "non-DC [{},{}] = {}", r, c, z.norm());
                }
            }
        }
    }

    #[test]
    fn test_centered_impulse_has_flat_real_spectrum() {
        // A delta on the optical axis transforms to a constant with zero phase.
        let size = 8;
        let mut input = Array2::from_elem((size, size), Complex::new(0.0f64, 0.0));
        input[[size / 2, size / 2]] = Complex::new(1.0, 0.0);

        let freq = centered_fft2(input.view()).unwrap();
        for z in freq.iter() {
            assert!((z.re - 1.0).abs() < 1e-12 && z.im.abs() < 1e-12);
        }
    }

    #[test]
    fn test_parseval() {
        let size = 16;
        let input = random_field(size, 42);
        let plan = CenteredFft::<f64>::new(size);

        let energy_direct: f64 = input.iter().map(|z| z.norm_sqr()).sum();
        let energy_freq: f64 = plan.forward_intensity(input.view()).unwrap().sum();
        let expected = energy_direct * (size * size) as f64;

        assert!((energy_freq - expected).abs() / expected < 1e-10);
    }

    #[test]
    fn test_inverse_intensity_matches_inverse() {
        let input = random_field(8, 7);
        let plan = CenteredFft::<f64>::new(8);
        let full = plan.inverse(input.view()).unwrap();
        let intensity = plan.inverse_intensity(input.view()).unwrap();
        for (z, i) in full.iter().zip(intensity.iter()) {
            assert!((z.norm_sqr() - i).abs() < 1e-15);
        }
    }

    // ==================== Error Tests ====================

    #[test]
    fn test_shape_mismatch_rejected() {
        let plan = CenteredFft::<f64>::new(8);
        let input = random_field(4, 1);
        assert_eq!(
            plan.forward(input.view()),
            Err(PhasingError::DimensionMismatch {
                expected: (8, 8),
                actual: (4, 4)
            })
        );
    }

    #[test]
    fn test_non_square_rejected() {
        let input = Array2::from_elem((4, 6), Complex::new(0.0f64, 0.0));
        assert!(matches!(
            centered_ifft2(input.view()),
            Err(PhasingError::DimensionMismatch { .. })
        ));
    }
}
