//! The iterative phase retrieval engine.
//!
//! A [`Solver`] owns one reconstruction: the measured diffraction amplitude,
//! the current Fourier- and direct-space estimates, the support and a seeded
//! RNG. Every mutating operation checks the current [`Domain`] before touching
//! state, so an out-of-order call fails without side effects.

use ndarray::{Array2, ArrayView2, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex;

use crate::config::{validate_beta, validate_fraction, LiveParams, SolverConfig, TwinConvention};
use crate::constraint::{Recipe, RecipeProgress};
use crate::error::{Domain, PhasingError, PhasingResult};
use crate::filters::{gaussian_blur, normalize, value_range};
use crate::float_trait::PhaseFloat;
use crate::support::{validate_sigma, validate_threshold, Support};
use crate::transforms::{roll, CenteredFft};

/// Owned copy of the solver's observable state.
#[derive(Debug, Clone)]
pub struct SolverSnapshot<F: PhaseFloat> {
    pub fs_image: Array2<Complex<F>>,
    pub ds_image: Array2<Complex<F>>,
    pub support: Array2<bool>,
    pub domain: Domain,
}

/// Real-space size of one reconstructed pixel:
/// `distance * wavelength / (pixel_pitch * size)`.
///
/// Returns `None` unless every input is positive and the result is finite.
pub fn pixel_size<F: PhaseFloat>(pixel_pitch: F, distance: F, wavelength: F, size: usize) -> Option<F> {
    let positive = |v: F| v > F::zero() && v.is_finite();
    if !(positive(pixel_pitch) && positive(distance) && positive(wavelength)) || size == 0 {
        return None;
    }
    let value = distance * wavelength / (pixel_pitch * F::usize_as(size));
    (value.is_finite() && value > F::zero()).then_some(value)
}

/// Check that a diffraction array is square, non-empty, finite and
/// non-negative. Returns its side length.
fn validate_diffraction<F: PhaseFloat>(diffraction: ArrayView2<F>) -> PhasingResult<usize> {
    if diffraction.is_empty() {
        return Err(PhasingError::EmptyInput);
    }
    let (rows, cols) = diffraction.dim();
    if rows != cols {
        return Err(PhasingError::DimensionMismatch {
            expected: (rows, rows),
            actual: (rows, cols),
        });
    }
    if let Some(&bad) = diffraction.iter().find(|&&v| !v.is_finite() || v < F::zero()) {
        return Err(PhasingError::invalid(
            "diffraction",
            bad.as_f64(),
            "finite and >= 0",
        ));
    }
    Ok(rows)
}

/// Iterative phase retrieval state machine.
#[derive(Debug)]
pub struct Solver<F: PhaseFloat> {
    diffraction: Array2<F>,
    fs_image: Array2<Complex<F>>,
    ds_image: Array2<Complex<F>>,
    /// Direct-space estimate as it was before the most recent `forward`.
    ds_prev: Array2<Complex<F>>,
    support: Support,
    domain: Domain,
    config: SolverConfig<F>,
    transform: CenteredFft<F>,
    rng: StdRng,
    pixel_size: Option<F>,
}

impl<F: PhaseFloat> Solver<F> {
    /// Build a solver with the default configuration and an entropy-seeded RNG.
    pub fn new(diffraction: Array2<F>) -> PhasingResult<Self> {
        Self::with_config(diffraction, SolverConfig::default())
    }

    /// Build a solver whose random phases are reproducible from `seed`.
    pub fn with_seed(diffraction: Array2<F>, seed: u64) -> PhasingResult<Self> {
        Self::with_config(diffraction, SolverConfig::seeded(seed))
    }

    pub fn with_config(diffraction: Array2<F>, config: SolverConfig<F>) -> PhasingResult<Self> {
        config.validate()?;
        let size = validate_diffraction(diffraction.view())?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let zeros = Array2::from_elem((size, size), Complex::new(F::zero(), F::zero()));

        let mut solver = Self {
            diffraction,
            fs_image: zeros.clone(),
            ds_image: zeros.clone(),
            ds_prev: zeros,
            support: Support::new(size, config.oversampling.as_f64())?,
            domain: Domain::Direct,
            transform: CenteredFft::new(size),
            config,
            rng,
            pixel_size: None,
        };
        solver.seed_phases()?;
        log::debug!(
            "solver initialized: {}x{}, support {} px",
            size,
            size,
            solver.support.count()
        );
        Ok(solver)
    }

    /// `fs_image = diffraction * exp(2*pi*i*U)` with fresh uniform `U`, then
    /// transform back and return to the direct domain.
    fn seed_phases(&mut self) -> PhasingResult<()> {
        let rng = &mut self.rng;
        let fs_image = self
            .diffraction
            .mapv(|d| Complex::from_polar(d, F::turn(rng.gen::<f64>())));
        let ds_image = self.transform.inverse(fs_image.view())?;

        self.fs_image = fs_image;
        self.ds_prev = ds_image.clone();
        self.ds_image = ds_image;
        self.domain = Domain::Direct;
        Ok(())
    }

    fn require(&self, operation: &'static str, required: Domain) -> PhasingResult<()> {
        if self.domain != required {
            return Err(PhasingError::OrderingViolation {
                operation,
                required,
                actual: self.domain,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn size(&self) -> usize {
        self.diffraction.nrows()
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn diffraction(&self) -> ArrayView2<'_, F> {
        self.diffraction.view()
    }

    pub fn fs_image(&self) -> ArrayView2<'_, Complex<F>> {
        self.fs_image.view()
    }

    pub fn ds_image(&self) -> ArrayView2<'_, Complex<F>> {
        self.ds_image.view()
    }

    pub fn ds_prev(&self) -> ArrayView2<'_, Complex<F>> {
        self.ds_prev.view()
    }

    pub fn support(&self) -> &Support {
        &self.support
    }

    pub fn config(&self) -> &SolverConfig<F> {
        &self.config
    }

    /// Pixel size recorded by the last successful [`Self::set_scale`].
    pub fn pixel_size(&self) -> Option<F> {
        self.pixel_size
    }

    pub fn snapshot(&self) -> SolverSnapshot<F> {
        SolverSnapshot {
            fs_image: self.fs_image.clone(),
            ds_image: self.ds_image.clone(),
            support: self.support.array().to_owned(),
            domain: self.domain,
        }
    }

    // =========================================================================
    // Transforms and projections
    // =========================================================================

    /// Direct -> Fourier. Remembers the current direct estimate for HIO.
    pub fn forward(&mut self) -> PhasingResult<()> {
        self.require("forward", Domain::Direct)?;
        let fs_image = self.transform.forward(self.ds_image.view())?;
        self.ds_prev = self.ds_image.clone();
        self.fs_image = fs_image;
        self.domain = Domain::Fourier;
        Ok(())
    }

    /// Fourier -> Direct.
    pub fn inverse(&mut self) -> PhasingResult<()> {
        self.require("inverse", Domain::Fourier)?;
        self.ds_image = self.transform.inverse(self.fs_image.view())?;
        self.domain = Domain::Direct;
        Ok(())
    }

    /// Replace every Fourier magnitude with the measured one, keeping phases.
    pub fn modulus_constraint(&mut self) -> PhasingResult<()> {
        self.require("modulus_constraint", Domain::Fourier)?;
        Zip::from(&mut self.fs_image)
            .and(&self.diffraction)
            .for_each(|z, &d| *z = Complex::from_polar(d, z.arg()));
        Ok(())
    }

    /// Modulus replacement applied to each pixel independently with
    /// probability `fraction`.
    pub fn partial_modulus_constraint(&mut self, fraction: F) -> PhasingResult<()> {
        validate_fraction(fraction.as_f64())?;
        self.require("partial_modulus_constraint", Domain::Fourier)?;
        let threshold = fraction.as_f64();
        let rng = &mut self.rng;
        Zip::from(&mut self.fs_image)
            .and(&self.diffraction)
            .for_each(|z, &d| {
                if rng.gen::<f64>() < threshold {
                    *z = Complex::from_polar(d, z.arg());
                }
            });
        Ok(())
    }

    /// Zero the direct estimate outside the support.
    pub fn er_constraint(&mut self) -> PhasingResult<()> {
        self.require("er_constraint", Domain::Direct)?;
        self.support.apply(&mut self.ds_image);
        Ok(())
    }

    /// Keep the estimate inside the support; outside it, push away from the
    /// previous input: `ds_prev - beta * ds_image`.
    pub fn hio_constraint(&mut self, beta: F) -> PhasingResult<()> {
        validate_beta(beta.as_f64())?;
        self.require("hio_constraint", Domain::Direct)?;
        let feedback = Zip::from(&self.ds_prev)
            .and(&self.ds_image)
            .map_collect(|&prev, &current| prev - current * beta);
        self.ds_image = self.support.select(self.ds_image.view(), feedback.view());
        Ok(())
    }

    // =========================================================================
    // Iterations
    // =========================================================================

    /// forward, modulus, inverse.
    pub fn fourier_iteration(&mut self) -> PhasingResult<()> {
        self.forward()?;
        self.modulus_constraint()?;
        self.inverse()
    }

    pub fn partial_fourier_iteration(&mut self, fraction: F) -> PhasingResult<()> {
        validate_fraction(fraction.as_f64())?;
        self.forward()?;
        self.partial_modulus_constraint(fraction)?;
        self.inverse()
    }

    /// One Error Reduction iteration.
    pub fn er_iteration(&mut self) -> PhasingResult<()> {
        self.fourier_iteration()?;
        self.er_constraint()?;
        log::trace!("ER iteration, support {} px", self.support.count());
        Ok(())
    }

    /// One Hybrid Input-Output iteration.
    pub fn hio_iteration(&mut self, beta: F) -> PhasingResult<()> {
        validate_beta(beta.as_f64())?;
        self.fourier_iteration()?;
        self.hio_constraint(beta)?;
        log::trace!("HIO iteration (beta={})", beta);
        Ok(())
    }

    pub fn run_recipe(&mut self, recipe: &Recipe) -> PhasingResult<()> {
        recipe.apply(self)
    }

    pub fn run_recipe_with_progress<P>(&mut self, recipe: &Recipe, progress: P) -> PhasingResult<()>
    where
        P: FnMut(RecipeProgress),
    {
        recipe.apply_with_progress(self, progress)
    }

    /// One step of the interactive loop: HIO followed by shrinkwrap.
    ///
    /// Only the fields the step uses are checked; `blur_sigma` belongs to the
    /// display path.
    pub fn live_step(&mut self, params: &LiveParams<F>) -> PhasingResult<()> {
        validate_beta(params.beta.as_f64())?;
        validate_sigma(params.shrinkwrap_sigma.as_f64())?;
        validate_threshold(params.shrinkwrap_threshold.as_f64())?;
        self.hio_iteration(params.beta)?;
        self.shrinkwrap(params.shrinkwrap_sigma, params.shrinkwrap_threshold)
    }

    /// Closing ER pass after a run of HIO, removing residual energy outside
    /// the support.
    pub fn finish_with_er(&mut self) -> PhasingResult<()> {
        self.er_iteration()
    }

    // =========================================================================
    // Direct-space processing
    // =========================================================================

    /// Re-estimate the support from `|ds_image|`.
    pub fn shrinkwrap(&mut self, sigma: F, threshold: F) -> PhasingResult<()> {
        self.require("shrinkwrap", Domain::Direct)?;
        self.support.shrinkwrap(self.ds_image.view(), sigma, threshold)
    }

    /// Smooth the reconstruction for display. Amplitude and phase are blurred
    /// separately and the amplitude is rescaled to [0, 1]. A flat blurred
    /// amplitude cannot be rescaled and leaves the reconstruction untouched.
    pub fn gaussian_blur(&mut self, sigma: F) -> PhasingResult<()> {
        validate_sigma(sigma.as_f64())?;
        self.require("gaussian_blur", Domain::Direct)?;
        let blurred = gaussian_blur(self.ds_image.mapv(|z| z.norm()).view(), sigma);
        if value_range(blurred.view()).is_none() {
            log::warn!("gaussian_blur skipped: blurred amplitude is flat");
            return Ok(());
        }
        let amplitude = normalize(blurred.view());
        let phase = gaussian_blur(self.ds_image.mapv(|z| z.arg()).view(), sigma);
        self.ds_image = Zip::from(&amplitude)
            .and(&phase)
            .map_collect(|&a, &p| Complex::from_polar(a, p));
        Ok(())
    }

    /// Suppress the twin image using the configured convention.
    pub fn remove_twin(&mut self) -> PhasingResult<()> {
        self.remove_twin_with(self.config.twin_convention)
    }

    pub fn remove_twin_with(&mut self, convention: TwinConvention) -> PhasingResult<()> {
        self.require("remove_twin", Domain::Direct)?;
        let n = self.size();
        let zero = Complex::new(F::zero(), F::zero());
        for ((row, col), z) in self.ds_image.indexed_iter_mut() {
            if convention.zeroes(row, col, n) {
                *z = zero;
            }
        }
        Ok(())
    }

    /// Roll the support and the reconstruction together so the support
    /// centroid lands on the field center `(N/2, N/2)`.
    ///
    /// Returns the applied `(row, col)` shift. An empty support is left alone.
    pub fn center(&mut self) -> PhasingResult<(isize, isize)> {
        self.require("center", Domain::Direct)?;
        let Some((row, col)) = self.support.centroid() else {
            log::warn!("center skipped: support is empty");
            return Ok((0, 0));
        };
        let middle = (self.size() / 2) as f64;
        let shift = ((middle - row).round() as isize, (middle - col).round() as isize);

        self.support.roll(shift.0, shift.1);
        self.ds_image = roll(self.ds_image.view(), shift.0, shift.1);
        log::debug!("centered reconstruction by ({}, {})", shift.0, shift.1);
        Ok(shift)
    }

    // =========================================================================
    // Re-initialization
    // =========================================================================

    /// Restore the default support and draw fresh random phases. The
    /// diffraction data is kept.
    pub fn reset(&mut self) -> PhasingResult<()> {
        self.support = Support::new(self.size(), self.config.oversampling.as_f64())?;
        self.seed_phases()?;
        log::debug!("solver reset");
        Ok(())
    }

    /// Swap in a new measurement of the same size, then [`Self::reset`].
    pub fn set_diffraction(&mut self, diffraction: Array2<F>) -> PhasingResult<()> {
        let size = validate_diffraction(diffraction.view())?;
        if size != self.size() {
            return Err(PhasingError::DimensionMismatch {
                expected: self.diffraction.dim(),
                actual: diffraction.dim(),
            });
        }
        self.diffraction = diffraction;
        self.reset()
    }

    /// Replace the support mask.
    pub fn set_support(&mut self, mask: Array2<bool>) -> PhasingResult<()> {
        self.support.replace(mask)
    }

    /// Compute and record the real-space pixel size for this geometry.
    pub fn set_scale(&mut self, pixel_pitch: F, distance: F, wavelength: F) -> Option<F> {
        self.pixel_size = pixel_size(pixel_pitch, distance, wavelength, self.size());
        if self.pixel_size.is_none() {
            log::warn!(
                "set_scale: no valid pixel size for pitch={}, distance={}, wavelength={}",
                pixel_pitch,
                distance,
                wavelength
            );
        }
        self.pixel_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::pad_to_size;
    use crate::simulate::diffract;
    use crate::transforms::to_complex;

    const TOL: f64 = 1e-12;

    fn random_diffraction(size: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((size, size), |_| 0.1 + rng.gen::<f64>() * 10.0)
    }

    fn solver(size: usize, seed: u64) -> Solver<f64> {
        Solver::with_seed(random_diffraction(size, seed), seed).unwrap()
    }

    /// `|| |F(ds)| - d ||`, the Fourier-space residual of a direct estimate.
    fn fourier_error(solver: &Solver<f64>) -> f64 {
        let spectrum = CenteredFft::new(solver.size())
            .forward(solver.ds_image())
            .unwrap();
        Zip::from(&spectrum)
            .and(solver.diffraction())
            .fold(0.0, |acc, z, &d| acc + (z.norm() - d).powi(2))
            .sqrt()
    }

    /// Amplitude of a small asymmetric object padded to `size`.
    fn object_diffraction(size: usize) -> Array2<f64> {
        let object = Array2::from_shape_fn((6, 6), |(r, c)| if r + c < 8 { 1.0 + r as f64 } else { 0.0 });
        let padded = pad_to_size(to_complex(object.view()).view(), size).unwrap();
        diffract(padded.view()).unwrap().mapv(f64::sqrt)
    }

    // ==================== Construction Tests ====================

    #[test]
    fn test_new_initial_state() {
        let solver = solver(16, 1);
        assert_eq!(solver.domain(), Domain::Direct);
        assert_eq!(solver.size(), 16);
        // corner = round(16 * (1 - 1/1.75) / 2) = 3
        assert_eq!(solver.support().count(), 10 * 10);
        for (z, &d) in solver.fs_image().iter().zip(solver.diffraction().iter()) {
            assert!((z.norm() - d).abs() < TOL * d.max(1.0));
        }
    }

    #[test]
    fn test_new_rejects_bad_diffraction() {
        assert!(matches!(
            Solver::<f64>::new(Array2::zeros((0, 0))),
            Err(PhasingError::EmptyInput)
        ));
        assert!(matches!(
            Solver::<f64>::new(Array2::zeros((4, 5))),
            Err(PhasingError::DimensionMismatch { .. })
        ));
        let mut negative = Array2::<f64>::ones((4, 4));
        negative[[1, 2]] = -1.0;
        assert!(matches!(
            Solver::new(negative),
            Err(PhasingError::InvalidParameter { name: "diffraction", .. })
        ));
        let mut nan = Array2::<f64>::ones((4, 4));
        nan[[0, 0]] = f64::NAN;
        assert!(Solver::new(nan).is_err());
    }

    #[test]
    fn test_same_seed_same_reconstruction() {
        let mut a = solver(16, 42);
        let mut b = solver(16, 42);
        for _ in 0..5 {
            a.hio_iteration(0.9).unwrap();
            b.hio_iteration(0.9).unwrap();
        }
        a.shrinkwrap(2.0, 0.1).unwrap();
        b.shrinkwrap(2.0, 0.1).unwrap();
        assert_eq!(a.ds_image(), b.ds_image());
        assert_eq!(a.support(), b.support());
    }

    // ==================== Ordering Tests ====================

    #[test]
    fn test_fourier_operations_rejected_in_direct_domain() {
        let mut solver = solver(8, 2);
        let before = solver.snapshot();

        assert_eq!(
            solver.modulus_constraint(),
            Err(PhasingError::OrderingViolation {
                operation: "modulus_constraint",
                required: Domain::Fourier,
                actual: Domain::Direct,
            })
        );
        assert!(solver.inverse().is_err());
        assert!(solver.partial_modulus_constraint(0.5).is_err());

        assert_eq!(solver.ds_image(), before.ds_image.view());
        assert_eq!(solver.fs_image(), before.fs_image.view());
        assert_eq!(solver.domain(), Domain::Direct);
    }

    #[test]
    fn test_direct_operations_rejected_in_fourier_domain() {
        let mut solver = solver(8, 3);
        solver.forward().unwrap();
        let before = solver.snapshot();

        assert!(matches!(
            solver.forward(),
            Err(PhasingError::OrderingViolation { operation: "forward", .. })
        ));
        assert!(solver.er_constraint().is_err());
        assert!(solver.hio_constraint(0.9).is_err());
        assert!(solver.shrinkwrap(2.0, 0.1).is_err());
        assert!(solver.gaussian_blur(1.0).is_err());
        assert!(solver.remove_twin().is_err());
        assert!(solver.center().is_err());
        assert!(solver.er_iteration().is_err());

        assert_eq!(solver.ds_image(), before.ds_image.view());
        assert_eq!(solver.fs_image(), before.fs_image.view());
        assert_eq!(solver.support().array(), before.support.view());
        assert_eq!(solver.domain(), Domain::Fourier);
    }

    #[test]
    fn test_invalid_parameters_leave_state_unchanged() {
        let mut solver = solver(8, 4);
        let before = solver.snapshot();

        assert!(matches!(
            solver.hio_iteration(1.0),
            Err(PhasingError::InvalidParameter { name: "beta", .. })
        ));
        assert!(solver.hio_constraint(0.0).is_err());
        assert!(solver.partial_fourier_iteration(1.5).is_err());
        assert!(solver.shrinkwrap(0.0, 0.1).is_err());
        assert!(solver.shrinkwrap(2.0, 1.0).is_err());
        assert!(solver.gaussian_blur(-1.0).is_err());

        assert_eq!(solver.domain(), Domain::Direct);
        assert_eq!(solver.ds_image(), before.ds_image.view());
        assert_eq!(solver.support().array(), before.support.view());
    }

    // ==================== Projection Tests ====================

    #[test]
    fn test_modulus_constraint_sets_magnitude_keeps_phase() {
        let mut solver = solver(16, 5);
        solver.hio_iteration(0.9).unwrap();
        solver.forward().unwrap();
        let before = solver.fs_image().to_owned();
        solver.modulus_constraint().unwrap();

        Zip::from(solver.fs_image())
            .and(&before)
            .and(solver.diffraction())
            .for_each(|z, b, &d| {
                assert!((z.norm() - d).abs() < TOL * d.max(1.0));
                if b.norm() > TOL {
                    let phase_error = (z / z.norm() - b / b.norm()).norm();
                    assert!(phase_error < 1e-9);
                }
            });
    }

    #[test]
    fn test_partial_modulus_extremes() {
        let mut none = solver(16, 6);
        none.hio_iteration(0.9).unwrap();
        none.forward().unwrap();
        let before = none.fs_image().to_owned();
        none.partial_modulus_constraint(0.0).unwrap();
        assert_eq!(none.fs_image(), before.view());

        let mut full = solver(16, 6);
        let mut reference = solver(16, 6);
        full.forward().unwrap();
        reference.forward().unwrap();
        full.partial_modulus_constraint(1.0).unwrap();
        reference.modulus_constraint().unwrap();
        assert_eq!(full.fs_image(), reference.fs_image());
    }

    #[test]
    fn test_er_constraint_zeroes_outside_keeps_inside() {
        let mut solver = solver(16, 7);
        solver.fourier_iteration().unwrap();
        let before = solver.ds_image().to_owned();
        solver.er_constraint().unwrap();

        let zero = Complex::new(0.0, 0.0);
        for ((r, c), z) in solver.ds_image().indexed_iter() {
            if solver.support().array()[[r, c]] {
                assert_eq!(*z, before[[r, c]]);
            } else {
                assert_eq!(*z, zero);
            }
        }
    }

    #[test]
    fn test_hio_constraint_feedback() {
        let mut solver = solver(16, 8);
        solver.forward().unwrap();
        let prev = solver.ds_prev.clone();
        solver.modulus_constraint().unwrap();
        solver.inverse().unwrap();
        let current = solver.ds_image().to_owned();
        solver.hio_constraint(0.7).unwrap();

        for ((r, c), z) in solver.ds_image().indexed_iter() {
            if solver.support().array()[[r, c]] {
                assert_eq!(*z, current[[r, c]]);
            } else {
                assert_eq!(*z, prev[[r, c]] - current[[r, c]] * 0.7);
            }
        }
    }

    // ==================== Iteration Tests ====================

    #[test]
    fn test_er_iteration_end_to_end() {
        let mut diffraction = Array2::<f64>::ones((8, 8));
        diffraction[[4, 4]] = 5.0;
        let mut solver = Solver::with_seed(diffraction, 1234).unwrap();
        let mask = solver.support().array().to_owned();

        let energy_inside = |image: ArrayView2<Complex<f64>>| {
            Zip::from(image)
                .and(&mask)
                .fold(0.0, |acc, z, &inside| if inside { acc + z.norm_sqr() } else { acc })
        };
        let before = energy_inside(solver.ds_image());

        solver.er_iteration().unwrap();

        let zero = Complex::new(0.0, 0.0);
        Zip::from(solver.ds_image()).and(&mask).for_each(|z, &inside| {
            if !inside {
                assert_eq!(*z, zero);
            }
        });
        let after = energy_inside(solver.ds_image());
        assert!((after - before).abs() < 1e-9 * before.max(1.0));
        assert_eq!(solver.domain(), Domain::Direct);
    }

    #[test]
    fn test_er_never_increases_fourier_error() {
        let mut solver = Solver::with_seed(object_diffraction(32), 17).unwrap();
        solver.er_iteration().unwrap();
        let first = fourier_error(&solver);
        for _ in 0..20 {
            solver.er_iteration().unwrap();
        }
        let last = fourier_error(&solver);
        assert!(last <= first * (1.0 + 1e-9) + 1e-12, "{} > {}", last, first);
    }

    #[test]
    fn test_live_loop_then_er() {
        let mut solver = Solver::with_seed(object_diffraction(32), 99).unwrap();
        let params = LiveParams::new();
        for _ in 0..30 {
            solver.live_step(&params).unwrap();
        }
        solver.finish_with_er().unwrap();

        assert_eq!(solver.domain(), Domain::Direct);
        let zero = Complex::new(0.0, 0.0);
        Zip::from(solver.ds_image())
            .and(solver.support().array())
            .for_each(|z, &inside| {
                if !inside {
                    assert_eq!(*z, zero);
                }
            });
    }

    #[test]
    fn test_live_step_rejects_invalid_params() {
        let mut solver = solver(8, 10);
        let params = LiveParams {
            beta: 1.2,
            ..LiveParams::new()
        };
        assert!(solver.live_step(&params).is_err());
        assert_eq!(solver.domain(), Domain::Direct);
    }

    #[test]
    fn test_live_step_ignores_display_blur_width() {
        let mut solver = solver(8, 10);
        let params = LiveParams {
            blur_sigma: 0.0,
            ..LiveParams::new()
        };
        solver.live_step(&params).unwrap();
        assert_eq!(solver.domain(), Domain::Direct);
    }

    // ==================== Direct-space Processing Tests ====================

    #[test]
    fn test_gaussian_blur_normalizes_amplitude() {
        let mut solver = solver(16, 11);
        solver.er_iteration().unwrap();
        solver.gaussian_blur(1.5).unwrap();

        let amplitudes: Vec<f64> = solver.ds_image().iter().map(|z| z.norm()).collect();
        let max = amplitudes.iter().cloned().fold(f64::MIN, f64::max);
        let min = amplitudes.iter().cloned().fold(f64::MAX, f64::min);
        assert!((max - 1.0).abs() < 1e-9);
        assert!(min.abs() < 1e-9);
    }

    #[test]
    fn test_gaussian_blur_blurs_phase_independently() {
        let n = 16;
        let mut solver = solver(n, 21);
        let amplitude = Array2::from_shape_fn((n, n), |(r, _)| 1.0 + r as f64);
        let phase = Array2::from_shape_fn((n, n), |(r, c)| -1.2 + 0.1 * c as f64 + 0.05 * r as f64);
        solver.ds_image = Zip::from(&amplitude)
            .and(&phase)
            .map_collect(|&a, &p| Complex::from_polar(a, p));

        solver.gaussian_blur(1.0).unwrap();

        let expected = gaussian_blur(phase.view(), 1.0);
        let mut checked = 0;
        Zip::from(solver.ds_image()).and(&expected).for_each(|z, &p| {
            if z.norm() > 1e-6 {
                assert!((z.arg() - p).abs() < 1e-9, "{} vs {}", z.arg(), p);
                checked += 1;
            }
        });
        assert!(checked > n * n / 2);
    }

    #[test]
    fn test_gaussian_blur_flat_amplitude_keeps_image() {
        let mut solver = solver(8, 22);
        solver.ds_image.fill(Complex::new(0.5, 0.2));
        let before = solver.ds_image().to_owned();

        solver.gaussian_blur(1.0).unwrap();

        assert_eq!(solver.ds_image(), before.view());
        assert_eq!(solver.domain(), Domain::Direct);
    }

    #[test]
    fn test_remove_twin_conventions() {
        let mut solver = solver(8, 12);
        solver.ds_image.fill(Complex::new(1.0, 0.0));
        solver.remove_twin().unwrap();
        let kept = solver.ds_image().iter().filter(|z| z.norm() > 0.0).count();
        assert_eq!(kept, 16);
        assert!(solver.ds_image()[[3, 3]].norm() > 0.0);
        assert_eq!(solver.ds_image()[[4, 0]].norm(), 0.0);

        solver.ds_image.fill(Complex::new(1.0, 0.0));
        solver.remove_twin_with(TwinConvention::LowerHalf).unwrap();
        let kept = solver.ds_image().iter().filter(|z| z.norm() > 0.0).count();
        assert_eq!(kept, 32);
    }

    #[test]
    fn test_center_even_block_offset_by_one() {
        let mut solver = solver(16, 13);
        let mask = Array2::from_shape_fn((16, 16), |(r, c)| (7..11).contains(&r) && (7..11).contains(&c));
        solver.set_support(mask).unwrap();
        let image = Array2::from_shape_fn((16, 16), |(r, c)| Complex::new((r * 16 + c) as f64, 0.0));
        solver.ds_image = image.clone();

        let shift = solver.center().unwrap();
        assert_eq!(shift, (-1, -1));

        let expected = Array2::from_shape_fn((16, 16), |(r, c)| (6..10).contains(&r) && (6..10).contains(&c));
        assert_eq!(solver.support().array(), expected.view());
        for ((r, c), z) in solver.ds_image().indexed_iter() {
            assert_eq!(*z, image[[(r + 1) % 16, (c + 1) % 16]]);
        }
        let (row, col) = solver.support().centroid().unwrap();
        assert!((row - 8.0).abs() <= 0.5 && (col - 8.0).abs() <= 0.5);
    }

    #[test]
    fn test_center_odd_block_lands_exactly() {
        let mut solver = solver(16, 14);
        let mask = Array2::from_shape_fn((16, 16), |(r, c)| (10..13).contains(&r) && (1..4).contains(&c));
        solver.set_support(mask).unwrap();

        assert_eq!(solver.center().unwrap(), (-3, 6));
        assert_eq!(solver.support().centroid(), Some((8.0, 8.0)));
    }

    #[test]
    fn test_center_empty_support_is_noop() {
        let mut solver = solver(8, 15);
        solver.set_support(Array2::from_elem((8, 8), false)).unwrap();
        let before = solver.ds_image().to_owned();
        assert_eq!(solver.center().unwrap(), (0, 0));
        assert_eq!(solver.ds_image(), before.view());
    }

    // ==================== Re-initialization Tests ====================

    #[test]
    fn test_reset_redraws_phases_keeps_data() {
        let mut solver = solver(16, 16);
        let diffraction = solver.diffraction().to_owned();
        let phases = solver.fs_image().mapv(|z| z.arg());
        solver.shrinkwrap(1.0, 0.3).unwrap();
        solver.forward().unwrap();

        solver.reset().unwrap();

        assert_eq!(solver.domain(), Domain::Direct);
        assert_eq!(solver.diffraction(), diffraction.view());
        assert_eq!(solver.support().count(), 10 * 10);

        let fresh = solver.fs_image().mapv(|z| z.arg());
        let changed = Zip::from(&fresh)
            .and(&phases)
            .fold(0usize, |n, a, b| if a != b { n + 1 } else { n });
        assert!(changed > 230, "only {} phases changed", changed);

        let pi = std::f64::consts::PI;
        let mut bins = [0usize; 4];
        for &phase in fresh.iter() {
            let bin = (((phase + pi) / (2.0 * pi)) * 4.0).floor() as usize;
            bins[bin.min(3)] += 1;
        }
        assert!(bins.iter().all(|&count| count > 32), "bins: {:?}", bins);
    }

    #[test]
    fn test_set_diffraction() {
        let mut solver = solver(8, 17);
        assert!(matches!(
            solver.set_diffraction(Array2::ones((16, 16))),
            Err(PhasingError::DimensionMismatch { .. })
        ));
        assert!(solver.set_diffraction(Array2::ones((8, 9))).is_err());
        assert!(matches!(
            solver.set_diffraction(Array2::zeros((0, 0))),
            Err(PhasingError::EmptyInput)
        ));

        solver.set_support(Array2::from_elem((8, 8), true)).unwrap();
        solver.forward().unwrap();
        let spectrum = solver.fs_image().to_owned();

        let replacement = Array2::from_elem((8, 8), 2.0);
        solver.set_diffraction(replacement.clone()).unwrap();

        assert_eq!(solver.diffraction(), replacement.view());
        assert_eq!(solver.domain(), Domain::Direct);
        // corner = round(8 * (1 - 1/1.75) / 2) = 2
        assert_eq!(solver.support().count(), 4 * 4);
        assert_ne!(solver.fs_image(), spectrum.view());
        for z in solver.fs_image().iter() {
            assert!((z.norm() - 2.0).abs() < TOL);
        }
        assert_eq!(solver.ds_prev(), solver.ds_image());
    }

    #[test]
    fn test_set_support_checks_shape() {
        let mut solver = solver(8, 18);
        assert!(solver.set_support(Array2::from_elem((4, 4), true)).is_err());
        solver.set_support(Array2::from_elem((8, 8), true)).unwrap();
        assert_eq!(solver.support().count(), 64);
    }

    #[test]
    fn test_set_scale() {
        let mut solver = solver(64, 19);
        let size = solver.set_scale(13.5e-6, 0.5, 633e-9).unwrap();
        let expected = 0.5 * 633e-9 / (13.5e-6 * 64.0);
        assert!((size - expected).abs() < 1e-18);
        assert_eq!(solver.pixel_size(), Some(size));

        assert_eq!(solver.set_scale(13.5e-6, 0.0, 633e-9), None);
        assert_eq!(solver.pixel_size(), None);
        assert_eq!(solver.set_scale(-13.5e-6, -0.5, 633e-9), None);
        assert_eq!(pixel_size(1.0, 1.0, f64::INFINITY, 8), None);
    }

    #[test]
    fn test_f32_solver_runs() {
        let diffraction = object_diffraction(16).mapv(|v| v as f32);
        let mut solver = Solver::<f32>::with_seed(diffraction, 20).unwrap();
        solver.hio_iteration(0.9).unwrap();
        solver.shrinkwrap(2.0, 0.1).unwrap();
        solver.er_iteration().unwrap();
        assert!(solver.ds_image().iter().all(|z| z.re.is_finite() && z.im.is_finite()));
    }
}
