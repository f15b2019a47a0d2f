//! PyO3 Python bindings for phase retrieval.
//!
//! This crate provides thin Python bindings for the phaseret_core library.
//! All algorithm logic is in phaseret_core; this crate only handles
//! Python/NumPy type conversions and error mapping.

use numpy::{Complex64, PyArray2, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use rand::prelude::*;

use phaseret_core::{
    centered_fft2, centered_ifft2, detect, diffract, repeat, sequence, DetectorModel, LiveParams,
    PhasingError, Recipe, Solver, SolverConfig,
};

/// Out-of-order calls are a usage error at runtime; everything else is a bad argument.
fn phasing_err_to_py(err: PhasingError) -> PyErr {
    match err {
        PhasingError::OrderingViolation { .. } => PyRuntimeError::new_err(err.to_string()),
        PhasingError::InvalidParameter { .. }
        | PhasingError::DimensionMismatch { .. }
        | PhasingError::EmptyInput => PyValueError::new_err(err.to_string()),
    }
}

// =============================================================================
// Recipe
// =============================================================================

/// Composable reconstruction recipe.
///
/// `a + b` runs `a` then `b`; `n * a` runs `a` n times.
#[pyclass(module = "phaseret_rust", name = "Recipe")]
#[derive(Clone, Debug)]
struct PyRecipe {
    inner: Recipe,
}

#[pymethods]
impl PyRecipe {
    #[staticmethod]
    fn fourier() -> Self {
        Self {
            inner: Recipe::fourier(),
        }
    }

    #[staticmethod]
    fn partial_fourier(fraction: f64) -> PyResult<Self> {
        let inner = Recipe::partial_fourier(fraction).map_err(phasing_err_to_py)?;
        Ok(Self { inner })
    }

    #[staticmethod]
    #[pyo3(signature = (beta=0.9))]
    fn hio(beta: f64) -> PyResult<Self> {
        let inner = Recipe::hio(beta).map_err(phasing_err_to_py)?;
        Ok(Self { inner })
    }

    #[staticmethod]
    fn er() -> Self {
        Self { inner: Recipe::er() }
    }

    fn __add__(&self, other: PyRef<'_, Self>) -> Self {
        Self {
            inner: sequence(self.inner.clone(), other.inner.clone()),
        }
    }

    fn __mul__(&self, count: usize) -> PyResult<Self> {
        let inner = repeat(self.inner.clone(), count).map_err(phasing_err_to_py)?;
        Ok(Self { inner })
    }

    fn __rmul__(&self, count: usize) -> PyResult<Self> {
        self.__mul__(count)
    }

    #[getter]
    fn total_reps(&self) -> usize {
        self.inner.total_reps()
    }

    #[getter]
    fn name(&self) -> String {
        self.inner.to_string()
    }

    fn __str__(&self) -> String {
        self.inner.to_string()
    }

    fn __repr__(&self) -> String {
        format!("Recipe({})", self.inner)
    }
}

// =============================================================================
// Solver
// =============================================================================

/// Iterative phase retrieval solver over a square diffraction amplitude.
#[pyclass(module = "phaseret_rust", name = "Solver")]
struct PySolver {
    inner: Solver<f64>,
}

#[pymethods]
impl PySolver {
    #[new]
    #[pyo3(signature = (diffraction, oversampling=1.75, seed=None))]
    fn new(diffraction: PyReadonlyArray2<f64>, oversampling: f64, seed: Option<u64>) -> PyResult<Self> {
        let config = SolverConfig {
            oversampling,
            seed,
            ..SolverConfig::default()
        };
        let inner =
            Solver::with_config(diffraction.as_array().to_owned(), config).map_err(phasing_err_to_py)?;
        Ok(Self { inner })
    }

    fn forward(&mut self) -> PyResult<()> {
        self.inner.forward().map_err(phasing_err_to_py)
    }

    fn inverse(&mut self) -> PyResult<()> {
        self.inner.inverse().map_err(phasing_err_to_py)
    }

    fn modulus_constraint(&mut self) -> PyResult<()> {
        self.inner.modulus_constraint().map_err(phasing_err_to_py)
    }

    fn partial_modulus_constraint(&mut self, fraction: f64) -> PyResult<()> {
        self.inner
            .partial_modulus_constraint(fraction)
            .map_err(phasing_err_to_py)
    }

    fn er_constraint(&mut self) -> PyResult<()> {
        self.inner.er_constraint().map_err(phasing_err_to_py)
    }

    #[pyo3(signature = (beta=0.9))]
    fn hio_constraint(&mut self, beta: f64) -> PyResult<()> {
        self.inner.hio_constraint(beta).map_err(phasing_err_to_py)
    }

    fn er_iteration(&mut self) -> PyResult<()> {
        self.inner.er_iteration().map_err(phasing_err_to_py)
    }

    #[pyo3(signature = (beta=0.9))]
    fn hio_iteration(&mut self, beta: f64) -> PyResult<()> {
        self.inner.hio_iteration(beta).map_err(phasing_err_to_py)
    }

    #[pyo3(signature = (sigma=2.0, threshold=0.1))]
    fn shrinkwrap(&mut self, sigma: f64, threshold: f64) -> PyResult<()> {
        self.inner.shrinkwrap(sigma, threshold).map_err(phasing_err_to_py)
    }

    #[pyo3(signature = (sigma=2.0))]
    fn gaussian_blur(&mut self, sigma: f64) -> PyResult<()> {
        self.inner.gaussian_blur(sigma).map_err(phasing_err_to_py)
    }

    fn remove_twin(&mut self) -> PyResult<()> {
        self.inner.remove_twin().map_err(phasing_err_to_py)
    }

    /// Returns the applied `(row, col)` shift.
    fn center(&mut self) -> PyResult<(isize, isize)> {
        self.inner.center().map_err(phasing_err_to_py)
    }

    fn reset(&mut self) -> PyResult<()> {
        self.inner.reset().map_err(phasing_err_to_py)
    }

    fn set_diffraction(&mut self, diffraction: PyReadonlyArray2<f64>) -> PyResult<()> {
        self.inner
            .set_diffraction(diffraction.as_array().to_owned())
            .map_err(phasing_err_to_py)
    }

    fn set_support(&mut self, mask: PyReadonlyArray2<bool>) -> PyResult<()> {
        self.inner
            .set_support(mask.as_array().to_owned())
            .map_err(phasing_err_to_py)
    }

    /// Record and return the real-space pixel size, or None for an invalid geometry.
    fn set_scale(&mut self, pixel_pitch: f64, distance: f64, wavelength: f64) -> Option<f64> {
        self.inner.set_scale(pixel_pitch, distance, wavelength)
    }

    fn run(&mut self, recipe: PyRef<'_, PyRecipe>) -> PyResult<()> {
        self.inner.run_recipe(&recipe.inner).map_err(phasing_err_to_py)
    }

    /// One HIO iteration followed by shrinkwrap.
    #[pyo3(signature = (beta=0.9, shrinkwrap_sigma=2.0, shrinkwrap_threshold=0.1))]
    fn live_step(&mut self, beta: f64, shrinkwrap_sigma: f64, shrinkwrap_threshold: f64) -> PyResult<()> {
        let params = LiveParams {
            beta,
            shrinkwrap_sigma,
            shrinkwrap_threshold,
            ..LiveParams::default()
        };
        self.inner.live_step(&params).map_err(phasing_err_to_py)
    }

    fn finish_with_er(&mut self) -> PyResult<()> {
        self.inner.finish_with_er().map_err(phasing_err_to_py)
    }

    #[getter]
    fn fs_image<'py>(&self, py: Python<'py>) -> &'py PyArray2<Complex64> {
        self.inner.fs_image().to_pyarray(py)
    }

    #[getter]
    fn ds_image<'py>(&self, py: Python<'py>) -> &'py PyArray2<Complex64> {
        self.inner.ds_image().to_pyarray(py)
    }

    #[getter]
    fn support<'py>(&self, py: Python<'py>) -> &'py PyArray2<bool> {
        self.inner.support().array().to_pyarray(py)
    }

    #[getter]
    fn diffraction<'py>(&self, py: Python<'py>) -> &'py PyArray2<f64> {
        self.inner.diffraction().to_pyarray(py)
    }

    /// "Direct" or "Fourier".
    #[getter]
    fn domain(&self) -> String {
        self.inner.domain().to_string()
    }

    #[getter]
    fn size(&self) -> usize {
        self.inner.size()
    }

    #[getter]
    fn pixel_size(&self) -> Option<f64> {
        self.inner.pixel_size()
    }
}

// =============================================================================
// Free functions
// =============================================================================

/// Centered forward 2D DFT of a square complex array.
#[pyfunction]
#[pyo3(name = "centered_fft2")]
fn centered_fft2_py<'py>(py: Python<'py>, field: PyReadonlyArray2<Complex64>) -> PyResult<&'py PyArray2<Complex64>> {
    let output = centered_fft2(field.as_array()).map_err(phasing_err_to_py)?;
    Ok(output.to_pyarray(py))
}

/// Centered inverse 2D DFT of a square complex array, normalized by 1/N^2.
#[pyfunction]
#[pyo3(name = "centered_ifft2")]
fn centered_ifft2_py<'py>(py: Python<'py>, field: PyReadonlyArray2<Complex64>) -> PyResult<&'py PyArray2<Complex64>> {
    let output = centered_ifft2(field.as_array()).map_err(phasing_err_to_py)?;
    Ok(output.to_pyarray(py))
}

/// Amplitude a detector would record for `object`.
#[pyfunction]
#[pyo3(signature = (object, saturation=1.0, bit_depth=None, seed=None))]
fn simulate_diffraction<'py>(
    py: Python<'py>,
    object: PyReadonlyArray2<Complex64>,
    saturation: f64,
    bit_depth: Option<u32>,
    seed: Option<u64>,
) -> PyResult<&'py PyArray2<f64>> {
    let intensity = diffract(object.as_array()).map_err(phasing_err_to_py)?;
    let model = DetectorModel {
        saturation,
        bit_depth,
    };
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let amplitude = detect(intensity.view(), &model, &mut rng).map_err(phasing_err_to_py)?;
    Ok(amplitude.to_pyarray(py))
}

/// Real-space pixel size for a detector geometry, or None when undefined.
#[pyfunction]
#[pyo3(name = "pixel_size")]
fn pixel_size_py(pixel_pitch: f64, distance: f64, wavelength: f64, size: usize) -> Option<f64> {
    phaseret_core::pixel_size(pixel_pitch, distance, wavelength, size)
}

/// Phase retrieval Rust accelerator module
#[pymodule]
fn phaseret_rust(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PySolver>()?;
    m.add_class::<PyRecipe>()?;
    m.add_function(wrap_pyfunction!(centered_fft2_py, m)?)?;
    m.add_function(wrap_pyfunction!(centered_ifft2_py, m)?)?;
    m.add_function(wrap_pyfunction!(simulate_diffraction, m)?)?;
    m.add_function(wrap_pyfunction!(pixel_size_py, m)?)?;
    Ok(())
}
