//! Phase Retrieval Core Library
//!
//! Pure Rust implementation of iterative phase retrieval (Error Reduction,
//! Hybrid Input-Output, shrinkwrap) for recovering a 2D object from the
//! magnitude of its Fourier transform. This crate contains all algorithm
//! logic without Python bindings.

pub mod config;
pub mod constraint;
pub mod error;
pub mod filters;
pub mod float_trait;
pub mod simulate;
pub mod solver;
pub mod support;
pub mod transforms;

// Re-export commonly used types at the crate root
pub use config::{LiveParams, SolverConfig, TwinConvention};
pub use constraint::{repeat, sequence, Recipe, RecipeProgress};
pub use error::{Domain, PhasingError, PhasingResult};
pub use float_trait::PhaseFloat;
pub use simulate::{detect, diffract, DetectorModel};
pub use solver::{pixel_size, Solver, SolverSnapshot};
pub use support::Support;
pub use transforms::{centered_fft2, centered_ifft2, CenteredFft};
