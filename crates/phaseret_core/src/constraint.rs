//! Composable reconstruction recipes.
//!
//! A [`Recipe`] is an immutable tree of primitive iterations combined with
//! [`sequence`] and [`repeat`]. It is built once, named by its structure
//! (`10*(HIO+ER)`), and applied to a [`Solver`] as a unit with exact step
//! accounting.

use std::fmt;

use crate::config::{validate_beta, validate_fraction};
use crate::error::{PhasingError, PhasingResult};
use crate::float_trait::PhaseFloat;
use crate::solver::Solver;

/// HIO feedback used by [`Recipe::hio_default`].
const DEFAULT_HIO_BETA: f64 = 0.9;

/// A reconstruction recipe.
///
/// Every primitive is a full transform/projection round trip, not a bare
/// projection: it starts and ends in the direct domain.
#[derive(Debug, Clone, PartialEq)]
pub enum Recipe {
    /// Forward transform, modulus replacement, inverse transform.
    Fourier,
    /// As `Fourier`, but each pixel is replaced with probability `fraction`.
    PartialFourier { fraction: f64 },
    /// One Hybrid Input-Output iteration.
    Hio { beta: f64 },
    /// One Error Reduction iteration.
    Er,
    /// Apply the first recipe, then the second.
    Sequence(Box<Recipe>, Box<Recipe>),
    /// Apply `node` `count` times.
    Repeat { node: Box<Recipe>, count: usize },
}

/// Reported after every primitive executed by
/// [`Solver::run_recipe_with_progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipeProgress {
    /// 1-based index of the primitive that just finished.
    pub step: usize,
    /// `total_reps` of the whole recipe.
    pub total: usize,
    /// Display name of the primitive.
    pub name: &'static str,
}

/// Apply `first`, then `second`.
pub fn sequence(first: Recipe, second: Recipe) -> Recipe {
    Recipe::Sequence(Box::new(first), Box::new(second))
}

/// Apply `node` `count` times. A zero count, or one whose total iteration
/// count overflows `usize`, is rejected.
pub fn repeat(node: Recipe, count: usize) -> PhasingResult<Recipe> {
    validate_count(count)?;
    if node.checked_reps().and_then(|reps| reps.checked_mul(count)).is_none() {
        return Err(overflow(count));
    }
    Ok(Recipe::Repeat {
        node: Box::new(node),
        count,
    })
}

fn overflow(count: usize) -> PhasingError {
    PhasingError::invalid("count", count as f64, "total repetitions that fit in usize")
}

fn validate_count(count: usize) -> PhasingResult<()> {
    if count == 0 {
        return Err(PhasingError::invalid("count", 0.0, "repeat count >= 1"));
    }
    Ok(())
}

impl Recipe {
    pub fn fourier() -> Self {
        Self::Fourier
    }

    pub fn partial_fourier(fraction: f64) -> PhasingResult<Self> {
        validate_fraction(fraction)?;
        Ok(Self::PartialFourier { fraction })
    }

    pub fn hio(beta: f64) -> PhasingResult<Self> {
        validate_beta(beta)?;
        Ok(Self::Hio { beta })
    }

    /// HIO with the customary feedback of 0.9.
    pub fn hio_default() -> Self {
        Self::Hio {
            beta: DEFAULT_HIO_BETA,
        }
    }

    pub fn er() -> Self {
        Self::Er
    }

    /// Number of primitive iterations one application performs.
    ///
    /// Additive over `Sequence`, multiplicative under `Repeat`. Saturates at
    /// `usize::MAX` for hand-built trees that overflow; [`Self::validate`]
    /// rejects those.
    pub fn total_reps(&self) -> usize {
        self.checked_reps().unwrap_or(usize::MAX)
    }

    fn checked_reps(&self) -> Option<usize> {
        match self {
            Self::Fourier | Self::PartialFourier { .. } | Self::Hio { .. } | Self::Er => Some(1),
            Self::Sequence(first, second) => first.checked_reps()?.checked_add(second.checked_reps()?),
            Self::Repeat { node, count } => node.checked_reps()?.checked_mul(*count),
        }
    }

    /// Whether this node is a single iteration rather than a combinator.
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Self::Sequence(..) | Self::Repeat { .. })
    }

    /// Check every parameter in the tree. Variants can be built directly, so
    /// the builders' checks are repeated here before a recipe runs.
    pub fn validate(&self) -> PhasingResult<()> {
        self.validate_parameters()?;
        if self.checked_reps().is_none() {
            return Err(PhasingError::invalid(
                "count",
                f64::INFINITY,
                "total repetitions that fit in usize",
            ));
        }
        Ok(())
    }

    fn validate_parameters(&self) -> PhasingResult<()> {
        match self {
            Self::Fourier | Self::Er => Ok(()),
            Self::PartialFourier { fraction } => validate_fraction(*fraction),
            Self::Hio { beta } => validate_beta(*beta),
            Self::Sequence(first, second) => {
                first.validate_parameters()?;
                second.validate_parameters()
            }
            Self::Repeat { node, count } => {
                validate_count(*count)?;
                node.validate_parameters()
            }
        }
    }

    fn primitive_name(&self) -> &'static str {
        match self {
            Self::Fourier => "Fourier",
            Self::PartialFourier { .. } => "PartialFourier",
            Self::Hio { .. } => "HIO",
            Self::Er => "ER",
            Self::Sequence(..) | Self::Repeat { .. } => "",
        }
    }

    /// Run the recipe against `solver`, which must be in the direct domain.
    pub fn apply<F: PhaseFloat>(&self, solver: &mut Solver<F>) -> PhasingResult<()> {
        self.apply_with_progress(solver, |_| {})
    }

    /// Run the recipe, calling `progress` after every primitive.
    pub fn apply_with_progress<F, P>(&self, solver: &mut Solver<F>, mut progress: P) -> PhasingResult<()>
    where
        F: PhaseFloat,
        P: FnMut(RecipeProgress),
    {
        self.validate()?;
        let total = self.total_reps();
        log::debug!("running recipe {} ({} iterations)", self, total);
        let mut step = 0;
        self.run(solver, total, &mut step, &mut progress)
    }

    fn run<F, P>(
        &self,
        solver: &mut Solver<F>,
        total: usize,
        step: &mut usize,
        progress: &mut P,
    ) -> PhasingResult<()>
    where
        F: PhaseFloat,
        P: FnMut(RecipeProgress),
    {
        match self {
            Self::Sequence(first, second) => {
                first.run(solver, total, step, progress)?;
                second.run(solver, total, step, progress)
            }
            Self::Repeat { node, count } => {
                for _ in 0..*count {
                    node.run(solver, total, step, progress)?;
                }
                Ok(())
            }
            Self::Fourier => solver.fourier_iteration(),
            Self::PartialFourier { fraction } => {
                solver.partial_fourier_iteration(F::from_f64_c(*fraction))
            }
            Self::Hio { beta } => solver.hio_iteration(F::from_f64_c(*beta)),
            Self::Er => solver.er_iteration(),
        }?;

        if self.is_primitive() {
            *step += 1;
            log::trace!("recipe step {}/{}: {}", step, total, self.primitive_name());
            progress(RecipeProgress {
                step: *step,
                total,
                name: self.primitive_name(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequence(first, second) => write!(f, "({}+{})", first, second),
            Self::Repeat { node, count } => write!(f, "{}*{}", count, node),
            primitive => f.write_str(primitive.primitive_name()),
        }
    }
}
