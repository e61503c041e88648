//! Dense linear solves for the flux fit.
//!
//! The regularized normal equations are symmetric positive (semi-)definite,
//! so we try a Cholesky factorization first and fall back to LU.
//!
//! Before factorizing we estimate the reciprocal condition number from the
//! singular values. A system whose smallest singular value is lost in rounding
//! is reported as degenerate instead of returning a numerically meaningless
//! solution.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::error::{FluxFitError, FluxResult};

/// Reciprocal condition number below which a system is treated as singular.
///
/// The floor applies to the system actually factorized. For the normal
/// equations `MᵀPM + ΓᵀΓ` that is roughly the square of the design matrix's
/// own condition, so an unregularized design is rejected once its columns are
/// collinear to about `1e-7`. The smoothness penalty lifts exactly the
/// directions along which neighbouring channels are collinear, so a larger
/// regularization strength brings such a design back above the floor.
pub const RCOND_FLOOR: f64 = 1e-14;

/// `σ_min / σ_max` of a square matrix (0 for the zero matrix).
pub fn reciprocal_condition(m: &DMatrix<f64>) -> f64 {
    let sv = m.singular_values();
    let max = sv.max();
    if !(max.is_finite() && max > 0.0) {
        return 0.0;
    }
    sv.min() / max
}

fn check_square(m: &DMatrix<f64>, rhs: &DVector<f64>) -> FluxResult<()> {
    if !m.is_square() {
        return Err(FluxFitError::degenerate(format!(
            "system matrix is {}x{}, not square",
            m.nrows(),
            m.ncols()
        )));
    }
    if m.nrows() != rhs.len() {
        return Err(FluxFitError::shape(format!(
            "system matrix has {} rows but right-hand side has {} entries",
            m.nrows(),
            rhs.len()
        )));
    }
    if m.iter().chain(rhs.iter()).any(|v| !v.is_finite()) {
        return Err(FluxFitError::input("linear system contains non-finite values"));
    }
    Ok(())
}

fn check_conditioning(m: &DMatrix<f64>) -> FluxResult<f64> {
    let rcond = reciprocal_condition(m);
    if rcond < RCOND_FLOOR {
        return Err(FluxFitError::degenerate(format!(
            "system matrix is singular or near-singular (rcond = {rcond:.3e} < {RCOND_FLOOR:e}); \
             a larger regularization strength may help"
        )));
    }
    Ok(rcond)
}

fn finite_or_degenerate(x: DVector<f64>) -> FluxResult<DVector<f64>> {
    if x.iter().all(|v| v.is_finite()) {
        Ok(x)
    } else {
        Err(FluxFitError::degenerate("solution contains non-finite values"))
    }
}

/// Solve a symmetric positive definite system `lhs · x = rhs`.
pub fn solve_symmetric(lhs: &DMatrix<f64>, rhs: &DVector<f64>) -> FluxResult<DVector<f64>> {
    check_square(lhs, rhs)?;
    let rcond = check_conditioning(lhs)?;

    if let Some(chol) = lhs.clone().cholesky() {
        debug!(n = lhs.nrows(), rcond, "solved normal equations by cholesky");
        return finite_or_degenerate(chol.solve(rhs));
    }

    // Positive semi-definite up to rounding: LU still works when the matrix is
    // well conditioned.
    debug!(n = lhs.nrows(), rcond, "cholesky failed, falling back to LU");
    let x = lhs
        .clone()
        .lu()
        .solve(rhs)
        .ok_or_else(|| FluxFitError::degenerate("LU factorization found a zero pivot"))?;
    finite_or_degenerate(x)
}

/// Solve a general square system `m · x = rhs`.
pub fn solve_square(m: &DMatrix<f64>, rhs: &DVector<f64>) -> FluxResult<DVector<f64>> {
    check_square(m, rhs)?;
    check_conditioning(m)?;
    let x = m
        .clone()
        .lu()
        .solve(rhs)
        .ok_or_else(|| FluxFitError::degenerate("LU factorization found a zero pivot"))?;
    finite_or_degenerate(x)
}
