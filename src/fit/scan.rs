//! Regularization scans and L-curve corner selection.

use nalgebra::DVector;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::binning::EnergyBinning;
use crate::error::{FluxFitError, FluxResult};
use crate::fit::engine::{FitSettings, solve};
use crate::flux::DesignMatrix;

/// One solved point of a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPoint {
    /// Position in the requested grid.
    pub index: usize,
    pub lambda: f64,
    pub residual_norm: f64,
    pub penalty_norm: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegularizationScan {
    /// Successful solves, in grid order.
    pub points: Vec<ScanPoint>,
    /// `(lambda, error)` for grid values whose solve failed.
    pub failures: Vec<(f64, FluxFitError)>,
}

impl RegularizationScan {
    pub fn corner(&self) -> Option<&ScanPoint> {
        lcurve_corner(&self.points)
    }
}

/// Solve once per `lambdas` entry (in parallel), keeping every other setting.
///
/// Fails only when no grid value could be solved.
pub fn scan_regularization(
    design: &DesignMatrix,
    target: &DVector<f64>,
    oscillation: &DVector<f64>,
    energy: &EnergyBinning,
    settings: &FitSettings,
    lambdas: &[f64],
) -> FluxResult<RegularizationScan> {
    if lambdas.is_empty() {
        return Err(FluxFitError::input("regularization grid is empty"));
    }

    let results: Vec<(usize, f64, FluxResult<ScanPoint>)> = lambdas
        .par_iter()
        .enumerate()
        .map(|(index, &lambda)| {
            let mut s = *settings;
            s.regularization = lambda;
            let point = solve(design, target, oscillation, energy, &s).map(|out| ScanPoint {
                index,
                lambda,
                residual_norm: out.residual_norm,
                penalty_norm: out.penalty_norm,
            });
            (index, lambda, point)
        })
        .collect();

    let mut points = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (index, lambda, result) in results {
        match result {
            Ok(p) => points.push(p),
            Err(e) => {
                warn!(index, lambda, error = %e, "regularization scan point failed");
                failures.push((lambda, e));
            }
        }
    }

    if points.is_empty() {
        // Every point failed; report the first failure.
        let (_, first) = failures.swap_remove(0);
        return Err(first);
    }
    debug!(points = points.len(), failures = failures.len(), "regularization scan done");
    Ok(RegularizationScan { points, failures })
}

/// Point of maximum signed curvature of the (ln residual, ln penalty) curve.
///
/// Points must be in increasing-λ order. Points with non-positive norms are
/// ignored. With fewer than three usable points the minimum-residual point is
/// returned. Ties go to the lower grid index.
pub fn lcurve_corner(points: &[ScanPoint]) -> Option<&ScanPoint> {
    let usable: Vec<(&ScanPoint, f64, f64)> = points
        .iter()
        .filter(|p| p.residual_norm > 0.0 && p.penalty_norm > 0.0)
        .filter(|p| p.residual_norm.is_finite() && p.penalty_norm.is_finite())
        .map(|p| (p, p.residual_norm.ln(), p.penalty_norm.ln()))
        .collect();

    if usable.len() < 3 {
        return min_residual(points);
    }

    let mut best: Option<(&ScanPoint, f64)> = None;
    for w in usable.windows(3) {
        let (_, ax, ay) = w[0];
        let (p, bx, by) = w[1];
        let (_, cx, cy) = w[2];
        let Some(k) = menger_curvature((ax, ay), (bx, by), (cx, cy)) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((b, bk)) => k > bk || (k == bk && p.index < b.index),
        };
        if better {
            best = Some((p, k));
        }
    }
    best.map(|(p, _)| p).or_else(|| min_residual(points))
}

fn min_residual(points: &[ScanPoint]) -> Option<&ScanPoint> {
    points
        .iter()
        .filter(|p| p.residual_norm.is_finite())
        .min_by(|a, b| {
            a.residual_norm
                .total_cmp(&b.residual_norm)
                .then(a.index.cmp(&b.index))
        })
}

/// Signed curvature of the circle through three points (positive for a
/// left turn).
fn menger_curvature(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> Option<f64> {
    let d1 = (b.0 - a.0, b.1 - a.1);
    let d2 = (c.0 - b.0, c.1 - b.1);
    let cross = d1.0 * d2.1 - d1.1 * d2.0;
    let ab = d1.0.hypot(d1.1);
    let bc = d2.0.hypot(d2.1);
    let ca = (c.0 - a.0).hypot(c.1 - a.1);
    let denom = ab * bc * ca;
    (denom > 0.0 && denom.is_finite()).then(|| 2.0 * cross / denom)
}
