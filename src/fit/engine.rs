//! Regularized weighted least-squares solve for the channel coefficients.
//!
//! Given the design matrix `M` (energy × channels), the FD target `T`, the
//! oscillation profile `p`, a regularization strength `λ` and a fit region, we
//! solve
//!
//! ```text
//! minimize  (Mc - T⊙p)ᵀ P (Mc - T⊙p) + λ² ‖A c‖²
//! ```
//!
//! where `P` is the diagonal energy weight matrix and `A` the first-difference
//! operator over channels. The minimizer satisfies the normal equations
//!
//! ```text
//! (MᵀPM + ΓᵀΓ) c = MᵀP (T⊙p),   Γ = λA
//! ```
//!
//! With `λ = 0` the system is solved directly as `Mc = T⊙p`, which requires a
//! square design matrix.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::binning::EnergyBinning;
use crate::error::{FluxFitError, FluxResult};
use crate::flux::DesignMatrix;
use crate::math::{solve_square, solve_symmetric};

/// Energy window matched at full weight, and the weights applied outside it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitRegion {
    pub low: f64,
    pub high: f64,
    /// Weight of bins whose center is below `low`.
    pub below_weight: f64,
    /// Weight of bins whose center is above `high`.
    pub above_weight: f64,
}

impl FitRegion {
    /// Region `[low, high]` with zero weight outside.
    pub fn new(low: f64, high: f64) -> FluxResult<Self> {
        validate_bounds(low, high)?;
        Ok(Self {
            low,
            high,
            below_weight: 0.0,
            above_weight: 0.0,
        })
    }

    /// Region covering every bin of `energy`.
    pub fn covering(energy: &EnergyBinning) -> Self {
        let (low, high) = energy.span();
        Self {
            low,
            high,
            below_weight: 0.0,
            above_weight: 0.0,
        }
    }

    pub fn with_out_of_region_weights(mut self, below: f64, above: f64) -> FluxResult<Self> {
        self.set_out_of_region_weights(below, above)?;
        Ok(self)
    }

    pub fn set_bounds(&mut self, low: f64, high: f64) -> FluxResult<()> {
        validate_bounds(low, high)?;
        self.low = low;
        self.high = high;
        Ok(())
    }

    pub fn set_out_of_region_weights(&mut self, below: f64, above: f64) -> FluxResult<()> {
        validate_weights(below, above)?;
        self.below_weight = below;
        self.above_weight = above;
        Ok(())
    }

    /// Check a region built field by field or deserialized from a config file.
    pub fn validate(&self) -> FluxResult<()> {
        validate_bounds(self.low, self.high)?;
        validate_weights(self.below_weight, self.above_weight)
    }

    pub fn contains(&self, energy: f64) -> bool {
        self.low <= energy && energy <= self.high
    }

    /// Weight of a bin centred on `energy`.
    pub fn weight(&self, energy: f64) -> f64 {
        if energy > self.high {
            self.above_weight
        } else if energy < self.low {
            self.below_weight
        } else {
            1.0
        }
    }

    /// Diagonal of the weight matrix.
    pub fn weights(&self, energy_centers: &[f64]) -> DVector<f64> {
        DVector::from_iterator(energy_centers.len(), energy_centers.iter().map(|&e| self.weight(e)))
    }
}

fn validate_bounds(low: f64, high: f64) -> FluxResult<()> {
    if !(low.is_finite() && high.is_finite()) {
        return Err(FluxFitError::range(format!(
            "fit region bounds must be finite, got [{low}, {high}]"
        )));
    }
    if low >= high {
        return Err(FluxFitError::range(format!(
            "fit region low bound {low} must be below high bound {high}"
        )));
    }
    Ok(())
}

fn validate_weights(below: f64, above: f64) -> FluxResult<()> {
    for w in [below, above] {
        if !(w.is_finite() && w >= 0.0) {
            return Err(FluxFitError::input(format!(
                "out-of-region weights must be finite and >= 0, got {w}"
            )));
        }
    }
    Ok(())
}

/// Diagonal energy weight matrix `P`.
pub fn weight_matrix(region: &FitRegion, energy: &EnergyBinning) -> DMatrix<f64> {
    DMatrix::from_diagonal(&region.weights(energy.centers()))
}

/// First-difference operator over `n_channels`, with a zero last row.
///
/// With `auxiliary` a 1×1 zero block is appended so the auxiliary coefficient
/// is never smoothed against the off-axis channels.
pub fn regularization_matrix(n_channels: usize, auxiliary: bool) -> DMatrix<f64> {
    let n = n_channels + usize::from(auxiliary);
    let mut a = DMatrix::zeros(n, n);
    for i in 0..n_channels.saturating_sub(1) {
        a[(i, i)] = 1.0;
        a[(i, i + 1)] = -1.0;
    }
    a
}

/// Per-solve settings. A copy is handed to every solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitSettings {
    /// Regularization strength `λ` (>= 0).
    pub regularization: f64,
    pub region: FitRegion,
    /// Use the auxiliary column when the design matrix carries one.
    pub include_auxiliary: bool,
}

/// Output of one solve.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    /// Oscillated target `T ⊙ p`.
    pub target: DVector<f64>,
    /// `M c`.
    pub predicted: DVector<f64>,
    pub coefficients: DVector<f64>,
    pub regularization: f64,
    pub used_auxiliary: bool,
    /// `‖P^{1/2} (Mc - T⊙p)‖`.
    pub residual_norm: f64,
    /// `‖A c‖`.
    pub penalty_norm: f64,
}

impl FitOutcome {
    /// Coefficients of the off-axis channels only.
    pub fn channel_coefficients(&self) -> &[f64] {
        let n = self.coefficients.len() - usize::from(self.used_auxiliary);
        &self.coefficients.as_slice()[..n]
    }

    pub fn auxiliary_coefficient(&self) -> Option<f64> {
        self.used_auxiliary
            .then(|| self.coefficients[self.coefficients.len() - 1])
    }

    /// Sum of squared differences between adjacent channel coefficients.
    pub fn roughness(&self) -> f64 {
        self.channel_coefficients()
            .windows(2)
            .map(|w| (w[0] - w[1]).powi(2))
            .sum()
    }
}

/// `(a - b) / reference` per bin; zero reference bins give 0.
pub fn relative_difference(
    a: &DVector<f64>,
    b: &DVector<f64>,
    reference: &DVector<f64>,
) -> FluxResult<DVector<f64>> {
    if a.len() != b.len() || a.len() != reference.len() {
        return Err(FluxFitError::shape(format!(
            "cannot compare spectra of {}, {} and {} bins",
            a.len(),
            b.len(),
            reference.len()
        )));
    }
    Ok(DVector::from_fn(a.len(), |i, _| {
        if reference[i] == 0.0 {
            0.0
        } else {
            (a[i] - b[i]) / reference[i]
        }
    }))
}

/// Solve for the coefficient vector.
///
/// `target`, `oscillation` and `energy` must all match the design matrix's
/// energy-bin count.
pub fn solve(
    design: &DesignMatrix,
    target: &DVector<f64>,
    oscillation: &DVector<f64>,
    energy: &EnergyBinning,
    settings: &FitSettings,
) -> FluxResult<FitOutcome> {
    settings.region.validate()?;
    let n_e = design.n_energy();
    for (name, len) in [
        ("target", target.len()),
        ("oscillation profile", oscillation.len()),
        ("energy binning", energy.len()),
    ] {
        if len != n_e {
            return Err(FluxFitError::shape(format!(
                "{name} has {len} bins but the design matrix has {n_e} energy bins"
            )));
        }
    }
    if target.iter().chain(oscillation.iter()).any(|v| !v.is_finite()) {
        return Err(FluxFitError::input("target and oscillation profile must be finite"));
    }
    let lambda = settings.regularization;
    if !(lambda.is_finite() && lambda >= 0.0) {
        return Err(FluxFitError::input(format!(
            "regularization strength must be finite and >= 0, got {lambda}"
        )));
    }

    let used_auxiliary = design.uses_auxiliary(settings.include_auxiliary);
    let m = design.columns(used_auxiliary);
    let effective = target.component_mul(oscillation);

    let a = regularization_matrix(design.n_channels(), used_auxiliary);
    let weights = settings.region.weights(energy.centers());

    let coefficients = if lambda == 0.0 {
        if m.ncols() != n_e {
            return Err(FluxFitError::degenerate(format!(
                "regularization strength 0 needs a square design matrix, got {}x{}",
                n_e,
                m.ncols()
            )));
        }
        solve_square(&m, &effective)?
    } else {
        let gamma = &a * lambda;
        let mtp = m.transpose() * DMatrix::from_diagonal(&weights);
        let lhs = &mtp * &m + gamma.transpose() * &gamma;
        let rhs = &mtp * &effective;
        solve_symmetric(&lhs, &rhs)?
    };

    let predicted = &m * &coefficients;
    let residual_norm = (&predicted - &effective)
        .iter()
        .zip(weights.iter())
        .map(|(r, w)| w * r * r)
        .sum::<f64>()
        .sqrt();
    let penalty_norm = (&a * &coefficients).norm();

    debug!(
        lambda,
        columns = coefficients.len(),
        auxiliary = used_auxiliary,
        residual_norm,
        penalty_norm,
        "solved flux fit"
    );

    Ok(FitOutcome {
        target: effective,
        predicted,
        coefficients,
        regularization: lambda,
        used_auxiliary,
        residual_norm,
        penalty_norm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn energy(n: usize) -> EnergyBinning {
        EnergyBinning::from_edges((0..=n).map(|i| i as f64).collect()).unwrap()
    }

    fn settings(lambda: f64, region: FitRegion) -> FitSettings {
        FitSettings {
            regularization: lambda,
            region,
            include_auxiliary: true,
        }
    }

    fn full_weight(energy: &EnergyBinning) -> FitRegion {
        FitRegion::covering(energy).with_out_of_region_weights(1.0, 1.0).unwrap()
    }

    /// Smooth, overlapping channel spectra (peak energy falls with channel index).
    fn synthetic_design(n_e: usize, n_c: usize) -> DesignMatrix {
        let m = DMatrix::from_fn(n_e, n_c, |i, j| {
            let e = i as f64 + 0.5;
            let peak = 1.0 + (n_c - j) as f64 * 0.6;
            (-(e - peak).powi(2) / 4.0).exp() + 0.05
        });
        DesignMatrix::new(m, None).unwrap()
    }

    #[test]
    fn regularization_matrix_has_free_boundary_and_zero_aux_block() {
        let a = regularization_matrix(3, true);
        #[rustfmt::skip]
        let expected = DMatrix::from_row_slice(4, 4, &[
            1.0, -1.0,  0.0, 0.0,
            0.0,  1.0, -1.0, 0.0,
            0.0,  0.0,  0.0, 0.0,
            0.0,  0.0,  0.0, 0.0,
        ]);
        assert_eq!(a, expected);
        assert_eq!(regularization_matrix(1, false), DMatrix::zeros(1, 1));
    }

    #[test]
    fn weights_follow_region() {
        let region = FitRegion::new(2.0, 5.0)
            .unwrap()
            .with_out_of_region_weights(0.8, 0.1)
            .unwrap();
        let w = region.weights(&[1.5, 2.0, 3.5, 5.0, 5.5]);
        assert_eq!(w.as_slice(), &[0.8, 1.0, 1.0, 1.0, 0.1]);
        assert!(matches!(FitRegion::new(5.0, 5.0), Err(FluxFitError::InvalidRange(_))));
        assert!(FitRegion::new(1.0, 2.0).unwrap().with_out_of_region_weights(-1.0, 0.0).is_err());
        let p = weight_matrix(&region, &energy(3));
        assert_eq!(p.shape(), (3, 3));
        assert_eq!(p[(2, 2)], 1.0);
        assert_eq!(p[(0, 1)], 0.0);
    }

    #[test]
    fn solve_rejects_hand_built_invalid_region() {
        let e = energy(3);
        let design = DesignMatrix::new(DMatrix::identity(3, 3), None).unwrap();
        let target = DVector::from_element(3, 1.0);
        let osc = DVector::from_element(3, 1.0);

        let inverted = FitRegion { low: 5.0, high: 2.0, below_weight: 1.0, above_weight: 1.0 };
        assert!(matches!(
            solve(&design, &target, &osc, &e, &settings(0.1, inverted)),
            Err(FluxFitError::InvalidRange(_))
        ));
        let negative = FitRegion { below_weight: -0.5, ..full_weight(&e) };
        assert!(matches!(
            solve(&design, &target, &osc, &e, &settings(0.1, negative)),
            Err(FluxFitError::InvalidInput(_))
        ));
        let nan = FitRegion { above_weight: f64::NAN, ..full_weight(&e) };
        assert!(nan.validate().is_err());
        assert!(full_weight(&e).validate().is_ok());
    }

    #[test]
    fn regularization_rescues_nearly_collinear_channels() {
        let e = energy(3);
        let m = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 2.0, 2.0, 3.0, 3.0 + 1e-9]);
        let design = DesignMatrix::new(m, None).unwrap();
        let target = DVector::from_row_slice(&[2.0, 4.0, 6.0]);
        let osc = DVector::from_element(3, 1.0);

        assert!(matches!(
            solve(&design, &target, &osc, &e, &settings(1e-12, full_weight(&e))),
            Err(FluxFitError::DegenerateSystem(_))
        ));
        let out = solve(&design, &target, &osc, &e, &settings(0.1, full_weight(&e))).unwrap();
        assert!((out.coefficients[0] - out.coefficients[1]).abs() < 1e-6);
        assert!((&out.predicted - &target).amax() < 1e-6);
    }

    #[test]
    fn identity_design_without_regularization_recovers_target() {
        let e = energy(4);
        let design = DesignMatrix::new(DMatrix::identity(4, 4), None).unwrap();
        let target = DVector::from_row_slice(&[1.0, -2.0, 3.5, 0.25]);
        let osc = DVector::from_element(4, 1.0);

        let out = solve(&design, &target, &osc, &e, &settings(0.0, full_weight(&e))).unwrap();
        assert!((&out.coefficients - &target).amax() < 1e-12);
        assert!((&out.predicted - &target).amax() < 1e-12);
    }

    #[test]
    fn zero_regularization_on_non_square_design_is_degenerate() {
        let e = energy(5);
        let design = synthetic_design(5, 3);
        let target = DVector::from_element(5, 1.0);
        let osc = DVector::from_element(5, 1.0);
        let err = solve(&design, &target, &osc, &e, &settings(0.0, full_weight(&e))).unwrap_err();
        assert!(matches!(err, FluxFitError::DegenerateSystem(_)));
    }

    #[test]
    fn output_lengths_follow_design() {
        let e = energy(12);
        let nd = synthetic_design(12, 6);
        let aux = DVector::from_fn(12, |i, _| 0.5 + 0.1 * i as f64);
        let design = DesignMatrix::new(nd.storage().clone(), Some(aux)).unwrap();
        let target = DVector::from_fn(12, |i, _| (-(i as f64 - 4.0).powi(2) / 8.0).exp());
        let osc = DVector::from_element(12, 0.9);

        let with = solve(&design, &target, &osc, &e, &settings(0.1, full_weight(&e))).unwrap();
        assert_eq!(with.coefficients.len(), 7);
        assert_eq!(with.predicted.len(), 12);
        assert!(with.auxiliary_coefficient().is_some());
        assert_eq!(with.channel_coefficients().len(), 6);

        let mut s = settings(0.1, full_weight(&e));
        s.include_auxiliary = false;
        let without = solve(&design, &target, &osc, &e, &s).unwrap();
        assert_eq!(without.coefficients.len(), 6);
        assert!(without.auxiliary_coefficient().is_none());
        assert!((&with.target - &target * 0.9).amax() < 1e-12);
    }

    #[test]
    fn shapes_are_checked() {
        let e = energy(4);
        let design = synthetic_design(4, 2);
        let osc = DVector::from_element(4, 1.0);
        let short = DVector::from_element(3, 1.0);
        let s = settings(0.1, full_weight(&e));
        assert!(matches!(solve(&design, &short, &osc, &e, &s), Err(FluxFitError::ShapeMismatch(_))));
        assert!(matches!(solve(&design, &osc, &short, &e, &s), Err(FluxFitError::ShapeMismatch(_))));
        assert!(matches!(
            solve(&design, &osc, &osc, &energy(5), &s),
            Err(FluxFitError::ShapeMismatch(_))
        ));
        let mut neg = s;
        neg.regularization = -1.0;
        assert!(matches!(solve(&design, &osc, &osc, &e, &neg), Err(FluxFitError::InvalidInput(_))));
    }

    #[test]
    fn stronger_regularization_gives_smoother_coefficients() {
        let e = energy(20);
        let design = synthetic_design(20, 8);
        // Deterministic "noise" on a smooth target.
        let target = DVector::from_fn(20, |i, _| {
            let x = i as f64 + 0.5;
            (-(x - 6.0).powi(2) / 10.0).exp() + 0.03 * ((7 * i) as f64).sin()
        });
        let osc = DVector::from_element(20, 1.0);

        let mut previous = f64::INFINITY;
        for lambda in [1e-3, 1e-2, 1e-1, 1.0, 10.0] {
            let out = solve(&design, &target, &osc, &e, &settings(lambda, full_weight(&e))).unwrap();
            let r = out.roughness();
            assert!(r <= previous * (1.0 + 1e-9), "roughness grew at lambda={lambda}: {r} > {previous}");
            assert!((out.penalty_norm.powi(2) - r).abs() <= 1e-9 * r.max(1.0));
            previous = r;
        }
    }

    #[test]
    fn zero_weight_bins_do_not_influence_the_fit() {
        let e = energy(8);
        let design = synthetic_design(8, 4);
        let target = DVector::from_fn(8, |i, _| 1.0 + 0.3 * i as f64 - 0.05 * (i * i) as f64);
        let osc = DVector::from_element(8, 1.0);
        let region = FitRegion::new(2.0, 5.0).unwrap();
        let full = solve(&design, &target, &osc, &e, &settings(0.05, region)).unwrap();

        // Bins centred on 2.5, 3.5, 4.5 are the only ones inside [2, 5].
        let kept = EnergyBinning::from_edges(vec![2.0, 3.0, 4.0, 5.0]).unwrap();
        let cut = DesignMatrix::new(design.storage().rows(2, 3).into_owned(), None).unwrap();
        let cut_target = target.rows(2, 3).into_owned();
        let cut_osc = DVector::from_element(3, 1.0);
        let reduced = solve(&cut, &cut_target, &cut_osc, &kept, &settings(0.05, region)).unwrap();

        assert!((&full.coefficients - &reduced.coefficients).amax() < 1e-9);
    }

    #[test]
    fn duplicated_channel_shares_demand_smoothly() {
        #[rustfmt::skip]
        let m = DMatrix::from_row_slice(3, 4, &[
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 1.0,
        ]);
        let design = DesignMatrix::new(m, None).unwrap();
        let e = energy(3);
        let target = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        let osc = DVector::from_element(3, 1.0);

        let out = solve(&design, &target, &osc, &e, &settings(0.1, full_weight(&e))).unwrap();
        let c = &out.coefficients;
        assert_eq!(c.len(), 4);
        assert!((c[2] - c[3]).abs() < c[2].abs() * 0.5);
        assert!((out.predicted[2] - 3.0).abs() < 0.1);
    }
}
