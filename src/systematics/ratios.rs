use nalgebra::DVector;
use rayon::prelude::*;

use crate::error::{FluxFitError, FluxResult};
use crate::fit::{TargetFit, relative_difference};
use crate::flux::DesignMatrix;

/// Fraction of the total universe spread quoted as the 1σ band.
pub const BAND_FRACTION: f64 = 0.34;

/// Per-energy-bin fractional changes induced by one alternative prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftRatios {
    pub nd: DVector<f64>,
    pub fd: DVector<f64>,
    pub both: DVector<f64>,
}

/// Mean fractional change over a universe set plus its band edges.
#[derive(Debug, Clone, PartialEq)]
pub struct RatioBand {
    pub mean: DVector<f64>,
    pub low: DVector<f64>,
    pub high: DVector<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniverseBand {
    pub members: usize,
    pub nd: RatioBand,
    pub fd: RatioBand,
    pub both: RatioBand,
}

/// `M_shift · c` with the nominal coefficients.
pub fn shifted_prediction(fit: &TargetFit, design: &DesignMatrix) -> FluxResult<DVector<f64>> {
    let n_e = fit.outcome.predicted.len();
    if design.n_energy() != n_e {
        return Err(FluxFitError::shape(format!(
            "shifted design has {} energy bins, nominal fit has {n_e}",
            design.n_energy()
        )));
    }
    let m = design.columns(fit.outcome.used_auxiliary);
    if m.ncols() != fit.outcome.coefficients.len() {
        return Err(FluxFitError::shape(format!(
            "shifted design uses {} columns, nominal fit has {} coefficients",
            m.ncols(),
            fit.outcome.coefficients.len()
        )));
    }
    Ok(m * &fit.outcome.coefficients)
}

fn oscillated(fit: &TargetFit, fd: &DVector<f64>) -> FluxResult<DVector<f64>> {
    if fd.len() != fit.oscillation.len() {
        return Err(FluxFitError::shape(format!(
            "shifted FD spectrum has {} bins, nominal fit has {}",
            fd.len(),
            fit.oscillation.len()
        )));
    }
    Ok(fd.component_mul(&fit.oscillation))
}

/// Ratios of one shifted prediction against the nominal fit.
pub fn shift_ratios(fit: &TargetFit, design: &DesignMatrix, fd: &DVector<f64>) -> FluxResult<ShiftRatios> {
    let nd_pred = shifted_prediction(fit, design)?;
    let fd_osc = oscillated(fit, fd)?;
    let nd = relative_difference(&nd_pred, &fit.outcome.predicted, &fit.unoscillated)?;
    let fd = relative_difference(&fd_osc, &fit.outcome.target, &fit.unoscillated)?;
    let both = &nd - &fd;
    Ok(ShiftRatios { nd, fd, both })
}

/// Band over a universe set. Members are `(design, FD spectrum)` pairs already
/// normalised onto the nominal flux.
pub fn universe_band(fit: &TargetFit, members: &[(&DesignMatrix, &DVector<f64>)]) -> FluxResult<UniverseBand> {
    if members.is_empty() {
        return Err(FluxFitError::input("universe set has no members"));
    }
    let predictions: Vec<(DVector<f64>, DVector<f64>)> = members
        .par_iter()
        .map(|(design, fd)| -> FluxResult<_> { Ok((shifted_prediction(fit, design)?, oscillated(fit, fd)?)) })
        .collect::<FluxResult<_>>()?;

    let nd_values: Vec<DVector<f64>> = predictions.iter().map(|(nd, _)| nd.clone()).collect();
    let fd_values: Vec<DVector<f64>> = predictions.iter().map(|(_, fd)| fd.clone()).collect();
    let diff_values: Vec<DVector<f64>> = predictions.iter().map(|(nd, fd)| nd - fd).collect();
    let diff_reference = &fit.outcome.predicted - &fit.outcome.target;

    Ok(UniverseBand {
        members: members.len(),
        nd: band(&nd_values, &fit.outcome.predicted, &fit.unoscillated),
        fd: band(&fd_values, &fit.outcome.target, &fit.unoscillated),
        both: band(&diff_values, &diff_reference, &fit.unoscillated),
    })
}

fn band(values: &[DVector<f64>], reference: &DVector<f64>, unoscillated: &DVector<f64>) -> RatioBand {
    let n = reference.len();
    let mut mean = DVector::zeros(n);
    let mut low = DVector::zeros(n);
    let mut high = DVector::zeros(n);
    for i in 0..n {
        let u = unoscillated[i];
        if u == 0.0 {
            continue;
        }
        let r = reference[i];
        let (mut min, mut max, mut sum) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
        for v in values {
            min = min.min(v[i]);
            max = max.max(v[i]);
            sum += (v[i] - r) / u;
        }
        mean[i] = sum / values.len() as f64;
        low[i] = BAND_FRACTION * (min - r) / u;
        high[i] = BAND_FRACTION * (max - r) / u;
    }
    RatioBand { mean, low, high }
}
