//! Oscillation probability providers.
//!
//! The fit only needs one number per energy bin: the probability that the FD
//! flux survives (or appears) at that energy. Anything able to produce that
//! vector implements [`OscillationProvider`]; the profile is evaluated once per
//! energy binning by [`oscillation_profile`].

pub mod vacuum;

pub use vacuum::*;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::binning::EnergyBinning;
use crate::error::{FluxFitError, FluxResult};

/// Maps energy bin centers to transition probabilities.
pub trait OscillationProvider {
    fn evaluate(&self, energy_centers: &[f64]) -> FluxResult<DVector<f64>>;
}

/// Unoscillated target: probability 1 everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOscillation;

impl OscillationProvider for NoOscillation {
    fn evaluate(&self, energy_centers: &[f64]) -> FluxResult<DVector<f64>> {
        Ok(DVector::from_element(energy_centers.len(), 1.0))
    }
}

/// Serializable choice of oscillation model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OscillationModel {
    None,
    Vacuum(VacuumDisappearance),
}

impl Default for OscillationModel {
    fn default() -> Self {
        OscillationModel::Vacuum(VacuumDisappearance::default())
    }
}

impl OscillationProvider for OscillationModel {
    fn evaluate(&self, energy_centers: &[f64]) -> FluxResult<DVector<f64>> {
        match self {
            OscillationModel::None => NoOscillation.evaluate(energy_centers),
            OscillationModel::Vacuum(v) => v.evaluate(energy_centers),
        }
    }
}

/// Evaluate `provider` on the bin centers of `energy`.
///
/// The result must have one finite entry in `[0, 1]` per energy bin.
pub fn oscillation_profile(
    provider: &dyn OscillationProvider,
    energy: &EnergyBinning,
) -> FluxResult<DVector<f64>> {
    let profile = provider.evaluate(energy.centers())?;
    if profile.len() != energy.len() {
        return Err(FluxFitError::shape(format!(
            "oscillation provider returned {} values for {} energy bins",
            profile.len(),
            energy.len()
        )));
    }
    if let Some(i) = profile.iter().position(|p| !(p.is_finite() && (0.0..=1.0).contains(p))) {
        return Err(FluxFitError::input(format!(
            "oscillation probability {} at energy bin {i} is outside [0, 1]",
            profile[i]
        )));
    }
    Ok(profile)
}
