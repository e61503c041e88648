//! Two-flavour vacuum νμ disappearance.
//!
//! ```text
//! P(νμ → νμ) = 1 - sin²(2θ23) · sin²(1.267 · Δm²32 [eV²] · L [km] / E [GeV])
//! ```
//!
//! with `sin²(2θ) = 4 s23 (1 - s23)` for `s23 = sin²θ23`. Matter effects are
//! ignored; a full three-flavour propagator can be plugged in behind
//! [`OscillationProvider`] instead.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{FluxFitError, FluxResult};
use crate::osc::OscillationProvider;

/// `1.267 = 1 / (4 ħc)` in GeV·km⁻¹·eV⁻² units.
const PHASE_COEFF: f64 = 1.267;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VacuumDisappearance {
    /// `sin²θ23`.
    pub sin2_theta23: f64,
    /// Atmospheric mass splitting `Δm²32` in eV².
    pub dm2_32: f64,
    /// Source-to-FD distance in km.
    pub baseline_km: f64,
}

impl Default for VacuumDisappearance {
    fn default() -> Self {
        Self {
            sin2_theta23: 0.53,
            dm2_32: 2.46e-3,
            baseline_km: 1285.0,
        }
    }
}

impl VacuumDisappearance {
    /// Survival probability at a single energy (GeV).
    pub fn survival(&self, energy: f64) -> f64 {
        let s = self.sin2_theta23;
        let amplitude = 4.0 * s * (1.0 - s);
        let phase = PHASE_COEFF * self.dm2_32 * self.baseline_km / energy;
        (1.0 - amplitude * phase.sin().powi(2)).clamp(0.0, 1.0)
    }

    fn validate(&self) -> FluxResult<()> {
        if !(self.sin2_theta23.is_finite() && (0.0..=1.0).contains(&self.sin2_theta23)) {
            return Err(FluxFitError::input(format!(
                "sin2_theta23 must be in [0, 1], got {}",
                self.sin2_theta23
            )));
        }
        if !(self.dm2_32.is_finite() && self.baseline_km.is_finite() && self.baseline_km >= 0.0) {
            return Err(FluxFitError::input("oscillation parameters must be finite"));
        }
        Ok(())
    }
}

impl OscillationProvider for VacuumDisappearance {
    fn evaluate(&self, energy_centers: &[f64]) -> FluxResult<DVector<f64>> {
        self.validate()?;
        if let Some(&e) = energy_centers.iter().find(|e| !(e.is_finite() && **e > 0.0)) {
            return Err(FluxFitError::input(format!(
                "oscillation energies must be positive, got {e}"
            )));
        }
        Ok(DVector::from_iterator(
            energy_centers.len(),
            energy_centers.iter().map(|&e| self.survival(e)),
        ))
    }
}
