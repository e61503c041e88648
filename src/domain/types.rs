//! Shared domain types.
//!
//! These describe *where* spectra come from and *how* a session is set up.
//! They are plain serializable values so they can be:
//!
//! - embedded in a flux library file
//! - built programmatically (synthetic library, tests)
//! - handed to a session without any hidden global state

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{FluxFitError, FluxResult};
use crate::fit::FitRegion;
use crate::flux::DesignSource;
use crate::osc::OscillationModel;

/// One far-detector target spectrum (e.g. a beam polarity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSource {
    pub name: String,
    /// Unoscillated FD spectrum id.
    pub fd: String,
}

/// Spectrum ids making up one alternative flux prediction.
///
/// `fd` maps target name to the FD spectrum id under this prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxVariant {
    pub nd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<String>,
    #[serde(default)]
    pub fd: BTreeMap<String, String>,
}

impl FluxVariant {
    pub fn design_source(&self) -> DesignSource<'_> {
        DesignSource {
            nd: &self.nd,
            auxiliary: self.auxiliary.as_deref(),
        }
    }

    pub fn fd_for(&self, target: &str) -> FluxResult<&str> {
        self.fd
            .get(target)
            .map(String::as_str)
            .ok_or_else(|| FluxFitError::input(format!("no FD spectrum for target '{target}'")))
    }
}

/// A named systematic shift (e.g. a focusing parameter at +1σ).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftSource {
    pub name: String,
    #[serde(flatten)]
    pub flux: FluxVariant,
}

/// A set of throws around a central value (e.g. hadron-production universes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseSource {
    pub name: String,
    pub central: FluxVariant,
    pub members: Vec<FluxVariant>,
}

/// Layout of a flux library: the analysis binning and the spectrum ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxSources {
    /// Analysis energy bin edges (GeV).
    pub energy_edges: Vec<f64>,
    /// Analysis off-axis channel bin edges (m).
    pub channel_edges: Vec<f64>,
    /// Nominal ND map and auxiliary spectrum.
    pub nd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<String>,
    /// At least one target; the first is the default.
    pub targets: Vec<TargetSource>,
    #[serde(default)]
    pub shifts: Vec<ShiftSource>,
    #[serde(default)]
    pub universes: Vec<UniverseSource>,
}

impl FluxSources {
    pub fn nominal_source(&self) -> DesignSource<'_> {
        DesignSource {
            nd: &self.nd,
            auxiliary: self.auxiliary.as_deref(),
        }
    }

    pub fn default_target(&self) -> FluxResult<&TargetSource> {
        self.targets
            .first()
            .ok_or_else(|| FluxFitError::input("flux sources declare no FD target"))
    }

    /// Checks that every shift and universe member covers every target.
    pub fn validate(&self) -> FluxResult<()> {
        self.default_target()?;
        let variants = self
            .shifts
            .iter()
            .map(|s| (s.name.as_str(), &s.flux))
            .chain(self.universes.iter().flat_map(|u| {
                std::iter::once((u.name.as_str(), &u.central))
                    .chain(u.members.iter().map(move |m| (u.name.as_str(), m)))
            }));
        for (name, variant) in variants {
            for t in &self.targets {
                variant.fd_for(&t.name).map_err(|_| {
                    FluxFitError::input(format!("'{name}' has no FD spectrum for target '{}'", t.name))
                })?;
            }
        }
        for u in &self.universes {
            if u.members.is_empty() {
                return Err(FluxFitError::input(format!("universe set '{}' has no members", u.name)));
            }
        }
        Ok(())
    }
}

/// Session setup that stays fixed for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Group factor applied to the analysis energy binning (1 = unchanged).
    pub energy_rebin: usize,
    /// Group factor applied to the analysis channel binning (1 = unchanged).
    pub channel_rebin: usize,
    pub oscillation: OscillationModel,
    /// Assemble the auxiliary column (when the sources name one).
    pub use_auxiliary: bool,
    /// Initial fit region; defaults to the full energy span.
    pub fit_region: Option<FitRegion>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            energy_rebin: 1,
            channel_rebin: 1,
            oscillation: OscillationModel::default(),
            use_auxiliary: false,
            fit_region: None,
        }
    }
}

/// What the binary should do, as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Flux library JSON; `None` uses the seeded synthetic library.
    pub library: Option<PathBuf>,
    pub seed: u64,
    pub session: SessionConfig,
    pub target: Option<String>,
    pub lambda: f64,
    pub channel_range: Option<(f64, f64)>,
    pub fit_region: Option<(f64, f64)>,
    pub out_of_region_weights: (f64, f64),
    pub lambda_min: f64,
    pub lambda_max: f64,
    pub lambda_steps: usize,
}
