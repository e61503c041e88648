//! Fit session: owns the binning context, fit region and assembled fluxes.
//!
//! All state changes go through [`FluxFitter`] and are applied atomically: a
//! failed narrowing or region update leaves the previous state in place.
//! Every solve runs on a [`FitSnapshot`], an immutable, cheaply cloned copy of
//! that state, so parallel workers never see a half-updated region or a
//! half-rebuilt design matrix.

use std::collections::BTreeMap;
use std::sync::Arc;

use nalgebra::DVector;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::binning::{Binning, BinningContext, ChannelWindow};
use crate::domain::{FluxSources, FluxVariant, SessionConfig};
use crate::error::{FluxFitError, FluxResult};
use crate::fit::engine::{FitOutcome, FitRegion, FitSettings, solve};
use crate::fit::scan::{RegularizationScan, scan_regularization};
use crate::flux::{
    DesignMatrix, FluxProvider, assemble_design_matrix, load_spectrum, normalize_spectrum_to_nominal,
    normalize_to_nominal,
};
use crate::osc::oscillation_profile;
use crate::systematics::{ShiftRatios, UniverseBand, shift_ratios, universe_band};

/// Unoscillated FD spectrum of one target on the session energy binning.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetFlux {
    pub name: String,
    pub unoscillated: DVector<f64>,
}

/// One alternative prediction on the active binning.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantFlux {
    pub design: DesignMatrix,
    /// Target name → FD spectrum.
    pub fd: BTreeMap<String, DVector<f64>>,
}

impl VariantFlux {
    fn fd_for(&self, target: &str) -> FluxResult<&DVector<f64>> {
        self.fd
            .get(target)
            .ok_or_else(|| FluxFitError::input(format!("no FD spectrum for target '{target}'")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedVariant {
    pub name: String,
    pub flux: VariantFlux,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniverseSet {
    pub name: String,
    /// Members already normalised onto the nominal flux.
    pub members: Vec<VariantFlux>,
}

/// Everything that depends on the channel binning.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledFluxes {
    pub nominal: DesignMatrix,
    pub shifts: Vec<NamedVariant>,
    pub universes: Vec<UniverseSet>,
}

/// A nominal fit against one target, with what systematics need to reuse it.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetFit {
    pub target: String,
    pub unoscillated: DVector<f64>,
    pub oscillation: DVector<f64>,
    pub outcome: FitOutcome,
}

/// Immutable view of a session.
#[derive(Debug, Clone)]
pub struct FitSnapshot {
    binning: BinningContext,
    region: FitRegion,
    oscillation: Arc<DVector<f64>>,
    targets: Arc<Vec<TargetFlux>>,
    fluxes: Arc<AssembledFluxes>,
}

impl FitSnapshot {
    pub fn binning(&self) -> &BinningContext {
        &self.binning
    }

    pub fn region(&self) -> &FitRegion {
        &self.region
    }

    pub fn oscillation(&self) -> &DVector<f64> {
        &self.oscillation
    }

    pub fn fluxes(&self) -> &AssembledFluxes {
        &self.fluxes
    }

    /// `None` selects the first declared target.
    pub fn target(&self, name: Option<&str>) -> FluxResult<&TargetFlux> {
        match name {
            None => self
                .targets
                .first()
                .ok_or_else(|| FluxFitError::input("session has no FD target")),
            Some(name) => self
                .targets
                .iter()
                .find(|t| t.name == name)
                .ok_or_else(|| FluxFitError::input(format!("unknown target '{name}'"))),
        }
    }

    pub fn settings(&self, lambda: f64, include_auxiliary: bool) -> FitSettings {
        FitSettings {
            regularization: lambda,
            region: self.region,
            include_auxiliary,
        }
    }

    pub fn fit(&self, target: Option<&str>, lambda: f64, include_auxiliary: bool) -> FluxResult<TargetFit> {
        let t = self.target(target)?;
        if include_auxiliary && !self.fluxes.nominal.has_auxiliary() {
            warn!(target = %t.name, "auxiliary column requested but not assembled; fitting without it");
        }
        let outcome = solve(
            &self.fluxes.nominal,
            &t.unoscillated,
            &self.oscillation,
            self.binning.energy(),
            &self.settings(lambda, include_auxiliary),
        )?;
        info!(
            target = %t.name,
            lambda,
            channels = self.fluxes.nominal.n_channels(),
            auxiliary = outcome.used_auxiliary,
            residual_norm = outcome.residual_norm,
            "nominal fit"
        );
        Ok(TargetFit {
            target: t.name.clone(),
            unoscillated: t.unoscillated.clone(),
            oscillation: (*self.oscillation).clone(),
            outcome,
        })
    }

    pub fn scan(
        &self,
        target: Option<&str>,
        lambdas: &[f64],
        include_auxiliary: bool,
    ) -> FluxResult<RegularizationScan> {
        let t = self.target(target)?;
        scan_regularization(
            &self.fluxes.nominal,
            &t.unoscillated,
            &self.oscillation,
            self.binning.energy(),
            &self.settings(0.0, include_auxiliary),
            lambdas,
        )
    }

    /// Ratios for every named shift, in declaration order.
    pub fn shift_ratios(&self, fit: &TargetFit) -> FluxResult<Vec<(String, ShiftRatios)>> {
        self.fluxes
            .shifts
            .par_iter()
            .map(|shift| -> FluxResult<_> {
                let fd = shift.flux.fd_for(&fit.target)?;
                let ratios = shift_ratios(fit, &shift.flux.design, fd)?;
                Ok((shift.name.clone(), ratios))
            })
            .collect()
    }

    /// Band for every universe set, in declaration order.
    pub fn universe_bands(&self, fit: &TargetFit) -> FluxResult<Vec<(String, UniverseBand)>> {
        self.fluxes
            .universes
            .iter()
            .map(|set| -> FluxResult<_> {
                let members = set
                    .members
                    .iter()
                    .map(|m| -> FluxResult<_> { Ok((&m.design, m.fd_for(&fit.target)?)) })
                    .collect::<FluxResult<Vec<_>>>()?;
                Ok((set.name.clone(), universe_band(fit, &members)?))
            })
            .collect()
    }
}

/// Stateful fitting session over one flux library.
pub struct FluxFitter {
    provider: Box<dyn FluxProvider>,
    sources: FluxSources,
    config: SessionConfig,
    state: FitSnapshot,
}

impl FluxFitter {
    pub fn new(provider: Box<dyn FluxProvider>, sources: FluxSources, config: SessionConfig) -> FluxResult<Self> {
        sources.validate()?;
        if let Some(region) = &config.fit_region {
            region.validate()?;
        }
        let energy = Binning::from_edges(sources.energy_edges.clone())?.coarsen(config.energy_rebin)?;
        let channels = Binning::from_edges(sources.channel_edges.clone())?.coarsen(config.channel_rebin)?;
        let binning = BinningContext::new(energy, channels);

        let oscillation = oscillation_profile(&config.oscillation, binning.energy())?;
        let region = config
            .fit_region
            .unwrap_or_else(|| FitRegion::covering(binning.energy()));

        let targets = sources
            .targets
            .iter()
            .map(|t| -> FluxResult<_> {
                Ok(TargetFlux {
                    name: t.name.clone(),
                    unoscillated: load_spectrum(provider.as_ref(), &t.fd, binning.energy())?,
                })
            })
            .collect::<FluxResult<Vec<_>>>()?;
        let fluxes = assemble(provider.as_ref(), &sources, &targets, &binning, config.use_auxiliary)?;

        info!(
            energy_bins = binning.energy().len(),
            channels = binning.channels().len(),
            targets = targets.len(),
            shifts = fluxes.shifts.len(),
            universes = fluxes.universes.len(),
            auxiliary = config.use_auxiliary,
            "flux fit session ready"
        );

        Ok(Self {
            provider,
            sources,
            config,
            state: FitSnapshot {
                binning,
                region,
                oscillation: Arc::new(oscillation),
                targets: Arc::new(targets),
                fluxes: Arc::new(fluxes),
            },
        })
    }

    pub fn sources(&self) -> &FluxSources {
        &self.sources
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn binning(&self) -> &BinningContext {
        &self.state.binning
    }

    pub fn region(&self) -> &FitRegion {
        &self.state.region
    }

    pub fn nominal_design(&self) -> &DesignMatrix {
        &self.state.fluxes.nominal
    }

    pub fn snapshot(&self) -> FitSnapshot {
        self.state.clone()
    }

    /// Narrow the off-axis channels to `[min, max]` of the full binning and
    /// rebuild every design matrix.
    pub fn narrow_channel_range(&mut self, min: f64, max: f64) -> FluxResult<ChannelWindow> {
        let binning = self.state.binning.with_channel_range(min, max)?;
        self.rebuild(binning)?;
        Ok(self.state.binning.window())
    }

    pub fn reset_channel_range(&mut self) -> FluxResult<()> {
        let mut binning = self.state.binning.clone();
        binning.reset_channels();
        self.rebuild(binning)
    }

    fn rebuild(&mut self, binning: BinningContext) -> FluxResult<()> {
        let fluxes = assemble(
            self.provider.as_ref(),
            &self.sources,
            &self.state.targets,
            &binning,
            self.config.use_auxiliary,
        )?;
        self.state.binning = binning;
        self.state.fluxes = Arc::new(fluxes);
        Ok(())
    }

    pub fn set_fit_region(&mut self, low: f64, high: f64) -> FluxResult<()> {
        self.state.region.set_bounds(low, high)?;
        debug!(low, high, "fit region updated");
        Ok(())
    }

    pub fn set_out_of_region_weights(&mut self, below: f64, above: f64) -> FluxResult<()> {
        self.state.region.set_out_of_region_weights(below, above)?;
        debug!(below, above, "out-of-region weights updated");
        Ok(())
    }

    pub fn fit(&self, target: Option<&str>, lambda: f64, include_auxiliary: bool) -> FluxResult<TargetFit> {
        self.state.fit(target, lambda, include_auxiliary)
    }

    pub fn scan(
        &self,
        target: Option<&str>,
        lambdas: &[f64],
        include_auxiliary: bool,
    ) -> FluxResult<RegularizationScan> {
        self.state.scan(target, lambdas, include_auxiliary)
    }

    pub fn shift_ratios(&self, fit: &TargetFit) -> FluxResult<Vec<(String, ShiftRatios)>> {
        self.state.shift_ratios(fit)
    }

    pub fn universe_bands(&self, fit: &TargetFit) -> FluxResult<Vec<(String, UniverseBand)>> {
        self.state.universe_bands(fit)
    }
}

/// Build the nominal, shift and universe design matrices on `binning`.
fn assemble(
    provider: &dyn FluxProvider,
    sources: &FluxSources,
    targets: &[TargetFlux],
    binning: &BinningContext,
    use_auxiliary: bool,
) -> FluxResult<AssembledFluxes> {
    let include_auxiliary = use_auxiliary && sources.auxiliary.is_some();
    if use_auxiliary && !include_auxiliary {
        warn!("auxiliary spectrum requested but the flux sources name none");
    }
    let nominal = assemble_design_matrix(provider, sources.nominal_source(), binning, include_auxiliary)?;

    let load_variant = |variant: &FluxVariant| -> FluxResult<VariantFlux> {
        // Variants without their own auxiliary spectrum reuse the nominal one.
        let mut source = variant.design_source();
        source.auxiliary = source.auxiliary.or(sources.auxiliary.as_deref());
        let design = assemble_design_matrix(provider, source, binning, include_auxiliary)?;
        let fd = targets
            .iter()
            .map(|t| -> FluxResult<_> {
                let id = variant.fd_for(&t.name)?;
                Ok((t.name.clone(), load_spectrum(provider, id, binning.energy())?))
            })
            .collect::<FluxResult<BTreeMap<_, _>>>()?;
        Ok(VariantFlux { design, fd })
    };

    let shifts = sources
        .shifts
        .par_iter()
        .map(|s| -> FluxResult<_> {
            Ok(NamedVariant {
                name: s.name.clone(),
                flux: load_variant(&s.flux)?,
            })
        })
        .collect::<FluxResult<Vec<_>>>()?;

    let universes = sources
        .universes
        .iter()
        .map(|u| -> FluxResult<_> {
            let central = load_variant(&u.central)?;
            let members = u
                .members
                .par_iter()
                .map(|m| -> FluxResult<_> { normalize_variant(&load_variant(m)?, &central, &nominal, targets) })
                .collect::<FluxResult<Vec<_>>>()?;
            Ok(UniverseSet {
                name: u.name.clone(),
                members,
            })
        })
        .collect::<FluxResult<Vec<_>>>()?;

    debug!(
        channels = nominal.n_channels(),
        shifts = shifts.len(),
        universes = universes.len(),
        "assembled fluxes"
    );
    Ok(AssembledFluxes {
        nominal,
        shifts,
        universes,
    })
}

/// `member / central × nominal`, for the design matrix and every FD spectrum.
fn normalize_variant(
    member: &VariantFlux,
    central: &VariantFlux,
    nominal: &DesignMatrix,
    targets: &[TargetFlux],
) -> FluxResult<VariantFlux> {
    let storage = normalize_to_nominal(member.design.storage(), central.design.storage(), nominal.storage())?;
    let design = nominal.with_storage(storage)?;
    let fd = targets
        .iter()
        .map(|t| -> FluxResult<_> {
            let v = normalize_spectrum_to_nominal(member.fd_for(&t.name)?, central.fd_for(&t.name)?, &t.unoscillated)?;
            Ok((t.name.clone(), v))
        })
        .collect::<FluxResult<BTreeMap<_, _>>>()?;
    Ok(VariantFlux { design, fd })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ShiftSource, TargetSource, UniverseSource};
    use crate::flux::{FluxLibrary, RawFlux};
    use crate::osc::OscillationModel;
    use nalgebra::DMatrix;

    const N_E: usize = 12;
    const N_C: usize = 8;

    fn energy_edges() -> Vec<f64> {
        (0..=N_E).map(|i| 0.5 + 0.5 * i as f64).collect()
    }

    fn channel_edges() -> Vec<f64> {
        (0..=N_C).map(|i| i as f64 - 0.5).collect()
    }

    fn nd_map(scale: f64) -> DMatrix<f64> {
        DMatrix::from_fn(N_E, N_C, |i, j| {
            let e = 0.75 + 0.5 * i as f64;
            let peak = 4.0 - 0.35 * j as f64;
            scale * ((-(e - peak).powi(2) / 1.5).exp() + 0.05)
        })
    }

    fn fd(scale: f64) -> DVector<f64> {
        DVector::from_fn(N_E, |i, _| {
            let e = 0.75 + 0.5 * i as f64;
            scale * ((-(e - 2.5).powi(2) / 2.0).exp() + 0.05)
        })
    }

    fn variant(suffix: &str) -> FluxVariant {
        FluxVariant {
            nd: format!("nd_{suffix}"),
            auxiliary: None,
            fd: [("fhc".to_string(), format!("fd_{suffix}"))].into_iter().collect(),
        }
    }

    fn library() -> (FluxLibrary, FluxSources) {
        let mut lib = FluxLibrary::new();
        for (suffix, scale) in [("nom", 1.0), ("up", 1.1), ("cv", 2.0), ("u0", 2.2), ("u1", 1.8)] {
            lib.insert(format!("nd_{suffix}"), RawFlux::map(energy_edges(), channel_edges(), &nd_map(scale)));
            lib.insert(format!("fd_{suffix}"), RawFlux::spectrum(energy_edges(), &fd(scale)));
        }
        lib.insert("aux", RawFlux::spectrum(energy_edges(), &fd(0.3)));
        let sources = FluxSources {
            energy_edges: energy_edges(),
            channel_edges: channel_edges(),
            nd: "nd_nom".into(),
            auxiliary: Some("aux".into()),
            targets: vec![TargetSource {
                name: "fhc".into(),
                fd: "fd_nom".into(),
            }],
            shifts: vec![ShiftSource {
                name: "horn_up".into(),
                flux: variant("up"),
            }],
            universes: vec![UniverseSource {
                name: "ppfx".into(),
                central: variant("cv"),
                members: vec![variant("u0"), variant("u1")],
            }],
        };
        (lib, sources)
    }

    fn session(use_auxiliary: bool) -> FluxFitter {
        let (lib, sources) = library();
        let config = SessionConfig {
            use_auxiliary,
            oscillation: OscillationModel::None,
            ..SessionConfig::default()
        };
        FluxFitter::new(Box::new(lib), sources, config).unwrap()
    }

    #[test]
    fn narrowing_rebuilds_every_design() {
        let mut s = session(true);
        assert_eq!(s.nominal_design().n_channels(), N_C);
        let w = s.narrow_channel_range(2.0, 5.0).unwrap();
        assert_eq!(w.len(), 4);
        let snap = s.snapshot();
        assert_eq!(snap.fluxes().nominal.n_channels(), 4);
        assert_eq!(snap.fluxes().shifts[0].flux.design.n_channels(), 4);
        assert_eq!(snap.fluxes().universes[0].members[1].design.n_channels(), 4);
        assert!(snap.fluxes().shifts[0].flux.design.has_auxiliary());

        s.reset_channel_range().unwrap();
        assert_eq!(s.nominal_design().n_channels(), N_C);
    }

    #[test]
    fn failed_updates_keep_previous_state() {
        let mut s = session(false);
        s.narrow_channel_range(1.0, 6.0).unwrap();
        let before = s.binning().clone();
        assert!(s.narrow_channel_range(6.0, 1.0).is_err());
        assert!(s.narrow_channel_range(-10.0, 1.0).is_err());
        assert_eq!(s.binning(), &before);
        assert_eq!(s.nominal_design().n_channels(), 6);

        let region = *s.region();
        assert!(matches!(s.set_fit_region(3.0, 1.0), Err(FluxFitError::InvalidRange(_))));
        assert!(s.set_out_of_region_weights(f64::NAN, 0.0).is_err());
        assert_eq!(s.region(), &region);
    }

    #[test]
    fn configured_region_is_validated() {
        let (lib, sources) = library();
        let config = SessionConfig {
            fit_region: Some(FitRegion { low: 5.0, high: 1.0, below_weight: 1.0, above_weight: 1.0 }),
            ..SessionConfig::default()
        };
        assert!(matches!(
            FluxFitter::new(Box::new(lib.clone()), sources.clone(), config),
            Err(FluxFitError::InvalidRange(_))
        ));

        let config = SessionConfig {
            fit_region: Some(FitRegion { low: 1.0, high: 5.0, below_weight: -1.0, above_weight: 0.0 }),
            ..SessionConfig::default()
        };
        assert!(matches!(
            FluxFitter::new(Box::new(lib.clone()), sources.clone(), config),
            Err(FluxFitError::InvalidInput(_))
        ));

        let config = SessionConfig {
            fit_region: Some(FitRegion::new(1.0, 5.0).unwrap()),
            ..SessionConfig::default()
        };
        let s = FluxFitter::new(Box::new(lib), sources, config).unwrap();
        assert_eq!(s.region().high, 5.0);
    }

    #[test]
    fn snapshots_are_isolated_from_later_updates() {
        let mut s = session(false);
        let snap = s.snapshot();
        s.set_fit_region(1.0, 3.0).unwrap();
        s.narrow_channel_range(0.0, 3.0).unwrap();
        assert_eq!(snap.fluxes().nominal.n_channels(), N_C);
        assert_eq!(snap.region().low, 0.5);
        assert_eq!(s.region().low, 1.0);
    }

    #[test]
    fn fit_and_systematics_share_one_snapshot() {
        let s = session(true);
        let with_aux = s.fit(None, 0.05, true).unwrap();
        assert!(with_aux.outcome.used_auxiliary);
        assert_eq!(with_aux.outcome.coefficients.len(), N_C + 1);
        assert_eq!(s.shift_ratios(&with_aux).unwrap().len(), 1);

        let fit = s.fit(None, 0.05, false).unwrap();
        assert_eq!(fit.target, "fhc");
        assert_eq!(fit.outcome.coefficients.len(), N_C);

        let shifts = s.shift_ratios(&fit).unwrap();
        assert_eq!(shifts[0].0, "horn_up");
        // ND and FD both scaled by 1.1: each ratio is 10% of the nominal one.
        let r = &shifts[0].1;
        let expected_nd = fit.outcome.predicted.component_div(&fit.unoscillated) * 0.1;
        let expected_fd = fit.outcome.target.component_div(&fit.unoscillated) * 0.1;
        assert!((&r.nd - &expected_nd).amax() < 1e-9);
        assert!((&r.fd - &expected_fd).amax() < 1e-9);
        assert!((&r.both - (expected_nd - expected_fd)).amax() < 1e-9);

        let bands = s.universe_bands(&fit).unwrap();
        assert_eq!(bands[0].0, "ppfx");
        let band = &bands[0].1;
        assert_eq!(band.members, 2);
        // Members are ±10% of the CV, scaled onto the nominal flux.
        assert!(band.both.mean.amax() < 1e-9);
        assert!(band.nd.mean.amax() < 1e-9);
        assert!(band.nd.high.iter().zip(band.nd.low.iter()).all(|(h, l)| h >= l));
    }

    #[test]
    fn unknown_target_is_rejected() {
        let s = session(false);
        assert!(matches!(s.fit(Some("rhc"), 0.1, false), Err(FluxFitError::InvalidInput(_))));
    }

    #[test]
    fn rebin_factors_apply_at_session_start() {
        let (lib, sources) = library();
        let config = SessionConfig {
            energy_rebin: 2,
            channel_rebin: 4,
            oscillation: OscillationModel::None,
            ..SessionConfig::default()
        };
        let s = FluxFitter::new(Box::new(lib), sources.clone(), config).unwrap();
        assert_eq!(s.binning().energy().len(), N_E / 2);
        assert_eq!(s.nominal_design().n_channels(), N_C / 4);

        let (lib, _) = library();
        let bad = SessionConfig {
            channel_rebin: 3,
            ..SessionConfig::default()
        };
        assert!(matches!(
            FluxFitter::new(Box::new(lib), sources, bad),
            Err(FluxFitError::ShapeMismatch(_))
        ));
    }
}
