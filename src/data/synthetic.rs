//! Seeded synthetic flux library.
//!
//! Produces a toy ND off-axis flux map whose peak energy falls with off-axis
//! position, two FD targets, an auxiliary high-energy spectrum, a few named
//! systematic shifts and a set of smooth random universes. Spectra are stored
//! at twice the analysis energy resolution so every load goes through the
//! rebinner.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{FluxSources, FluxVariant, ShiftSource, TargetSource, UniverseSource};
use crate::error::{FluxFitError, FluxResult};
use crate::flux::{FluxLibrary, RawFlux};
use crate::io::FluxLibraryFile;

const TARGETS: [&str; 2] = ["fhc", "rhc"];

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticOptions {
    /// Analysis energy bins (0.2 GeV wide, starting at 0.5 GeV).
    pub energy_bins: usize,
    /// Off-axis channels (1 m wide, centred on 0, 1, ...).
    pub channels: usize,
    /// Relative per-bin statistical noise on every spectrum.
    pub noise: f64,
    pub universes: usize,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            energy_bins: 40,
            channels: 34,
            noise: 0.01,
            universes: 10,
        }
    }
}

/// Smooth multiplicative distortion `1 + a + b (E - 3) / 3`.
#[derive(Debug, Clone, Copy)]
struct Tilt {
    norm: f64,
    slope: f64,
}

impl Tilt {
    const NONE: Tilt = Tilt { norm: 0.0, slope: 0.0 };

    fn at(self, e: f64) -> f64 {
        (1.0 + self.norm + self.slope * (e - 3.0) / 3.0).max(0.0)
    }
}

struct Generator {
    rng: StdRng,
    noise: Normal<f64>,
    fine_energy: Vec<f64>,
    channel_edges: Vec<f64>,
}

impl Generator {
    fn fine_centers(&self) -> Vec<f64> {
        self.fine_energy.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
    }

    fn smear(&mut self, v: f64) -> f64 {
        (v * (1.0 + self.noise.sample(&mut self.rng))).max(0.0)
    }

    fn nd_map(&mut self, nd: Tilt, peak_shift: f64) -> RawFlux {
        let energies = self.fine_centers();
        let n_c = self.channel_edges.len() - 1;
        let mut m = DMatrix::zeros(energies.len(), n_c);
        for j in 0..n_c {
            for (i, &e) in energies.iter().enumerate() {
                m[(i, j)] = self.smear(nd.at(e) * nd_flux(e, j as f64, peak_shift));
            }
        }
        RawFlux::map(self.fine_energy.clone(), self.channel_edges.clone(), &m)
    }

    fn spectrum(&mut self, tilt: Tilt, shape: impl Fn(f64) -> f64) -> RawFlux {
        let energies = self.fine_centers();
        let v = DVector::from_iterator(energies.len(), energies.iter().map(|&e| tilt.at(e) * shape(e)))
            .map(|x| self.smear(x));
        RawFlux::spectrum(self.fine_energy.clone(), &v)
    }
}

/// ND flux at energy `e` (GeV) and off-axis position `x` (m).
fn nd_flux(e: f64, x: f64, peak_shift: f64) -> f64 {
    let peak = 2.8 / (1.0 + 0.004 * x * x).sqrt() + peak_shift;
    let width = 0.25 * peak + 0.3;
    let amplitude = 1.0 / (1.0 + 0.02 * x * x);
    amplitude * ((-(e - peak).powi(2) / (2.0 * width * width)).exp() + 0.03 * (-e / 3.0).exp())
}

fn fd_flux(target: &str, e: f64) -> f64 {
    let (peak, width, scale) = match target {
        "rhc" => (2.4, 0.9, 0.4),
        _ => (2.6, 1.0, 1.0),
    };
    scale * ((-(e - peak).powi(2) / (2.0 * width * width)).exp() + 0.04 * (-e / 3.0).exp())
}

fn auxiliary_flux(e: f64) -> f64 {
    0.2 * (-(e - 5.0).powi(2) / 4.5).exp()
}

/// Build the library with sources laid out for a [`crate::fit::FluxFitter`].
pub fn synthetic_library(seed: u64, options: &SyntheticOptions) -> FluxResult<FluxLibraryFile> {
    if options.energy_bins == 0 || options.channels < 2 {
        return Err(FluxFitError::input("synthetic library needs >= 1 energy bin and >= 2 channels"));
    }
    if !(options.noise.is_finite() && options.noise >= 0.0) {
        return Err(FluxFitError::input("synthetic noise must be finite and >= 0"));
    }
    let noise = Normal::new(0.0, options.noise)
        .map_err(|e| FluxFitError::input(format!("noise distribution error: {e}")))?;

    let energy_edges: Vec<f64> = (0..=options.energy_bins).map(|i| 0.5 + 0.2 * i as f64).collect();
    let fine_energy: Vec<f64> = (0..=2 * options.energy_bins).map(|i| 0.5 + 0.1 * i as f64).collect();
    let channel_edges: Vec<f64> = (0..=options.channels).map(|j| j as f64 - 0.5).collect();

    let mut generator = Generator {
        rng: StdRng::seed_from_u64(seed),
        noise,
        fine_energy,
        channel_edges: channel_edges.clone(),
    };
    let mut spectra = FluxLibrary::new();

    // Nominal.
    spectra.insert("nd_nominal", generator.nd_map(Tilt::NONE, 0.0));
    spectra.insert("aux_nominal", generator.spectrum(Tilt::NONE, auxiliary_flux));
    for t in TARGETS {
        spectra.insert(format!("fd_{t}_nominal"), generator.spectrum(Tilt::NONE, |e| fd_flux(t, e)));
    }

    // Named shifts: (name, ND tilt, FD tilt, ND peak shift).
    let shift_defs = [
        ("horn_current_p1", Tilt { norm: 0.01, slope: 0.02 }, Tilt { norm: 0.012, slope: 0.015 }, 0.02),
        ("target_density_p1", Tilt { norm: -0.02, slope: 0.0 }, Tilt { norm: -0.018, slope: 0.0 }, 0.0),
        ("beam_alignment_p1", Tilt { norm: 0.0, slope: -0.01 }, Tilt::NONE, -0.03),
    ];
    let mut shifts = Vec::with_capacity(shift_defs.len());
    for (name, nd, fd, peak_shift) in shift_defs {
        spectra.insert(format!("nd_{name}"), generator.nd_map(nd, peak_shift));
        shifts.push(ShiftSource {
            name: name.to_string(),
            flux: insert_fd(&mut spectra, &mut generator, name, fd),
        });
    }

    // Hadron-production universes around a slightly tilted central value.
    let mut universes = Vec::new();
    if options.universes > 0 {
        let cv_tilt = Tilt { norm: 0.03, slope: -0.02 };
        spectra.insert("nd_ppfx_cv", generator.nd_map(cv_tilt, 0.0));
        let central = insert_fd(&mut spectra, &mut generator, "ppfx_cv", cv_tilt);

        let throw = Normal::new(0.0, 0.05)
            .map_err(|e| FluxFitError::input(format!("universe distribution error: {e}")))?;
        let mut members = Vec::with_capacity(options.universes);
        for k in 0..options.universes {
            let tilt = Tilt {
                norm: cv_tilt.norm + throw.sample(&mut generator.rng),
                slope: cv_tilt.slope + throw.sample(&mut generator.rng),
            };
            let name = format!("ppfx_{k:03}");
            spectra.insert(format!("nd_{name}"), generator.nd_map(tilt, 0.0));
            members.push(insert_fd(&mut spectra, &mut generator, &name, tilt));
        }
        universes.push(UniverseSource {
            name: "ppfx".to_string(),
            central,
            members,
        });
    }

    let sources = FluxSources {
        energy_edges,
        channel_edges,
        nd: "nd_nominal".to_string(),
        auxiliary: Some("aux_nominal".to_string()),
        targets: TARGETS
            .iter()
            .map(|t| TargetSource {
                name: t.to_string(),
                fd: format!("fd_{t}_nominal"),
            })
            .collect(),
        shifts,
        universes,
    };
    Ok(FluxLibraryFile { sources, spectra })
}

/// Insert one FD spectrum per target for `name` and return its variant layout.
fn insert_fd(spectra: &mut FluxLibrary, generator: &mut Generator, name: &str, tilt: Tilt) -> FluxVariant {
    let mut fd = BTreeMap::new();
    for t in TARGETS {
        let id = format!("fd_{t}_{name}");
        spectra.insert(id.clone(), generator.spectrum(tilt, |e| fd_flux(t, e)));
        fd.insert(t.to_string(), id);
    }
    FluxVariant {
        nd: format!("nd_{name}"),
        auxiliary: None,
        fd,
    }
}
