//! Shared "fit pipeline" logic used by every subcommand.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! library load -> session setup -> channel narrowing / fit region -> fit
//!
//! The commands can then focus on presentation.

use std::path::PathBuf;

use tracing::info;

use crate::data::{SyntheticOptions, synthetic_library};
use crate::domain::RunConfig;
use crate::error::AppError;
use crate::fit::{FluxFitter, TargetFit};
use crate::io::{FluxLibraryFile, read_flux_library};

/// Environment variable naming the default flux library file.
pub const LIBRARY_ENV: &str = "PRISM_FLUX_LIBRARY";

/// A configured session plus its nominal fit.
pub struct RunOutput {
    pub session: FluxFitter,
    pub fit: TargetFit,
}

/// Explicit path, then `PRISM_FLUX_LIBRARY` (`.env` honoured), else `None`.
pub fn resolve_library_path(explicit: Option<&PathBuf>) -> Option<PathBuf> {
    explicit.cloned().or_else(|| {
        dotenvy::dotenv().ok();
        std::env::var_os(LIBRARY_ENV).map(PathBuf::from)
    })
}

/// Read the configured library, or generate the synthetic one.
pub fn load_library(config: &RunConfig) -> Result<FluxLibraryFile, AppError> {
    match &config.library {
        Some(path) => Ok(read_flux_library(path)?),
        None => {
            info!(seed = config.seed, "using synthetic flux library");
            Ok(synthetic_library(config.seed, &SyntheticOptions::default())?)
        }
    }
}

/// Build a session and apply the channel range and fit region from `config`.
pub fn build_session(config: &RunConfig, library: FluxLibraryFile) -> Result<FluxFitter, AppError> {
    let mut session = FluxFitter::new(Box::new(library.spectra), library.sources, config.session.clone())?;
    if let Some((min, max)) = config.channel_range {
        session.narrow_channel_range(min, max)?;
    }
    if let Some((low, high)) = config.fit_region {
        session.set_fit_region(low, high)?;
    }
    let (below, above) = config.out_of_region_weights;
    session.set_out_of_region_weights(below, above)?;
    Ok(session)
}

/// Execute the full pipeline and return the nominal fit.
pub fn run_fit(config: &RunConfig) -> Result<RunOutput, AppError> {
    let library = load_library(config)?;
    run_fit_with_library(config, library)
}

/// Execute the pipeline on an already loaded library.
pub fn run_fit_with_library(config: &RunConfig, library: FluxLibraryFile) -> Result<RunOutput, AppError> {
    let session = build_session(config, library)?;
    let fit = session.fit(config.target.as_deref(), config.lambda, config.session.use_auxiliary)?;
    Ok(RunOutput { session, fit })
}
