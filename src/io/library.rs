//! Read/write flux library JSON files.
//!
//! A flux library file holds the source layout (`domain::FluxSources`) next to
//! the raw histograms it refers to:
//!
//! ```json
//! { "sources": { "energy_edges": [...], "nd": "nd_nominal", ... },
//!   "spectra": { "nd_nominal": { "energy_edges": [...], "channel_edges": [...], "values": [...] } } }
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::FluxSources;
use crate::error::{FluxFitError, FluxResult};
use crate::flux::FluxLibrary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxLibraryFile {
    pub sources: FluxSources,
    pub spectra: FluxLibrary,
}

impl FluxLibraryFile {
    /// Every spectrum id named by the sources must be present.
    pub fn validate(&self) -> FluxResult<()> {
        self.sources.validate()?;
        let s = &self.sources;
        let variants = s
            .shifts
            .iter()
            .map(|sh| &sh.flux)
            .chain(s.universes.iter().flat_map(|u| std::iter::once(&u.central).chain(u.members.iter())));
        let ids = std::iter::once(s.nd.as_str())
            .chain(s.auxiliary.as_deref())
            .chain(s.targets.iter().map(|t| t.fd.as_str()))
            .chain(variants.flat_map(|v| {
                std::iter::once(v.nd.as_str())
                    .chain(v.auxiliary.as_deref())
                    .chain(v.fd.values().map(String::as_str))
            }));
        for id in ids {
            self.spectra.get(id)?;
        }
        Ok(())
    }
}

/// Read and validate a flux library file.
pub fn read_flux_library(path: &Path) -> FluxResult<FluxLibraryFile> {
    let file = File::open(path)
        .map_err(|e| FluxFitError::Io(format!("failed to open '{}': {e}", path.display())))?;
    let library: FluxLibraryFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| FluxFitError::Io(format!("invalid flux library '{}': {e}", path.display())))?;
    library.validate()?;
    info!(path = %path.display(), spectra = library.spectra.len(), "loaded flux library");
    Ok(library)
}

/// Write a flux library file (pretty-printed JSON).
pub fn write_flux_library(path: &Path, library: &FluxLibraryFile) -> FluxResult<()> {
    let file = File::create(path)
        .map_err(|e| FluxFitError::Io(format!("failed to create '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(file), library)
        .map_err(|e| FluxFitError::Io(format!("failed to write '{}': {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SyntheticOptions, synthetic_library};

    #[test]
    fn library_file_round_trips_through_disk() {
        let lib = synthetic_library(7, &SyntheticOptions::default()).unwrap();
        let path = std::env::temp_dir().join(format!("prism-flux-{}.json", std::process::id()));
        write_flux_library(&path, &lib).unwrap();
        let back = read_flux_library(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back.sources, lib.sources);
        assert_eq!(back.spectra.len(), lib.spectra.len());
    }

    #[test]
    fn missing_file_and_dangling_ids_are_reported() {
        let err = read_flux_library(Path::new("/nonexistent/prism-flux.json")).unwrap_err();
        assert!(matches!(err, FluxFitError::Io(_)));

        let mut lib = synthetic_library(7, &SyntheticOptions::default()).unwrap();
        lib.sources.nd = "not_there".into();
        assert!(matches!(lib.validate(), Err(FluxFitError::UnknownSpectrum(_))));
    }
}
