//! Flux retrieval and design-matrix assembly.
//!
//! - [`FluxProvider`]: returns spectra by id, already rebinned onto the
//!   requested edges
//! - [`FluxLibrary`]: in-memory provider over raw histograms
//! - [`DesignMatrix`] / [`assemble_design_matrix`]: ND channel spectra (plus the
//!   optional auxiliary spectrum) as matrix columns on the active binning

pub mod assembly;
pub mod provider;

pub use assembly::*;
pub use provider::*;
