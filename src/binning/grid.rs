//! One-dimensional bin grids.

use nalgebra::DVector;

use crate::error::{FluxFitError, FluxResult};
use crate::math::{average_groups, validate_edges};

/// Ordered bin edges with their centers.
///
/// Invariant: edges are strictly increasing and `edges.len() == centers.len() + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Binning {
    edges: Vec<f64>,
    centers: Vec<f64>,
}

/// Energy axis (GeV).
pub type EnergyBinning = Binning;

/// Off-axis lateral position axis (m); one bin per ND measurement channel.
pub type ChannelBinning = Binning;

impl Binning {
    /// Build from edges; centers are the interval midpoints.
    pub fn from_edges(edges: Vec<f64>) -> FluxResult<Self> {
        validate_edges(&edges)?;
        let centers = edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
        Ok(Self { edges, centers })
    }

    /// Build from explicit edges and centers.
    ///
    /// Each center must lie inside its own bin.
    pub fn from_parts(edges: Vec<f64>, centers: Vec<f64>) -> FluxResult<Self> {
        validate_edges(&edges)?;
        if edges.len() != centers.len() + 1 {
            return Err(FluxFitError::shape(format!(
                "{} edges do not match {} centers",
                edges.len(),
                centers.len()
            )));
        }
        for (i, (&c, w)) in centers.iter().zip(edges.windows(2)).enumerate() {
            if !(c.is_finite() && w[0] <= c && c <= w[1]) {
                return Err(FluxFitError::input(format!(
                    "center {i} = {c} lies outside its bin [{}, {}]",
                    w[0], w[1]
                )));
            }
        }
        Ok(Self { edges, centers })
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn centers(&self) -> &[f64] {
        &self.centers
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.centers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    /// `(first edge, last edge)`.
    pub fn span(&self) -> (f64, f64) {
        (self.edges[0], self.edges[self.edges.len() - 1])
    }

    /// Merge every `factor` adjacent bins.
    ///
    /// Centers are group-averaged and every `factor`-th edge is kept, so the
    /// bin count must be divisible by `factor`.
    pub fn coarsen(&self, factor: usize) -> FluxResult<Self> {
        if factor == 0 {
            return Err(FluxFitError::input("rebin factor must be >= 1"));
        }
        if factor == 1 {
            return Ok(self.clone());
        }
        if self.len() % factor != 0 {
            return Err(FluxFitError::shape(format!(
                "{} bins cannot be merged in groups of {factor}",
                self.len()
            )));
        }
        let centers = average_groups(&DVector::from_column_slice(&self.centers), factor)?
            .iter()
            .copied()
            .collect();
        let edges = self.edges.iter().step_by(factor).copied().collect();
        Ok(Self { edges, centers })
    }

    /// Sub-binning made of bins `start..end`.
    pub(crate) fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            edges: self.edges[start..=end].to_vec(),
            centers: self.centers[start..end].to_vec(),
        }
    }
}
