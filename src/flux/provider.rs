//! Flux provider interface and the in-memory flux library.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::binning::Binning;
use crate::error::{FluxFitError, FluxResult};
use crate::math::{Axis, AxisRebin, EdgeSide, average_by_bin_edge, average_by_bin_edges_2d};

/// A loaded flux: energy spectrum (1-D) or energy × off-axis map (2-D).
#[derive(Debug, Clone, PartialEq)]
pub enum FluxArray {
    Spectrum(DVector<f64>),
    Map(DMatrix<f64>),
}

impl FluxArray {
    pub fn into_spectrum(self, id: &str) -> FluxResult<DVector<f64>> {
        match self {
            FluxArray::Spectrum(v) => Ok(v),
            FluxArray::Map(m) => Err(FluxFitError::shape(format!(
                "spectrum '{id}' is a {}x{} map, expected a 1-D spectrum",
                m.nrows(),
                m.ncols()
            ))),
        }
    }

    pub fn into_map(self, id: &str) -> FluxResult<DMatrix<f64>> {
        match self {
            FluxArray::Map(m) => Ok(m),
            FluxArray::Spectrum(v) => Err(FluxFitError::shape(format!(
                "spectrum '{id}' is 1-D with {} bins, expected an energy x off-axis map",
                v.len()
            ))),
        }
    }
}

/// Source of raw spectra, identified by opaque keys.
///
/// Implementations rebin onto `energy_edges` (and `channel_edges` for 2-D
/// maps) before returning.
pub trait FluxProvider: Sync {
    fn load(&self, id: &str, energy_edges: &[f64], channel_edges: Option<&[f64]>) -> FluxResult<FluxArray>;
}

/// A histogram as stored: fine-binned edges plus row-major values
/// (`energy × channel` for maps).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFlux {
    pub energy_edges: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_edges: Option<Vec<f64>>,
    pub values: Vec<f64>,
}

impl RawFlux {
    pub fn spectrum(energy_edges: Vec<f64>, values: &DVector<f64>) -> Self {
        Self {
            energy_edges,
            channel_edges: None,
            values: values.iter().copied().collect(),
        }
    }

    pub fn map(energy_edges: Vec<f64>, channel_edges: Vec<f64>, values: &DMatrix<f64>) -> Self {
        // nalgebra is column-major; store row-major.
        let values = values.transpose().iter().copied().collect();
        Self {
            energy_edges,
            channel_edges: Some(channel_edges),
            values,
        }
    }

    pub fn energy_binning(&self) -> FluxResult<Binning> {
        Binning::from_edges(self.energy_edges.clone())
    }

    pub fn channel_binning(&self) -> FluxResult<Option<Binning>> {
        self.channel_edges.clone().map(Binning::from_edges).transpose()
    }

    /// Values at the stored (fine) binning.
    pub fn to_array(&self) -> FluxResult<FluxArray> {
        let n_e = self.energy_binning()?.len();
        match self.channel_binning()? {
            None => {
                if self.values.len() != n_e {
                    return Err(FluxFitError::shape(format!(
                        "spectrum has {} values for {n_e} energy bins",
                        self.values.len()
                    )));
                }
                Ok(FluxArray::Spectrum(DVector::from_column_slice(&self.values)))
            }
            Some(channels) => {
                let n_c = channels.len();
                if self.values.len() != n_e * n_c {
                    return Err(FluxFitError::shape(format!(
                        "map has {} values for {n_e}x{n_c} bins",
                        self.values.len()
                    )));
                }
                Ok(FluxArray::Map(DMatrix::from_row_slice(n_e, n_c, &self.values)))
            }
        }
    }

    /// Rebin onto the requested edges (energy first, then channels).
    pub fn rebin(&self, energy_edges: &[f64], channel_edges: Option<&[f64]>) -> FluxResult<FluxArray> {
        let energy = self.energy_binning()?;
        match self.to_array()? {
            FluxArray::Spectrum(v) => Ok(FluxArray::Spectrum(average_by_bin_edge(
                &v,
                energy.centers(),
                energy_edges,
                EdgeSide::Left,
            )?)),
            FluxArray::Map(m) => {
                let channels = self.channel_binning()?;
                let mut steps = vec![AxisRebin {
                    axis: Axis::Rows,
                    centers: energy.centers(),
                    edges: energy_edges,
                }];
                if let (Some(channels), Some(edges)) = (channels.as_ref(), channel_edges) {
                    steps.push(AxisRebin {
                        axis: Axis::Columns,
                        centers: channels.centers(),
                        edges,
                    });
                }
                Ok(FluxArray::Map(average_by_bin_edges_2d(&m, &steps, EdgeSide::Left)?))
            }
        }
    }
}

/// In-memory [`FluxProvider`] keyed by spectrum id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FluxLibrary {
    spectra: BTreeMap<String, RawFlux>,
}

impl FluxLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, flux: RawFlux) {
        self.spectra.insert(id.into(), flux);
    }

    pub fn get(&self, id: &str) -> FluxResult<&RawFlux> {
        self.spectra
            .get(id)
            .ok_or_else(|| FluxFitError::UnknownSpectrum(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }
}

impl FluxProvider for FluxLibrary {
    fn load(&self, id: &str, energy_edges: &[f64], channel_edges: Option<&[f64]>) -> FluxResult<FluxArray> {
        self.get(id)?.rebin(energy_edges, channel_edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> FluxLibrary {
        let mut lib = FluxLibrary::new();
        let fine = DMatrix::from_row_slice(4, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        lib.insert("nd", RawFlux::map(vec![0.0, 1.0, 2.0, 3.0, 4.0], vec![0.0, 1.0, 2.0], &fine));
        lib.insert(
            "fd",
            RawFlux::spectrum(vec![0.0, 1.0, 2.0, 3.0, 4.0], &DVector::from_row_slice(&[1.0, 1.0, 3.0, 3.0])),
        );
        lib
    }

    #[test]
    fn map_round_trips_row_major_storage() {
        let lib = library();
        let FluxArray::Map(m) = lib.get("nd").unwrap().to_array().unwrap() else {
            panic!("expected a map");
        };
        assert_eq!(m[(0, 1)], 2.0);
        assert_eq!(m[(3, 0)], 7.0);
    }

    #[test]
    fn load_rebins_both_axes() {
        let lib = library();
        let m = lib
            .load("nd", &[0.0, 2.0, 4.0], Some(&[0.0, 2.0]))
            .unwrap()
            .into_map("nd")
            .unwrap();
        assert_eq!(m.shape(), (2, 1));
        assert!((m[(0, 0)] - 2.5).abs() < 1e-12);
        assert!((m[(1, 0)] - 6.5).abs() < 1e-12);

        let v = lib.load("fd", &[0.0, 2.0, 4.0], None).unwrap().into_spectrum("fd").unwrap();
        assert_eq!(v.as_slice(), &[1.0, 3.0]);
    }

    #[test]
    fn unknown_and_mistyped_spectra_fail() {
        let lib = library();
        assert!(matches!(
            lib.load("missing", &[0.0, 4.0], None),
            Err(FluxFitError::UnknownSpectrum(_))
        ));
        let err = lib.load("fd", &[0.0, 4.0], None).unwrap().into_map("fd").unwrap_err();
        assert!(matches!(err, FluxFitError::ShapeMismatch(_)));
    }
}
