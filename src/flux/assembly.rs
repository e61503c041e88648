//! Design-matrix assembly.
//!
//! The design matrix has one row per energy bin and one column per ND off-axis
//! channel. When an auxiliary spectrum is assembled it is stored as one extra
//! trailing column; the column stays in storage and solves choose whether to
//! use it, so fits with and without it run on the same matrix.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::binning::{BinningContext, EnergyBinning};
use crate::error::{FluxFitError, FluxResult};
use crate::flux::FluxProvider;

/// ND channel spectra as columns, plus an optional trailing auxiliary column.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    storage: DMatrix<f64>,
    channels: usize,
    auxiliary: bool,
}

impl DesignMatrix {
    /// Build from an `energy × channel` map and an optional auxiliary spectrum.
    pub fn new(nd: DMatrix<f64>, auxiliary: Option<DVector<f64>>) -> FluxResult<Self> {
        if nd.nrows() == 0 || nd.ncols() == 0 {
            return Err(FluxFitError::shape("design matrix needs at least one energy bin and one channel"));
        }
        let channels = nd.ncols();
        let has_auxiliary = auxiliary.is_some();
        let storage = match auxiliary {
            None => nd,
            Some(aux) => {
                if aux.len() != nd.nrows() {
                    return Err(FluxFitError::shape(format!(
                        "auxiliary spectrum has {} bins but the ND map has {} energy bins",
                        aux.len(),
                        nd.nrows()
                    )));
                }
                let mut m = nd.insert_column(channels, 0.0);
                m.set_column(channels, &aux);
                m
            }
        };
        if storage.iter().any(|v| !v.is_finite()) {
            return Err(FluxFitError::input("design matrix contains non-finite values"));
        }
        Ok(Self {
            storage,
            channels,
            auxiliary: has_auxiliary,
        })
    }

    pub fn n_energy(&self) -> usize {
        self.storage.nrows()
    }

    /// Number of ND off-axis channels (auxiliary column excluded).
    pub fn n_channels(&self) -> usize {
        self.channels
    }

    pub fn has_auxiliary(&self) -> bool {
        self.auxiliary
    }

    /// Whether a solve asking for the auxiliary column actually gets one.
    pub fn uses_auxiliary(&self, requested: bool) -> bool {
        requested && self.auxiliary
    }

    /// Number of columns a solve uses.
    pub fn n_columns(&self, include_auxiliary: bool) -> usize {
        self.channels + usize::from(self.uses_auxiliary(include_auxiliary))
    }

    /// The columns a solve uses, as an owned matrix.
    pub fn columns(&self, include_auxiliary: bool) -> DMatrix<f64> {
        self.storage
            .columns(0, self.n_columns(include_auxiliary))
            .into_owned()
    }

    /// Full storage, auxiliary column included when present.
    pub fn storage(&self) -> &DMatrix<f64> {
        &self.storage
    }

    /// Same layout, new values (used for normalised universes).
    pub(crate) fn with_storage(&self, storage: DMatrix<f64>) -> FluxResult<Self> {
        if storage.shape() != self.storage.shape() {
            return Err(FluxFitError::shape(format!(
                "replacement storage is {:?}, design matrix is {:?}",
                storage.shape(),
                self.storage.shape()
            )));
        }
        Ok(Self {
            storage,
            channels: self.channels,
            auxiliary: self.auxiliary,
        })
    }
}

/// Ids of the spectra that make up one design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesignSource<'a> {
    pub nd: &'a str,
    pub auxiliary: Option<&'a str>,
}

/// Load the ND map (and auxiliary spectrum) on the active binning.
///
/// With `include_auxiliary` the source must name an auxiliary spectrum.
pub fn assemble_design_matrix(
    provider: &dyn FluxProvider,
    source: DesignSource<'_>,
    binning: &BinningContext,
    include_auxiliary: bool,
) -> FluxResult<DesignMatrix> {
    let energy_edges = binning.energy().edges();
    let channel_edges = binning.channels().edges();

    let nd = provider
        .load(source.nd, energy_edges, Some(channel_edges))?
        .into_map(source.nd)?;
    if nd.shape() != (binning.energy().len(), binning.channels().len()) {
        return Err(FluxFitError::shape(format!(
            "provider returned a {}x{} map for '{}', binning is {}x{}",
            nd.nrows(),
            nd.ncols(),
            source.nd,
            binning.energy().len(),
            binning.channels().len()
        )));
    }

    let auxiliary = if include_auxiliary {
        let id = source.auxiliary.ok_or_else(|| {
            FluxFitError::input(format!("no auxiliary spectrum configured for '{}'", source.nd))
        })?;
        Some(load_spectrum(provider, id, binning.energy())?)
    } else {
        None
    };

    let design = DesignMatrix::new(nd, auxiliary)?;
    debug!(
        nd = source.nd,
        energy_bins = design.n_energy(),
        channels = design.n_channels(),
        auxiliary = design.has_auxiliary(),
        "assembled design matrix"
    );
    Ok(design)
}

/// Load a 1-D spectrum (FD target or auxiliary) on the given energy binning.
pub fn load_spectrum(provider: &dyn FluxProvider, id: &str, energy: &EnergyBinning) -> FluxResult<DVector<f64>> {
    let v = provider.load(id, energy.edges(), None)?.into_spectrum(id)?;
    if v.len() != energy.len() {
        return Err(FluxFitError::shape(format!(
            "provider returned {} bins for '{id}', energy binning has {}",
            v.len(),
            energy.len()
        )));
    }
    Ok(v)
}

/// Scale a systematic universe onto the nominal flux: `member / central × nominal`.
///
/// Bins where the central value is zero keep the nominal value.
pub fn normalize_to_nominal(
    member: &DMatrix<f64>,
    central: &DMatrix<f64>,
    nominal: &DMatrix<f64>,
) -> FluxResult<DMatrix<f64>> {
    if member.shape() != central.shape() || member.shape() != nominal.shape() {
        return Err(FluxFitError::shape(format!(
            "universe {:?}, central value {:?} and nominal {:?} differ in shape",
            member.shape(),
            central.shape(),
            nominal.shape()
        )));
    }
    Ok(DMatrix::from_fn(member.nrows(), member.ncols(), |i, j| {
        let cv = central[(i, j)];
        if cv == 0.0 {
            nominal[(i, j)]
        } else {
            member[(i, j)] / cv * nominal[(i, j)]
        }
    }))
}

/// 1-D counterpart of [`normalize_to_nominal`].
pub fn normalize_spectrum_to_nominal(
    member: &DVector<f64>,
    central: &DVector<f64>,
    nominal: &DVector<f64>,
) -> FluxResult<DVector<f64>> {
    let m = normalize_to_nominal(
        &DMatrix::from_column_slice(member.len(), 1, member.as_slice()),
        &DMatrix::from_column_slice(central.len(), 1, central.as_slice()),
        &DMatrix::from_column_slice(nominal.len(), 1, nominal.as_slice()),
    )?;
    Ok(m.column(0).into_owned())
}
