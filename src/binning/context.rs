//! Active binning context and off-axis range selection.
//!
//! The full channel binning is stored once and never modified. A narrowed view
//! is an index window into it, so every narrowing request is interpreted
//! against the original grid:
//!
//! ```text
//! full [0, 33] -> narrow [5, 20] -> narrow [0, 10]   ==   full [0, 33] -> narrow [0, 10]
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::binning::Binning;
use crate::error::{FluxFitError, FluxResult};

/// Contiguous window `start..end` of bins of the full channel binning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelWindow {
    pub start: usize,
    pub end: usize,
}

impl ChannelWindow {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Select the channels whose centers lie in `[min, max]`.
///
/// The resulting edges are the original edges enclosing the selected centers.
pub fn channel_window(full: &Binning, min: f64, max: f64) -> FluxResult<ChannelWindow> {
    if !(min.is_finite() && max.is_finite()) {
        return Err(FluxFitError::range(format!(
            "channel range bounds must be finite, got [{min}, {max}]"
        )));
    }
    if min > max {
        return Err(FluxFitError::range(format!(
            "channel range minimum {min} exceeds maximum {max}"
        )));
    }
    let (lo, hi) = full.span();
    if min < lo || max > hi {
        return Err(FluxFitError::range(format!(
            "channel range [{min}, {max}] lies outside the channel span [{lo}, {hi}]"
        )));
    }

    let centers = full.centers();
    let start = centers.iter().position(|&c| c >= min);
    let end = centers.iter().rposition(|&c| c <= max);
    match (start, end) {
        (Some(start), Some(last)) if start <= last => Ok(ChannelWindow { start, end: last + 1 }),
        _ => Err(FluxFitError::range(format!(
            "channel range [{min}, {max}] contains no channel centers"
        ))),
    }
}

/// Energy binning plus the channel binning currently in effect.
///
/// Cloning is cheap: the energy and full channel grids are shared.
#[derive(Debug, Clone, PartialEq)]
pub struct BinningContext {
    energy: Arc<Binning>,
    full_channels: Arc<Binning>,
    window: ChannelWindow,
    channels: Binning,
}

impl BinningContext {
    pub fn new(energy: Binning, channels: Binning) -> Self {
        let window = ChannelWindow {
            start: 0,
            end: channels.len(),
        };
        Self {
            energy: Arc::new(energy),
            channels: channels.clone(),
            full_channels: Arc::new(channels),
            window,
        }
    }

    pub fn energy(&self) -> &Binning {
        &self.energy
    }

    /// Active (possibly narrowed) channel binning.
    pub fn channels(&self) -> &Binning {
        &self.channels
    }

    /// The original, never-narrowed channel binning.
    pub fn full_channels(&self) -> &Binning {
        &self.full_channels
    }

    pub fn window(&self) -> ChannelWindow {
        self.window
    }

    pub fn is_narrowed(&self) -> bool {
        self.window.len() != self.full_channels.len()
    }

    /// Narrow the active channels to `[min, max]` of the *full* binning.
    ///
    /// On error the context is left untouched.
    pub fn narrow_channels(&mut self, min: f64, max: f64) -> FluxResult<ChannelWindow> {
        let window = channel_window(&self.full_channels, min, max)?;
        self.window = window;
        self.channels = self.full_channels.slice(window.start, window.end);
        debug!(
            min,
            max,
            start = window.start,
            end = window.end,
            "narrowed channel binning"
        );
        Ok(window)
    }

    /// Non-mutating variant of [`Self::narrow_channels`].
    pub fn with_channel_range(&self, min: f64, max: f64) -> FluxResult<Self> {
        let mut out = self.clone();
        out.narrow_channels(min, max)?;
        Ok(out)
    }

    /// Restore the full channel binning.
    pub fn reset_channels(&mut self) {
        self.window = ChannelWindow {
            start: 0,
            end: self.full_channels.len(),
        };
        self.channels = (*self.full_channels).clone();
    }
}
