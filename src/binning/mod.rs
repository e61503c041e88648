//! Energy and off-axis binnings, and the active binning context.
//!
//! - [`Binning`]: validated bin edges plus centers along one axis
//! - [`BinningContext`]: energy binning plus the (possibly narrowed) channel
//!   binning currently in effect
//! - [`ChannelWindow`]: index window into the full channel binning

pub mod context;
pub mod grid;

pub use context::*;
pub use grid::*;
