//! Mathematical utilities: histogram rebinning and dense linear solves.

pub mod rebin;
pub mod solve;

pub use rebin::*;
pub use solve::*;
