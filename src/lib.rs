//! `prism-flux` library crate.
//!
//! The binary (`prism`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the fit engine can be driven from other front-ends or notebooks
//! - code stays easy to navigate as the project grows
//!
//! Data flow: [`flux`] loads and rebins spectra onto the [`binning`] context,
//! [`fit`] solves for the channel coefficients, [`systematics`] propagates
//! alternative predictions through a nominal fit, and [`report`] formats the
//! results.

pub mod app;
pub mod binning;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod flux;
pub mod io;
pub mod math;
pub mod osc;
pub mod report;
pub mod systematics;
