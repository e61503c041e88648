//! Reporting utilities: formatted terminal output for fits, scans and shifts.

pub mod format;

pub use format::*;
