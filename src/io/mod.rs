//! Input/output helpers.
//!
//! - flux library JSON read/write (`library`)

pub mod library;

pub use library::*;
