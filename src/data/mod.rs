//! Data sources.
//!
//! - seeded synthetic flux library (`synthetic`)

pub mod synthetic;

pub use synthetic::*;
