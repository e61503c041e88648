//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - flux source layout (`FluxSources`, `TargetSource`, `ShiftSource`, `UniverseSource`)
//! - session and run configuration (`SessionConfig`, `RunConfig`)

pub mod types;

pub use types::*;
