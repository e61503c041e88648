//! Flux fitting.
//!
//! Responsibilities:
//!
//! - build the weight and regularization operators and solve for the channel
//!   coefficients (`engine`)
//! - generate regularization grids and scan them in parallel (`lambda_grid`, `scan`)
//! - hold the session state and hand out immutable snapshots (`session`)

pub mod engine;
pub mod lambda_grid;
pub mod scan;
pub mod session;

pub use engine::*;
pub use lambda_grid::*;
pub use scan::*;
pub use session::*;
