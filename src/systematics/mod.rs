//! Propagation of alternative flux predictions through a nominal fit.
//!
//! The nominal coefficients are held fixed. A shifted ND prediction is
//! `M_shift · c`; comparing it (and the shifted FD flux) against the nominal
//! fit gives the fractional change each systematic induces at the FD:
//!
//! ```text
//! nd   = (M_shift·c − predicted) / FD_unosc
//! fd   = (FD_shift ⊙ P − target) / FD_unosc
//! both = nd − fd
//! ```

pub mod ratios;

pub use ratios::*;
