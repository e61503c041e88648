//! Error types.
//!
//! Library code returns [`FluxFitError`]; the binary converts it into an
//! [`AppError`] carrying the process exit code.

use thiserror::Error;

/// Convenience alias used throughout the library.
pub type FluxResult<T> = Result<T, FluxFitError>;

/// Failures of a single rebin / assemble / solve call.
///
/// Every variant is terminal for the computation that raised it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FluxFitError {
    /// Arrays disagree in length or dimension.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The linear system has no unique, numerically meaningful solution.
    #[error("degenerate system: {0}")]
    DegenerateSystem(String),

    /// A destination bin received no source bins during rebinning.
    #[error("empty bin group: destination bin {bin} [{left}, {right}] has no source centers")]
    EmptyBinGroup { bin: usize, left: f64, right: f64 },

    /// A range request that cannot be honoured (empty, inverted or out of span).
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Non-finite values, negative strengths, malformed configuration.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The flux provider has no spectrum under this id.
    #[error("unknown spectrum '{0}'")]
    UnknownSpectrum(String),

    /// Reading or parsing a flux library failed.
    #[error("flux library: {0}")]
    Io(String),
}

impl FluxFitError {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    pub(crate) fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateSystem(msg.into())
    }

    pub(crate) fn range(msg: impl Into<String>) -> Self {
        Self::InvalidRange(msg.into())
    }

    pub(crate) fn input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Process exit code used when this error reaches `main`.
    pub fn exit_code(&self) -> u8 {
        match self {
            FluxFitError::InvalidRange(_)
            | FluxFitError::InvalidInput(_)
            | FluxFitError::UnknownSpectrum(_)
            | FluxFitError::Io(_) => 2,
            FluxFitError::EmptyBinGroup { .. } => 3,
            FluxFitError::ShapeMismatch(_) | FluxFitError::DegenerateSystem(_) => 4,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<FluxFitError> for AppError {
    fn from(err: FluxFitError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
