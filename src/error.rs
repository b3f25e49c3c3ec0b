//! Error types.
//!
//! `AppError` is the application-level error: a message plus the process exit
//! code `main` should use. Exit codes:
//!
//! - `2`: invalid input, configuration, or file IO
//! - `3`: insufficient data (e.g. missing fits when new computation is disabled)
//! - `4`: numerical or internal failure
//!
//! `FitError` describes why a single optimization failed. The sweep never
//! surfaces it to the user directly; it turns into a null fit record.

use thiserror::Error;

pub const EXIT_INPUT: u8 = 2;
pub const EXIT_DATA: u8 = 3;
pub const EXIT_INTERNAL: u8 = 4;

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

    /// Shorthand for an input/config/IO error (exit code 2).
    pub fn input(message: impl Into<String>) -> Self {
        Self::new(EXIT_INPUT, message)
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
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

/// Failure of a single series optimization.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("series has {got} points, need at least {need}")]
    TooFewPoints { got: usize, need: usize },
    #[error("least squares system is singular")]
    Singular,
    #[error("optimization produced non-finite values")]
    NonFinite,
    #[error("optimization did not converge after {iters} iterations")]
    NoConvergence { iters: usize },
    #[error("invalid fitter setting: {0}")]
    Invalid(String),
}
