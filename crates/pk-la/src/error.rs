//! Error types for linear-algebra operations.

use pk_core::PkError;
use thiserror::Error;

/// Errors raised by vectors, the backend wrapper and the CG solver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LaError {
    #[error("Backend error {code}: {message}")]
    Backend { code: i32, message: String },

    #[error("Vector storage type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Vector spec mismatch: {what}")]
    SpecMismatch { what: String },

    #[error("CG did not converge after {iterations} iterations (residual = {residual:e})")]
    NotConverged { iterations: usize, residual: f64 },

    #[error("CG breakdown at iteration {iteration}: non-positive curvature {curvature:e}")]
    Breakdown { iteration: usize, curvature: f64 },

    #[error("Invalid state: {what}")]
    InvalidState { what: &'static str },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error(transparent)]
    Core(#[from] PkError),
}

impl LaError {
    /// Failures that abort only the current solve. A caller may retry with a
    /// smaller step or a looser tolerance.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LaError::NotConverged { .. } | LaError::Breakdown { .. })
    }
}

pub type LaResult<T> = Result<T, LaError>;
