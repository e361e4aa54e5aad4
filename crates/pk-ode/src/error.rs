//! Error types for time integration.

use pk_core::PkError;
use pk_la::LaError;
use thiserror::Error;

/// Errors encountered while setting up or advancing an integrator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OdeError {
    #[error("Invalid state: {what}")]
    InvalidState { what: &'static str },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Step limit of {max_steps} reached at t = {t} before t_end = {t_end}")]
    StepLimit { max_steps: usize, t: f64, t_end: f64 },

    #[error("Solver failed: {0}")]
    Solver(#[from] LaError),

    #[error("Right-hand side callback failed: {message}")]
    Callback { message: String },

    #[error(transparent)]
    Core(#[from] PkError),
}

impl OdeError {
    /// True when the failed step may succeed with a smaller step size.
    pub fn is_recoverable(&self) -> bool {
        match self {
            OdeError::Solver(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

pub type OdeResult<T> = Result<T, OdeError>;
