//! Time integration of split ODE systems on distributed vectors.
//!
//! [`ImexEuler`] advances `y' = f_explicit(t, y) + f_implicit(t, y)` with
//! forward Euler for the explicit part and backward Euler for the implicit
//! part. The implicit part is reached only through a caller-supplied solve
//! callback, typically a [`pk_la::CgSolver`] bound to a
//! [`pk_la::ShiftedOperator`].

pub mod error;
pub mod integrator;

pub use error::{OdeError, OdeResult};
pub use integrator::{
    ExplicitFn, ImexConfig, ImexEuler, ImplicitSolveFn, IntegratorState, StepReport,
};
