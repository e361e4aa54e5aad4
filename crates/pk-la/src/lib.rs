//! Distributed vectors and matrix-free linear solvers.
//!
//! A [`Vector`] is a value-semantics facade over a boxed [`VectorStorage`].
//! Two storage variants are provided: [`DenseStorage`] keeps the local block
//! in a `nalgebra` vector, while [`RefVecStorage`] owns an object of the
//! reference-counted [`refvec`] library through a [`ForeignHandle`].
//!
//! [`CgSolver`] solves symmetric positive definite systems given only a
//! [`LinearOperator`], so it works unchanged on either variant and on any
//! process group.

pub mod cg;
pub mod dense;
pub mod error;
pub mod handle;
pub mod operator;
pub mod refvec;
pub mod refvec_storage;
pub mod spec;
pub mod storage;
pub mod vector;

pub use cg::{CgConfig, CgReport, CgSolver};
pub use dense::DenseStorage;
pub use error::{LaError, LaResult};
pub use handle::{ForeignHandle, ForeignObject, Ownership};
pub use operator::{
    FnOperator, LinearOperator, SharedOperator, ShiftedOperator, make_linear_operator,
    shared_operator,
};
pub use refvec_storage::RefVecStorage;
pub use spec::VectorSpec;
pub use storage::{Backend, VectorStorage};
pub use vector::{LocalSlice, LocalSliceMut, Vector};
