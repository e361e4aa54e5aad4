//! Matrix-free linear operators.

use crate::error::LaResult;
use crate::vector::Vector;
use pk_core::Real;
use std::rc::Rc;

/// A linear map `output = A(input)` defined only by its action.
///
/// `apply` may be called any number of times with the same input and must
/// not keep references to its arguments.
pub trait LinearOperator {
    fn apply(&self, output: &mut Vector, input: &Vector) -> LaResult<()>;
}

/// An operator shared between solvers; it lives as long as its longest
/// holder.
pub type SharedOperator = Rc<dyn LinearOperator>;

/// Adapts a closure to [`LinearOperator`].
pub struct FnOperator<F> {
    f: F,
}

impl<F> LinearOperator for FnOperator<F>
where
    F: Fn(&mut Vector, &Vector) -> LaResult<()>,
{
    fn apply(&self, output: &mut Vector, input: &Vector) -> LaResult<()> {
        (self.f)(output, input)
    }
}

pub fn make_linear_operator<F>(f: F) -> FnOperator<F>
where
    F: Fn(&mut Vector, &Vector) -> LaResult<()>,
{
    FnOperator { f }
}

/// [`make_linear_operator`], already wrapped for sharing.
pub fn shared_operator<F>(f: F) -> SharedOperator
where
    F: Fn(&mut Vector, &Vector) -> LaResult<()> + 'static,
{
    Rc::new(make_linear_operator(f))
}

/// `output = shift * input + factor * inner(input)`.
///
/// With `shift = 1` and `factor = -a` this is the backward-Euler matrix
/// `I - a L` of a stiff linear part `L`.
pub struct ShiftedOperator {
    inner: SharedOperator,
    shift: Real,
    factor: Real,
}

impl ShiftedOperator {
    pub fn new(inner: SharedOperator, shift: Real, factor: Real) -> Self {
        Self {
            inner,
            shift,
            factor,
        }
    }

    /// `I - a L`.
    pub fn identity_minus(inner: SharedOperator, a: Real) -> Self {
        Self::new(inner, 1.0, -a)
    }
}

impl LinearOperator for ShiftedOperator {
    fn apply(&self, output: &mut Vector, input: &Vector) -> LaResult<()> {
        self.inner.apply(output, input)?;
        output.scale(self.factor)?;
        output.add_scaled(self.shift, input)
    }
}
