//! First-order implicit-explicit Euler integrator.

use crate::error::{OdeError, OdeResult};
use pk_core::{Real, Tolerances, ensure_finite, ensure_positive, nearly_equal};
use pk_la::Vector;
use tracing::{debug, trace};

/// Explicit right-hand side: writes `f_explicit(t, y)` into `out`.
pub type ExplicitFn = Box<dyn FnMut(&mut Vector, Real, &Vector) -> OdeResult<()>>;

/// Implicit solve `(y, t, a, rhs)`: on entry `y` holds the initial guess; on
/// success it must hold the solution of `y - a * f_implicit(t, y) = rhs`.
pub type ImplicitSolveFn = Box<dyn FnMut(&mut Vector, Real, Real, &Vector) -> OdeResult<()>>;

/// Final steps within this distance of `dt` are merged into one.
const LANDING: Tolerances = Tolerances { abs: 0.0, rel: 1e-9 };

/// Integrator options.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct ImexConfig {
    /// Fixed time step
    pub dt: Real,
    /// Maximum number of steps in one `integrate` call (safety limit)
    pub max_steps: usize,
}

impl Default for ImexConfig {
    fn default() -> Self {
        Self {
            dt: 1e-3,
            max_steps: 1_000_000,
        }
    }
}

impl ImexConfig {
    pub fn validate(&self) -> OdeResult<()> {
        ensure_positive(self.dt, "dt")?;
        if self.max_steps == 0 {
            return Err(OdeError::InvalidArg {
                what: "max_steps must be positive",
            });
        }
        Ok(())
    }
}

/// Lifecycle of an [`ImexEuler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegratorState {
    /// No callbacks bound yet.
    Unconfigured,
    /// Callbacks bound, no initial value.
    Configured,
    /// Initial value set, no step taken since.
    Initialized,
    /// At least one step taken.
    Stepping,
}

/// Summary of one completed step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepReport {
    /// Time reached by the step
    pub t: Real,
    /// Step size actually used
    pub dt: Real,
    /// Number of steps taken since the initial value was set
    pub step: usize,
}

/// Scratch vectors with the layout of the state.
struct Work {
    explicit: Vector,
    rhs: Vector,
    next: Vector,
}

/// IMEX Euler for `y' = f_explicit(t, y) + f_implicit(t, y)`.
///
/// Each step of size `h` evaluates the explicit part at the old state, then
/// hands `p = y + h f_explicit(t, y)` to the implicit solve with `a = h` at
/// the new time. A step that fails leaves time and state untouched.
///
/// ```ignore
/// let mut imex = ImexEuler::new(ImexConfig::default());
/// imex.setup(explicit, implicit_solve);
/// imex.initial_values(0.0, &y0)?;
/// imex.integrate(&mut y, 1.0)?;
/// ```
pub struct ImexEuler {
    config: ImexConfig,
    explicit: Option<ExplicitFn>,
    implicit: Option<ImplicitSolveFn>,
    state: IntegratorState,
    t: Real,
    y: Option<Vector>,
    work: Option<Work>,
    steps: usize,
}

impl ImexEuler {
    pub fn new(config: ImexConfig) -> Self {
        Self {
            config,
            explicit: None,
            implicit: None,
            state: IntegratorState::Unconfigured,
            t: 0.0,
            y: None,
            work: None,
            steps: 0,
        }
    }

    /// Bind the callback pair. Rebinding keeps the current time and state.
    pub fn setup<E, I>(&mut self, explicit: E, implicit_solve: I)
    where
        E: FnMut(&mut Vector, Real, &Vector) -> OdeResult<()> + 'static,
        I: FnMut(&mut Vector, Real, Real, &Vector) -> OdeResult<()> + 'static,
    {
        self.explicit = Some(Box::new(explicit));
        self.implicit = Some(Box::new(implicit_solve));
        if self.state == IntegratorState::Unconfigured {
            self.state = IntegratorState::Configured;
        }
    }

    /// Start a run at `(t0, y0)`, copying `y0`. May be called again to
    /// restart.
    pub fn initial_values(&mut self, t0: Real, y0: &Vector) -> OdeResult<()> {
        self.initial_value(t0, y0.try_clone()?)
    }

    /// Like [`ImexEuler::initial_values`], taking ownership of the state.
    pub fn initial_value(&mut self, t0: Real, y0: Vector) -> OdeResult<()> {
        if self.state == IntegratorState::Unconfigured {
            return Err(OdeError::InvalidState {
                what: "initial value set before setup",
            });
        }
        ensure_finite(t0, "initial time")?;

        let work = Work {
            explicit: y0.duplicate()?,
            rhs: y0.duplicate()?,
            next: y0.duplicate()?,
        };
        self.t = t0;
        self.y = Some(y0);
        self.work = Some(work);
        self.steps = 0;
        self.state = IntegratorState::Initialized;
        debug!(t0, "IMEX Euler initialized");
        Ok(())
    }

    pub fn set_dt(&mut self, dt: Real) -> OdeResult<()> {
        self.config.dt = ensure_positive(dt, "dt")?;
        Ok(())
    }

    pub fn config(&self) -> &ImexConfig {
        &self.config
    }

    pub fn time(&self) -> Real {
        self.t
    }

    pub fn dt(&self) -> Real {
        self.config.dt
    }

    pub fn state(&self) -> IntegratorState {
        self.state
    }

    /// Current solution, once an initial value is set.
    pub fn current(&self) -> Option<&Vector> {
        self.y.as_ref()
    }

    pub fn steps_taken(&self) -> usize {
        self.steps
    }

    /// Take exactly one step of size `dt`.
    pub fn step(&mut self) -> OdeResult<StepReport> {
        self.ensure_ready()?;
        self.config.validate()?;
        let dt = self.config.dt;
        let t_new = self.t + dt;
        self.advance(dt, t_new)
    }

    /// Integrate up to `t_end` and copy the final state into `y_out`.
    pub fn integrate(&mut self, y_out: &mut Vector, t_end: Real) -> OdeResult<()> {
        self.integrate_with_observer(y_out, t_end, |_, _| Ok(()))
    }

    /// Integrate up to `t_end`, calling `observer(t, y)` after every step.
    ///
    /// Steps are of size `dt` except the last, which is shortened to land
    /// exactly on `t_end`. If a step fails, the steps before it remain
    /// committed.
    pub fn integrate_with_observer<O>(
        &mut self,
        y_out: &mut Vector,
        t_end: Real,
        mut observer: O,
    ) -> OdeResult<()>
    where
        O: FnMut(Real, &Vector) -> OdeResult<()>,
    {
        self.ensure_ready()?;
        self.config.validate()?;
        ensure_finite(t_end, "t_end")?;
        if t_end < self.t {
            return Err(OdeError::InvalidArg {
                what: "t_end is before the current time",
            });
        }

        let dt = self.config.dt;
        debug!(t = self.t, t_end, dt, "IMEX Euler integrate");
        let mut taken = 0;
        while self.t < t_end {
            if taken == self.config.max_steps {
                return Err(OdeError::StepLimit {
                    max_steps: self.config.max_steps,
                    t: self.t,
                    t_end,
                });
            }
            let remaining = t_end - self.t;
            // Absorb round-off so the run does not end with a sliver step.
            let last = remaining <= dt || nearly_equal(remaining, dt, LANDING);
            let report = if last {
                self.advance(remaining, t_end)?
            } else {
                self.advance(dt, self.t + dt)?
            };
            taken += 1;
            if let Some(y) = &self.y {
                observer(report.t, y)?;
            }
        }
        debug!(t = self.t, steps = taken, "IMEX Euler reached t_end");

        let y = self.y.as_ref().ok_or(OdeError::InvalidState {
            what: "integrator has no state",
        })?;
        y_out.assign(y)?;
        Ok(())
    }

    fn ensure_ready(&self) -> OdeResult<()> {
        match self.state {
            IntegratorState::Initialized | IntegratorState::Stepping => Ok(()),
            IntegratorState::Unconfigured => Err(OdeError::InvalidState {
                what: "integrator used before setup",
            }),
            IntegratorState::Configured => Err(OdeError::InvalidState {
                what: "integrator used before initial values were set",
            }),
        }
    }

    /// One step of size `h` ending at `t_new`. Commits only on success.
    fn advance(&mut self, h: Real, t_new: Real) -> OdeResult<StepReport> {
        let (Some(explicit), Some(implicit), Some(y), Some(work)) = (
            self.explicit.as_mut(),
            self.implicit.as_mut(),
            self.y.as_mut(),
            self.work.as_mut(),
        ) else {
            return Err(OdeError::InvalidState {
                what: "integrator is not initialized",
            });
        };

        explicit(&mut work.explicit, self.t, &*y)?;
        work.rhs.assign(y)?;
        work.rhs.add_scaled(h, &work.explicit)?;

        // The previous state is the initial guess.
        work.next.assign(y)?;
        implicit(&mut work.next, t_new, h, &work.rhs)?;

        std::mem::swap(y, &mut work.next);
        self.t = t_new;
        self.steps += 1;
        self.state = IntegratorState::Stepping;
        trace!(t = t_new, h, step = self.steps, "IMEX Euler step");
        Ok(StepReport {
            t: t_new,
            dt: h,
            step: self.steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pk_la::{Backend, VectorSpec};
    use std::cell::Cell;
    use std::rc::Rc;

    fn scalar(value: Real) -> Vector {
        Vector::from_local_values(VectorSpec::serial(1), Backend::Dense, &[value]).unwrap()
    }

    fn value(v: &Vector) -> Real {
        v.to_local_vec().unwrap()[0]
    }

    /// `y' = alpha y`, all of it implicit.
    fn linear_decay(alpha: Real) -> ImexEuler {
        let mut imex = ImexEuler::new(ImexConfig::default());
        imex.setup(
            |out: &mut Vector, _t, _y: &Vector| Ok(out.set_zero()?),
            move |y: &mut Vector, _t, a, rhs: &Vector| {
                y.assign(rhs)?;
                y.scale(1.0 / (1.0 - a * alpha))?;
                Ok(())
            },
        );
        imex
    }

    #[test]
    fn lifecycle_is_enforced() {
        let mut imex = ImexEuler::new(ImexConfig::default());
        let mut out = scalar(0.0);
        assert_eq!(imex.state(), IntegratorState::Unconfigured);
        assert!(matches!(
            imex.initial_values(0.0, &scalar(1.0)),
            Err(OdeError::InvalidState { .. })
        ));

        let mut imex = linear_decay(-1.0);
        assert_eq!(imex.state(), IntegratorState::Configured);
        assert!(matches!(
            imex.integrate(&mut out, 1.0),
            Err(OdeError::InvalidState { .. })
        ));

        imex.initial_values(0.0, &scalar(1.0)).unwrap();
        assert_eq!(imex.state(), IntegratorState::Initialized);
        imex.step().unwrap();
        assert_eq!(imex.state(), IntegratorState::Stepping);
    }

    #[test]
    fn step_rejects_non_positive_dt() {
        for dt in [-0.5, 0.0, Real::NAN] {
            let mut imex = ImexEuler::new(ImexConfig {
                dt,
                ..ImexConfig::default()
            });
            imex.setup(
                |out: &mut Vector, _t, _y: &Vector| Ok(out.set_zero()?),
                |y: &mut Vector, _t, _a, rhs: &Vector| Ok(y.assign(rhs)?),
            );
            imex.initial_values(0.0, &scalar(1.0)).unwrap();

            assert!(imex.step().is_err(), "dt = {dt}");
            assert_eq!(imex.time(), 0.0);
            assert_eq!(imex.steps_taken(), 0);
            assert_eq!(imex.state(), IntegratorState::Initialized);
        }
    }

    #[test]
    fn single_step_matches_backward_euler() {
        let mut imex = linear_decay(-2.0);
        imex.set_dt(0.25).unwrap();
        imex.initial_values(1.0, &scalar(3.0)).unwrap();

        let report = imex.step().unwrap();
        assert_eq!(report.step, 1);
        assert_eq!(report.t, 1.25);
        // 3 / (1 + 0.25 * 2)
        assert!((value(imex.current().unwrap()) - 2.0).abs() < 1e-15);
    }

    #[test]
    fn explicit_part_is_forward_euler() {
        let mut imex = ImexEuler::new(ImexConfig {
            dt: 0.5,
            ..ImexConfig::default()
        });
        // y' = t: explicit only, evaluated at the start of each step.
        imex.setup(
            |out: &mut Vector, t, _y: &Vector| Ok(out.fill(t)?),
            |y: &mut Vector, _t, _a, rhs: &Vector| Ok(y.assign(rhs)?),
        );
        imex.initial_values(0.0, &scalar(0.0)).unwrap();
        let mut out = scalar(0.0);
        imex.integrate(&mut out, 1.0).unwrap();
        // 0.5 * 0 + 0.5 * 0.5
        assert_eq!(value(&out), 0.25);
    }

    #[test]
    fn final_step_is_clipped_to_t_end() {
        let mut imex = linear_decay(0.0);
        imex.set_dt(0.3).unwrap();
        imex.initial_values(0.0, &scalar(1.0)).unwrap();

        let mut times = Vec::new();
        let mut out = scalar(0.0);
        imex.integrate_with_observer(&mut out, 1.0, |t, _| {
            times.push(t);
            Ok(())
        })
        .unwrap();

        assert_eq!(times.len(), 4);
        assert_eq!(*times.last().unwrap(), 1.0);
        assert_eq!(imex.time(), 1.0);
        assert_eq!(imex.steps_taken(), 4);
    }

    #[test]
    fn integrate_to_current_time_copies_state() {
        let mut imex = linear_decay(-1.0);
        imex.initial_values(2.0, &scalar(5.0)).unwrap();
        let mut out = scalar(0.0);
        imex.integrate(&mut out, 2.0).unwrap();
        assert_eq!(value(&out), 5.0);
        assert_eq!(imex.steps_taken(), 0);

        assert!(matches!(
            imex.integrate(&mut out, 1.0),
            Err(OdeError::InvalidArg { .. })
        ));
    }

    #[test]
    fn failed_implicit_solve_leaves_state_unmodified() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let mut imex = ImexEuler::new(ImexConfig {
            dt: 0.1,
            ..ImexConfig::default()
        });
        imex.setup(
            |out: &mut Vector, _t, y: &Vector| Ok(out.assign(y)?),
            move |y: &mut Vector, _t, _a, rhs: &Vector| {
                counter.set(counter.get() + 1);
                if counter.get() == 3 {
                    y.fill(Real::NAN)?;
                    return Err(OdeError::Callback {
                        message: "solve diverged".into(),
                    });
                }
                Ok(y.assign(rhs)?)
            },
        );
        imex.initial_values(0.0, &scalar(1.0)).unwrap();

        let mut out = scalar(0.0);
        let err = imex.integrate(&mut out, 1.0).unwrap_err();
        assert!(matches!(err, OdeError::Callback { .. }));

        // Two committed steps of y *= 1.1.
        assert_eq!(imex.steps_taken(), 2);
        assert!((imex.time() - 0.2).abs() < 1e-15);
        assert!((value(imex.current().unwrap()) - 1.21).abs() < 1e-12);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn step_limit_is_reported() {
        let mut imex = linear_decay(-1.0);
        imex.initial_values(0.0, &scalar(1.0)).unwrap();
        imex.config.max_steps = 3;
        let mut out = scalar(0.0);
        assert!(matches!(
            imex.integrate(&mut out, 1.0),
            Err(OdeError::StepLimit { max_steps: 3, .. })
        ));
        assert_eq!(imex.steps_taken(), 3);
    }

    #[test]
    fn invalid_dt_is_rejected() {
        let mut imex = linear_decay(-1.0);
        assert!(imex.set_dt(0.0).is_err());
        assert!(imex.set_dt(Real::NAN).is_err());
        assert_eq!(imex.dt(), ImexConfig::default().dt);
    }

    #[test]
    fn restart_resets_step_count() {
        let mut imex = linear_decay(-1.0);
        imex.initial_values(0.0, &scalar(1.0)).unwrap();
        imex.step().unwrap();
        imex.initial_values(0.0, &scalar(1.0)).unwrap();
        assert_eq!(imex.steps_taken(), 0);
        assert_eq!(imex.state(), IntegratorState::Initialized);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use pk_la::{Backend, VectorSpec};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn integrate_lands_on_t_end(
            dt in 1e-3..0.5f64,
            t0 in -1.0..1.0f64,
            span in 0.0..2.0f64,
        ) {
            let mut imex = ImexEuler::new(ImexConfig { dt, ..ImexConfig::default() });
            imex.setup(
                |out: &mut Vector, _t, _y: &Vector| Ok(out.fill(1.0)?),
                |y: &mut Vector, _t, _a, rhs: &Vector| Ok(y.assign(rhs)?),
            );
            let y0 = Vector::new(VectorSpec::serial(1), Backend::Dense).unwrap();
            imex.initial_values(t0, &y0).unwrap();

            let t_end = t0 + span;
            let mut y = y0.duplicate().unwrap();
            imex.integrate(&mut y, t_end).unwrap();

            prop_assert_eq!(imex.time(), t_end);
            // y' = 1, integrated exactly by forward Euler.
            prop_assert!((y.to_local_vec().unwrap()[0] - span).abs() < 1e-9);
            let expected = (span / dt).ceil() as usize;
            prop_assert!(imex.steps_taken().abs_diff(expected) <= 1);
        }
    }
}
