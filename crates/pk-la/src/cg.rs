//! Matrix-free conjugate gradient for symmetric positive definite operators.

use crate::error::{LaError, LaResult};
use crate::operator::SharedOperator;
use crate::vector::Vector;
use pk_core::{PkError, Real, ensure_finite};
use tracing::{debug, trace, warn};

/// CG solver configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct CgConfig {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Absolute tolerance for residual norm
    pub abs_tol: Real,
    /// Tolerance relative to the initial residual norm
    pub rel_tol: Real,
}

impl Default for CgConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            abs_tol: 1e-12,
            rel_tol: 1e-10,
        }
    }
}

impl CgConfig {
    pub fn validate(&self) -> LaResult<()> {
        if self.max_iterations == 0 {
            return Err(LaError::InvalidArg {
                what: "max_iterations must be at least 1",
            });
        }
        for (value, what) in [(self.abs_tol, "abs_tol"), (self.rel_tol, "rel_tol")] {
            ensure_finite(value, what)?;
            if value < 0.0 {
                return Err(PkError::InvalidArg { what }.into());
            }
        }
        Ok(())
    }
}

/// Outcome of a converged solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CgReport {
    /// Number of iterations
    pub iterations: usize,
    /// Residual norm of the starting iterate
    pub initial_residual: Real,
    /// Final residual norm
    pub residual: Real,
}

/// Conjugate gradient solver bound to one operator.
///
/// The operator must be symmetric positive definite. Every solve is
/// collective over the process group of the vectors involved.
pub struct CgSolver {
    config: CgConfig,
    operator: Option<SharedOperator>,
}

impl CgSolver {
    pub fn new(config: CgConfig) -> Self {
        Self {
            config,
            operator: None,
        }
    }

    /// Bind the operator used by subsequent solves.
    pub fn setup(&mut self, operator: SharedOperator) {
        self.operator = Some(operator);
    }

    pub fn config(&self) -> &CgConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut CgConfig {
        &mut self.config
    }

    /// Solve `A y = rhs`, starting from `initial_guess` or from zero.
    ///
    /// On success `y` holds the solution. On failure `y` holds the last
    /// iterate.
    pub fn solve(
        &self,
        y: &mut Vector,
        rhs: &Vector,
        initial_guess: Option<&Vector>,
    ) -> LaResult<CgReport> {
        let op = self.operator.as_ref().ok_or(LaError::InvalidState {
            what: "CG solve called before setup",
        })?;
        self.config.validate()?;
        y.spec().ensure_compatible(rhs.spec())?;

        match initial_guess {
            Some(guess) => y.assign(guess)?,
            None => y.set_zero()?,
        }

        // r = rhs - A y
        let mut ap = y.duplicate()?;
        op.apply(&mut ap, y)?;
        let mut r = rhs.try_clone()?;
        r.add_scaled(-1.0, &ap)?;

        let mut rr = r.dot(&r)?;
        let initial_residual = ensure_finite(rr.sqrt(), "CG initial residual")?;
        if initial_residual <= self.config.abs_tol {
            debug!(
                residual = initial_residual,
                "CG: initial iterate already converged"
            );
            return Ok(CgReport {
                iterations: 0,
                initial_residual,
                residual: initial_residual,
            });
        }

        let threshold = self
            .config
            .abs_tol
            .max(self.config.rel_tol * initial_residual);
        debug!(
            n = y.spec().global_size(),
            initial_residual, threshold, "CG: starting"
        );

        let mut p = r.try_clone()?;
        let mut residual = initial_residual;
        for k in 1..=self.config.max_iterations {
            op.apply(&mut ap, &p)?;
            let curvature = p.dot(&ap)?;
            // Negated so that NaN also counts as breakdown.
            if !(curvature > 0.0) {
                warn!("CG: non-positive p.Ap = {curvature:.4e} at iteration {k}");
                return Err(LaError::Breakdown {
                    iteration: k,
                    curvature,
                });
            }

            let alpha = rr / curvature;
            y.add_scaled(alpha, &p)?;
            r.add_scaled(-alpha, &ap)?;

            let rr_new = r.dot(&r)?;
            residual = rr_new.sqrt();
            trace!(iteration = k, residual, alpha, "CG iteration");
            if residual <= threshold {
                debug!(iterations = k, residual, "CG: converged");
                return Ok(CgReport {
                    iterations: k,
                    initial_residual,
                    residual,
                });
            }

            // p = r + beta p
            let beta = rr_new / rr;
            p.scale(beta)?;
            p.add(&r)?;
            rr = rr_new;
        }

        warn!(
            iterations = self.config.max_iterations,
            residual, threshold, "CG: iteration limit reached"
        );
        Err(LaError::NotConverged {
            iterations: self.config.max_iterations,
            residual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::shared_operator;
    use crate::spec::VectorSpec;
    use crate::storage::Backend;

    /// `out = diag(d) * in` on a serial vector.
    fn diagonal(d: Vec<Real>) -> SharedOperator {
        shared_operator(move |out: &mut Vector, input: &Vector| {
            let x = input.local_slice()?;
            let mut o = out.local_slice_mut()?;
            for ((o, x), d) in o.iter_mut().zip(x.iter()).zip(&d) {
                *o = d * x;
            }
            Ok(())
        })
    }

    fn vector(values: &[Real]) -> Vector {
        Vector::from_local_values(VectorSpec::serial(values.len()), Backend::Dense, values)
            .unwrap()
    }

    #[test]
    fn solves_diagonal_system() {
        let mut solver = CgSolver::new(CgConfig::default());
        solver.setup(diagonal(vec![1.0, 2.0, 4.0]));

        let rhs = vector(&[1.0, 1.0, 1.0]);
        let mut y = rhs.duplicate().unwrap();
        let report = solver.solve(&mut y, &rhs, None).unwrap();

        assert!(report.iterations <= 3);
        let got = y.to_local_vec().unwrap();
        for (g, e) in got.iter().zip([1.0, 0.5, 0.25]) {
            assert!((g - e).abs() < 1e-10, "{g} vs {e}");
        }
    }

    #[test]
    fn exact_guess_returns_without_iterating() {
        let mut solver = CgSolver::new(CgConfig::default());
        solver.setup(diagonal(vec![2.0, 3.0]));

        let guess = vector(&[1.0, -1.0]);
        let rhs = vector(&[2.0, -3.0]);
        let mut y = rhs.duplicate().unwrap();
        let report = solver.solve(&mut y, &rhs, Some(&guess)).unwrap();

        assert_eq!(report.iterations, 0);
        assert_eq!(y.to_local_vec().unwrap(), vec![1.0, -1.0]);
    }

    #[test]
    fn solve_without_setup_fails() {
        let solver = CgSolver::new(CgConfig::default());
        let rhs = vector(&[1.0]);
        let mut y = rhs.duplicate().unwrap();
        assert!(matches!(
            solver.solve(&mut y, &rhs, None).unwrap_err(),
            LaError::InvalidState { .. }
        ));
    }

    #[test]
    fn indefinite_operator_breaks_down() {
        let mut solver = CgSolver::new(CgConfig::default());
        solver.setup(diagonal(vec![-1.0, -1.0]));
        let rhs = vector(&[1.0, 1.0]);
        let mut y = rhs.duplicate().unwrap();
        let err = solver.solve(&mut y, &rhs, None).unwrap_err();
        assert!(matches!(err, LaError::Breakdown { iteration: 1, .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn iteration_cap_is_an_error() {
        let mut solver = CgSolver::new(CgConfig {
            max_iterations: 1,
            ..CgConfig::default()
        });
        solver.setup(diagonal(vec![1.0, 10.0, 100.0]));
        let rhs = vector(&[1.0, 1.0, 1.0]);
        let mut y = rhs.duplicate().unwrap();
        match solver.solve(&mut y, &rhs, None).unwrap_err() {
            LaError::NotConverged {
                iterations,
                residual,
            } => {
                assert_eq!(iterations, 1);
                assert!(residual > 0.0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = CgConfig {
            rel_tol: -1.0,
            ..CgConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = CgConfig {
            max_iterations: 0,
            ..CgConfig::default()
        };
        assert!(bad.validate().is_err());
        assert!(CgConfig::default().validate().is_ok());
    }
}
