//! 1D Fisher-KPP traveling wave, diffusion implicit and reaction explicit.
//!
//! The boundary values and the reference solution come from the exact
//! traveling wave
//!
//! ```text
//! u(x, t) = 1/4 (1 - tanh(xi / 2))^2,   xi = sqrt(r / 6D) x - 5 r t / 6
//! ```
//!
//! which lets the run report its own discretization error.

use crate::config::FisherConfig;
use crate::error::{CliError, CliResult};
use pk_core::{Comm, PkError, Real};
use pk_la::{
    Backend, CgSolver, LaResult, SharedOperator, ShiftedOperator, Vector, VectorSpec,
    shared_operator,
};
use pk_ode::{ImexConfig, ImexEuler};
use serde::Serialize;
use std::cell::Cell;
use std::ops::Range;
use std::rc::Rc;
use tracing::{debug, info};

/// Result of one demo run, identical on every rank.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FisherSummary {
    pub n: usize,
    pub ranks: usize,
    pub backend: Backend,
    pub t: f64,
    pub steps: usize,
    /// CG iterations summed over all steps
    pub cg_iterations: usize,
    pub norm: f64,
    /// `h * sum(u)`
    pub mass: f64,
    /// Grid-weighted L2 distance to the exact solution at `t`
    pub error_l2: f64,
}

#[derive(Clone, Copy, Debug)]
struct Wave {
    diffusion: Real,
    reaction: Real,
    h: Real,
    n: usize,
}

impl Wave {
    fn new(config: &FisherConfig) -> Self {
        Self {
            diffusion: config.diffusion,
            reaction: config.reaction,
            h: config.h(),
            n: config.n,
        }
    }

    fn exact(&self, x: Real, t: Real) -> Real {
        let xi = (self.reaction / (6.0 * self.diffusion)).sqrt() * x
            - 5.0 * self.reaction * t / 6.0;
        let g = 1.0 - (xi / 2.0).tanh();
        0.25 * g * g
    }

    fn sample(&self, range: Range<usize>, t: Real) -> Vec<Real> {
        range.map(|i| self.exact(i as Real * self.h, t)).collect()
    }
}

/// Values of the neighbouring ranks' edge entries: `(left, right)`, `None`
/// at the ends of the domain. Collective; every rank must own at least one
/// entry.
fn exchange_edges(comm: &Comm, local: &[Real]) -> (Option<Real>, Option<Real>) {
    let (rank, size) = (comm.rank(), comm.size());
    let mut edges = vec![0.0; 2 * size];
    if let (Some(first), Some(last)) = (local.first(), local.last()) {
        edges[2 * rank] = *first;
        edges[2 * rank + 1] = *last;
    }
    let edges = comm.all_reduce_sum(&edges);
    let left = (rank > 0).then(|| edges[2 * rank - 1]);
    let right = (rank + 1 < size).then(|| edges[2 * rank + 2]);
    (left, right)
}

/// `D (u[i-1] - 2 u[i] + u[i+1]) / h^2` with zero values outside the domain.
fn diffusion_operator(wave: Wave) -> SharedOperator {
    let c = wave.diffusion / (wave.h * wave.h);
    shared_operator(move |out: &mut Vector, input: &Vector| -> LaResult<()> {
        let u = input.local_slice()?;
        let (left, right) = exchange_edges(input.spec().comm(), &u);
        let mut o = out.local_slice_mut()?;
        let n = u.len();
        for i in 0..n {
            let l = if i > 0 { u[i - 1] } else { left.unwrap_or(0.0) };
            let r = if i + 1 < n { u[i + 1] } else { right.unwrap_or(0.0) };
            o[i] = c * (l - 2.0 * u[i] + r);
        }
        Ok(())
    })
}

/// Run the demo, on a thread process group when `config.ranks > 1`.
pub fn run(config: &FisherConfig) -> CliResult<FisherSummary> {
    config.validate()?;
    info!(
        n = config.n,
        ranks = config.ranks,
        backend = %config.backend,
        dt = config.dt,
        t_end = config.t_end,
        "Fisher-KPP run"
    );
    if config.ranks == 1 {
        return run_rank(config, Comm::world());
    }

    let summaries = Comm::spawn_group(config.ranks, |comm| run_rank(config, comm))?
        .into_iter()
        .collect::<CliResult<Vec<_>>>()?;
    summaries.into_iter().next().ok_or(CliError::Core(PkError::Invariant {
        what: "process group produced no result",
    }))
}

fn run_rank(config: &FisherConfig, comm: Comm) -> CliResult<FisherSummary> {
    let wave = Wave::new(config);
    let spec = VectorSpec::distributed(comm, config.n);
    let range = spec.local_range();
    debug!(rank = spec.comm().rank(), ?range, "rank layout");

    let u0 = Vector::from_local_values(
        spec.clone(),
        config.backend,
        &wave.sample(range.clone(), config.t0),
    )?;

    let cg_iterations = Rc::new(Cell::new(0));
    let mut imex = ImexEuler::new(ImexConfig {
        dt: config.dt,
        ..ImexConfig::default()
    });
    let reaction = config.reaction;
    let lap = diffusion_operator(wave);
    let mut solver = CgSolver::new(config.cg);
    let counter = Rc::clone(&cg_iterations);
    let boundary = range.clone();
    imex.setup(
        move |out: &mut Vector, _t, y: &Vector| {
            let u = y.local_slice()?;
            let mut o = out.local_slice_mut()?;
            for (o, u) in o.iter_mut().zip(u.iter()) {
                *o = reaction * u * (1.0 - u);
            }
            Ok(())
        },
        move |y: &mut Vector, t, a, rhs: &Vector| {
            // Boundary values at the new time enter the right-hand side.
            let mut b = rhs.try_clone()?;
            {
                let mut local = b.local_slice_mut()?;
                let c = a * wave.diffusion / (wave.h * wave.h);
                if boundary.start == 0 {
                    local[0] += c * wave.exact(-wave.h, t);
                }
                if boundary.end == wave.n {
                    let last = local.len() - 1;
                    local[last] += c * wave.exact(wave.n as Real * wave.h, t);
                }
            }

            solver.setup(Rc::new(ShiftedOperator::identity_minus(Rc::clone(&lap), a)));
            let guess = y.try_clone()?;
            let report = solver.solve(y, &b, Some(&guess))?;
            counter.set(counter.get() + report.iterations);
            Ok(())
        },
    );
    imex.initial_values(config.t0, &u0)?;

    let expected_steps = ((config.t_end - config.t0) / config.dt).ceil().max(1.0) as usize;
    let log_every = (expected_steps / 10).max(1);
    let mut u = u0.duplicate()?;
    let mut step = 0;
    imex.integrate_with_observer(&mut u, config.t_end, |t, _| {
        step += 1;
        if step % log_every == 0 {
            debug!(t, step, "Fisher-KPP progress");
        }
        Ok(())
    })?;

    let mut error = Vector::from_local_values(
        spec.clone(),
        config.backend,
        &wave.sample(range, config.t_end),
    )?;
    error.add_scaled(-1.0, &u)?;
    let mut ones = u.duplicate()?;
    ones.fill(1.0)?;

    Ok(FisherSummary {
        n: config.n,
        ranks: spec.comm().size(),
        backend: config.backend,
        t: imex.time(),
        steps: imex.steps_taken(),
        cg_iterations: cg_iterations.get(),
        norm: u.l2_norm()?,
        mass: wave.h * u.dot(&ones)?,
        error_l2: wave.h.sqrt() * error.l2_norm()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> FisherConfig {
        FisherConfig {
            n: 16,
            t_end: 0.5,
            dt: 0.01,
            ..FisherConfig::default()
        }
    }

    #[test]
    fn tracks_the_exact_wave() {
        let summary = run(&small()).unwrap();
        assert_eq!(summary.t, 0.5);
        assert_eq!(summary.steps, 50);
        assert!(summary.cg_iterations > 0);
        assert!(summary.error_l2 < 1e-3, "error {}", summary.error_l2);
    }

    #[test]
    fn error_is_first_order_in_time() {
        let coarse = run(&small()).unwrap();
        let fine = run(&FisherConfig {
            dt: 0.005,
            ..small()
        })
        .unwrap();
        let ratio = coarse.error_l2 / fine.error_l2;
        assert!((1.6..2.4).contains(&ratio), "ratio {ratio}");
    }

    #[test]
    fn thread_group_matches_serial() {
        for backend in [Backend::Dense, Backend::RefVec] {
            let serial = run(&FisherConfig {
                backend,
                ..small()
            })
            .unwrap();
            let grouped = run(&FisherConfig {
                backend,
                ranks: 3,
                ..small()
            })
            .unwrap();
            assert_eq!(grouped.ranks, 3);
            assert_eq!(grouped.steps, serial.steps);
            assert!((grouped.norm - serial.norm).abs() < 1e-9);
            assert!((grouped.mass - serial.mass).abs() < 1e-9);
            assert!((grouped.error_l2 - serial.error_l2).abs() < 1e-9);
        }
    }

    #[test]
    fn edges_exchanged_between_neighbours() {
        let edges = Comm::spawn_group(3, |comm| {
            let local: Vec<Real> = vec![comm.rank() as Real * 10.0, comm.rank() as Real * 10.0 + 1.0];
            exchange_edges(&comm, &local)
        })
        .unwrap();
        assert_eq!(
            edges,
            vec![(None, Some(10.0)), (Some(1.0), Some(20.0)), (Some(11.0), None)]
        );
    }
}
