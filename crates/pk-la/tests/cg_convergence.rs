//! CG on serial and thread-group vectors, for both storage variants.

use pk_core::{Comm, Real};
use pk_la::{
    Backend, CgConfig, CgSolver, LaError, SharedOperator, ShiftedOperator, Vector, VectorSpec,
    shared_operator,
};
use std::rc::Rc;

/// Diagonal operator with entries `d(i)` for global index `i`.
fn diagonal(spec: &VectorSpec, d: impl Fn(usize) -> Real) -> SharedOperator {
    let diag: Vec<Real> = spec.local_range().map(d).collect();
    shared_operator(move |out: &mut Vector, input: &Vector| {
        let x = input.local_slice()?;
        let mut o = out.local_slice_mut()?;
        for ((o, x), d) in o.iter_mut().zip(x.iter()).zip(&diag) {
            *o = d * x;
        }
        Ok(())
    })
}

/// Dirichlet 1D Laplacian `-u'' h^2` on a serial vector.
fn laplacian() -> SharedOperator {
    shared_operator(|out: &mut Vector, input: &Vector| {
        let u = input.local_slice()?;
        let mut o = out.local_slice_mut()?;
        let n = u.len();
        for i in 0..n {
            let left = if i > 0 { u[i - 1] } else { 0.0 };
            let right = if i + 1 < n { u[i + 1] } else { 0.0 };
            o[i] = 2.0 * u[i] - left - right;
        }
        Ok(())
    })
}

#[test]
fn diagonal_solution_recovered_within_n_iterations() {
    for backend in [Backend::Dense, Backend::RefVec] {
        let n = 8;
        let spec = VectorSpec::serial(n);
        let mut solver = CgSolver::new(CgConfig::default());
        solver.setup(diagonal(&spec, |i| 1.0 + i as Real));

        let expected: Vec<Real> = (0..n).map(|i| (i as Real).sin()).collect();
        let rhs_values: Vec<Real> = expected
            .iter()
            .enumerate()
            .map(|(i, x)| (1.0 + i as Real) * x)
            .collect();
        let rhs = Vector::from_local_values(spec.clone(), backend, &rhs_values).unwrap();
        let mut y = Vector::new(spec, backend).unwrap();

        let report = solver.solve(&mut y, &rhs, None).unwrap();
        assert!(report.iterations <= n, "{backend}: {report:?}");
        for (got, want) in y.to_local_vec().unwrap().iter().zip(&expected) {
            assert!((got - want).abs() < 1e-9, "{backend}: {got} vs {want}");
        }
    }
}

#[test]
fn laplacian_residual_meets_tolerance() {
    let n = 50;
    let spec = VectorSpec::serial(n);
    let config = CgConfig {
        abs_tol: 1e-14,
        rel_tol: 1e-10,
        ..CgConfig::default()
    };
    let mut solver = CgSolver::new(config);
    let op = laplacian();
    solver.setup(Rc::clone(&op));

    let mut rhs = Vector::new(spec.clone(), Backend::RefVec).unwrap();
    rhs.fill(1.0).unwrap();
    let mut y = rhs.duplicate().unwrap();
    let report = solver.solve(&mut y, &rhs, None).unwrap();
    assert!(report.residual <= config.rel_tol * report.initial_residual);

    // Independent check of the residual.
    let mut ay = y.duplicate().unwrap();
    op.apply(&mut ay, &y).unwrap();
    ay.add_scaled(-1.0, &rhs).unwrap();
    assert!(ay.l2_norm().unwrap() <= 1e-8);
}

#[test]
fn exact_initial_guess_exits_early() {
    let spec = VectorSpec::serial(4);
    let mut solver = CgSolver::new(CgConfig::default());
    solver.setup(diagonal(&spec, |_| 3.0));

    let guess =
        Vector::from_local_values(spec.clone(), Backend::Dense, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let mut rhs = guess.try_clone().unwrap();
    rhs.scale(3.0).unwrap();
    let mut y = guess.duplicate().unwrap();

    let report = solver.solve(&mut y, &rhs, Some(&guess)).unwrap();
    assert_eq!(report.iterations, 0);
    assert_eq!(y.to_local_vec().unwrap(), guess.to_local_vec().unwrap());
}

#[test]
fn shifted_operator_solves_backward_euler_system() {
    // (I - a L) y = rhs with L = -diag(2): y = rhs / (1 + 2a)
    let spec = VectorSpec::serial(3);
    let a = 0.5;
    let minus_two = diagonal(&spec, |_| -2.0);
    let mut solver = CgSolver::new(CgConfig::default());
    solver.setup(Rc::new(ShiftedOperator::identity_minus(minus_two, a)));

    let rhs = Vector::from_local_values(spec, Backend::Dense, &[2.0, 4.0, 6.0]).unwrap();
    let mut y = rhs.duplicate().unwrap();
    solver.solve(&mut y, &rhs, None).unwrap();
    for (got, want) in y.to_local_vec().unwrap().iter().zip([1.0, 2.0, 3.0]) {
        assert!((got - want).abs() < 1e-12);
    }
}

#[test]
fn iteration_cap_reports_failure() {
    let n = 30;
    let mut solver = CgSolver::new(CgConfig {
        max_iterations: 3,
        ..CgConfig::default()
    });
    solver.setup(laplacian());
    let mut rhs = Vector::new(VectorSpec::serial(n), Backend::Dense).unwrap();
    rhs.fill(1.0).unwrap();
    let mut y = rhs.duplicate().unwrap();

    let err = solver.solve(&mut y, &rhs, None).unwrap_err();
    assert!(matches!(err, LaError::NotConverged { iterations: 3, .. }));
    assert!(err.is_recoverable());
}

#[test]
fn mismatched_variants_are_rejected() {
    let spec = VectorSpec::serial(2);
    let mut solver = CgSolver::new(CgConfig::default());
    solver.setup(diagonal(&spec, |_| 1.0));

    let rhs = Vector::from_local_values(spec.clone(), Backend::Dense, &[1.0, 1.0]).unwrap();
    let mut y = Vector::new(spec, Backend::RefVec).unwrap();
    let err = solver.solve(&mut y, &rhs, None).unwrap_err();
    assert!(matches!(err, LaError::TypeMismatch { .. }));
}

#[test]
fn distributed_solve_matches_serial() {
    let n = 13;
    let d = |i: usize| 2.0 + (i % 5) as Real;
    let f = |i: usize| 1.0 - 0.1 * i as Real;

    for backend in [Backend::Dense, Backend::RefVec] {
        let per_rank = Comm::spawn_group(3, |comm| -> Result<(Vec<Real>, usize), LaError> {
            let spec = VectorSpec::distributed(comm, n);
            let mut solver = CgSolver::new(CgConfig::default());
            solver.setup(diagonal(&spec, d));

            let values: Vec<Real> = spec.local_range().map(f).collect();
            let rhs = Vector::from_local_values(spec.clone(), backend, &values)?;
            let mut y = Vector::new(spec, backend)?;
            let report = solver.solve(&mut y, &rhs, None)?;
            Ok((y.to_local_vec()?, report.iterations))
        })
        .unwrap();

        let mut gathered = Vec::new();
        let mut iterations = Vec::new();
        for result in per_rank {
            let (local, its) = result.unwrap();
            gathered.extend(local);
            iterations.push(its);
        }

        assert_eq!(gathered.len(), n);
        // Reductions are collective, so every rank takes the same path.
        assert!(iterations.windows(2).all(|w| w[0] == w[1]));
        for (i, got) in gathered.iter().enumerate() {
            let want = f(i) / d(i);
            assert!((got - want).abs() < 1e-9, "{backend} entry {i}");
        }
    }
}
