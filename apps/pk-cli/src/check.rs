//! Observed consistency order of the IMEX Euler integrator on `y' = alpha y`.

use crate::error::CliResult;
use pk_core::Real;
use pk_la::{Backend, Vector, VectorSpec};
use pk_ode::{ImexConfig, ImexEuler};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrderReport {
    pub alpha: Real,
    pub dt: Real,
    pub t_end: Real,
    /// Error at `t_end` with step `dt`
    pub error_dt: Real,
    /// Error at `t_end` with step `dt / 2`
    pub error_half_dt: Real,
    pub order: Real,
}

fn final_error(alpha: Real, dt: Real, t_end: Real, backend: Backend) -> CliResult<Real> {
    let mut imex = ImexEuler::new(ImexConfig {
        dt,
        ..ImexConfig::default()
    });
    imex.setup(
        |out: &mut Vector, _t, _y: &Vector| Ok(out.set_zero()?),
        move |y: &mut Vector, _t, a, rhs: &Vector| {
            y.assign(rhs)?;
            y.scale(1.0 / (1.0 - a * alpha))?;
            Ok(())
        },
    );

    let y0 = Vector::from_local_values(VectorSpec::serial(1), backend, &[1.0])?;
    imex.initial_values(0.0, &y0)?;
    let mut y = y0.duplicate()?;
    imex.integrate(&mut y, t_end)?;

    let approx = y.to_local_vec()?[0];
    Ok((approx - (alpha * t_end).exp()).abs())
}

/// Integrate with `dt` and `dt / 2` and compare against `exp(alpha t)`.
pub fn observed_order(alpha: Real, dt: Real, t_end: Real, backend: Backend) -> CliResult<OrderReport> {
    let error_dt = final_error(alpha, dt, t_end, backend)?;
    let error_half_dt = final_error(alpha, dt / 2.0, t_end, backend)?;
    Ok(OrderReport {
        alpha,
        dt,
        t_end,
        error_dt,
        error_half_dt,
        order: (error_dt / error_half_dt).log2(),
    })
}
