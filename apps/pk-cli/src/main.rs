mod check;
mod config;
mod error;
mod fisher;

use clap::{Parser, Subcommand};
use config::FisherConfig;
use error::{CliError, CliResult};
use pk_la::Backend;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pk-cli")]
#[command(about = "PDE kit CLI - IMEX time stepping on distributed vectors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve the 1D Fisher-KPP equation and compare with the traveling wave
    Fisher {
        /// YAML configuration file (flags override its values)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of grid points
        #[arg(long)]
        n: Option<usize>,
        /// Time step
        #[arg(long)]
        dt: Option<f64>,
        /// End time
        #[arg(long)]
        t_end: Option<f64>,
        /// Vector storage: dense or refvec
        #[arg(long)]
        backend: Option<Backend>,
        /// Number of ranks in the thread process group
        #[arg(long)]
        ranks: Option<usize>,
        /// Write the run summary as JSON to this file
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Measure the consistency order of IMEX Euler on y' = alpha y
    Check {
        #[arg(long, default_value_t = 1.0)]
        alpha: f64,
        #[arg(long, default_value_t = 1e-4)]
        dt: f64,
        #[arg(long, default_value_t = 0.1)]
        t_end: f64,
        #[arg(long, default_value_t = Backend::Dense)]
        backend: Backend,
        /// Write the order report as JSON to this file
        #[arg(long)]
        json: Option<PathBuf>,
    },
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fisher {
            config,
            n,
            dt,
            t_end,
            backend,
            ranks,
            json,
        } => {
            let mut cfg = match config {
                Some(path) => FisherConfig::load(&path)?,
                None => FisherConfig::default(),
            };
            if let Some(n) = n {
                cfg.n = n;
            }
            if let Some(dt) = dt {
                cfg.dt = dt;
            }
            if let Some(t_end) = t_end {
                cfg.t_end = t_end;
            }
            if let Some(backend) = backend {
                cfg.backend = backend;
            }
            if let Some(ranks) = ranks {
                cfg.ranks = ranks;
            }
            cmd_fisher(&cfg, json.as_deref())
        }
        Commands::Check {
            alpha,
            dt,
            t_end,
            backend,
            json,
        } => cmd_check(alpha, dt, t_end, backend, json.as_deref()),
    }
}

fn cmd_fisher(config: &FisherConfig, json: Option<&Path>) -> CliResult<()> {
    println!("Fisher-KPP on [0, {}] with {} points", config.length, config.n);
    println!(
        "  backend = {}, ranks = {}, dt = {}, t_end = {}",
        config.backend, config.ranks, config.dt, config.t_end
    );

    let summary = fisher::run(config)?;

    println!("✓ Reached t = {} in {} steps", summary.t, summary.steps);
    println!("  CG iterations: {}", summary.cg_iterations);
    println!("  ‖u‖     = {:.6e}", summary.norm);
    println!("  mass    = {:.6e}", summary.mass);
    println!("  ‖e‖_L2  = {:.6e}", summary.error_l2);

    if let Some(path) = json {
        write_json(path, &summary)?;
        println!("  summary written to {}", path.display());
    }
    Ok(())
}

fn cmd_check(
    alpha: f64,
    dt: f64,
    t_end: f64,
    backend: Backend,
    json: Option<&Path>,
) -> CliResult<()> {
    let report = check::observed_order(alpha, dt, t_end, backend)?;
    println!("IMEX Euler on y' = {alpha} y, t_end = {t_end}");
    println!("  error(dt = {dt})   = {:.6e}", report.error_dt);
    println!("  error(dt = {})  = {:.6e}", dt / 2.0, report.error_half_dt);
    println!("  observed order     = {:.6}", report.order);

    if let Some(path) = json {
        write_json(path, &report)?;
        println!("  report written to {}", path.display());
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> CliResult<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).map_err(|source| CliError::Write {
        path: path.to_path_buf(),
        source,
    })
}
