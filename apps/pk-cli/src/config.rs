//! YAML configuration for the Fisher-KPP demo.

use crate::error::{CliError, CliResult};
use pk_la::{Backend, CgConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters of `u_t = D u_xx + r u (1 - u)` on `[0, length]`.
///
/// Every field has a default, so a file only needs the values it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FisherConfig {
    /// Number of grid points
    pub n: usize,
    /// Domain length
    pub length: f64,
    /// Diffusion coefficient D
    pub diffusion: f64,
    /// Reaction rate r
    pub reaction: f64,
    pub t0: f64,
    pub t_end: f64,
    pub dt: f64,
    pub backend: Backend,
    /// Size of the thread process group
    pub ranks: usize,
    pub cg: CgConfig,
}

impl Default for FisherConfig {
    fn default() -> Self {
        Self {
            n: 64,
            length: 1.0,
            diffusion: 1.0,
            reaction: 1.0,
            t0: 0.0,
            t_end: 1.0,
            dt: 0.01,
            backend: Backend::Dense,
            ranks: 1,
            cg: CgConfig::default(),
        }
    }
}

impl FisherConfig {
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CliError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> CliResult<Self> {
        let config: FisherConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> CliResult<()> {
        if self.n < 2 {
            return Err(CliError::Config {
                what: "n must be at least 2",
            });
        }
        if self.ranks == 0 || self.ranks > self.n {
            return Err(CliError::Config {
                what: "ranks must be between 1 and n",
            });
        }
        pk_core::ensure_positive(self.length, "length")?;
        pk_core::ensure_positive(self.diffusion, "diffusion")?;
        pk_core::ensure_finite(self.reaction, "reaction")?;
        pk_core::ensure_positive(self.dt, "dt")?;
        pk_core::ensure_finite(self.t0, "t0")?;
        pk_core::ensure_finite(self.t_end, "t_end")?;
        if self.t_end < self.t0 {
            return Err(CliError::Config {
                what: "t_end must not precede t0",
            });
        }
        self.cg.validate()?;
        Ok(())
    }

    /// Grid spacing; the ghost points sit at `-h` and `n h`.
    pub fn h(&self) -> f64 {
        self.length / (self.n - 1) as f64
    }
}
