//! Error type for the command-line driver.

use pk_core::PkError;
use pk_la::LaError;
use pk_ode::OdeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {what}")]
    Config { what: &'static str },

    #[error(transparent)]
    Ode(#[from] OdeError),

    #[error(transparent)]
    La(#[from] LaError),

    #[error(transparent)]
    Core(#[from] PkError),
}

pub type CliResult<T> = Result<T, CliError>;
