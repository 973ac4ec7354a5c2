use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the collaborators a unit leans on (temp dirs, env, config, threads).
///
/// None of these reach a unit body directly: the reporting surface turns them
/// into `fatal` or `error` calls. They are public so the helpers can be used on
/// their own and so the binary can report configuration problems.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("TempDir: {path}: {source}")]
    TempDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("TempDir cleanup: {path}: {source}")]
    RemoveTimeout {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Setenv {key}: {reason}")]
    Env { key: String, reason: String },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("failed to spawn execution context {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl From<config::ConfigError> for UnitError {
    fn from(e: config::ConfigError) -> Self {
        UnitError::Config(e.to_string())
    }
}

pub type Result<T, E = UnitError> = std::result::Result<T, E>;
