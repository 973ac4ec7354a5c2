//! Configuration loading
//!
//! Layered with the `config` crate, lowest priority first:
//!
//! 1. built-in defaults
//! 2. a TOML file: `testunit.toml` in the working directory (optional), or the
//!    file named by `TESTUNIT_CONFIG_PATH` / [`ConfigBuilder::config_path`]
//!    (required when given)
//! 3. environment variables, e.g. `TESTUNIT_TEMP_DIR__REMOVAL_TIMEOUT_MS=500`
//! 4. explicit builder overrides
//!
//! A `.env` file is read with `dotenvy` before the environment is consulted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use config::{Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UnitError};

pub const ENV_PREFIX: &str = "TESTUNIT";
pub const CONFIG_PATH_VAR: &str = "TESTUNIT_CONFIG_PATH";
const DEFAULT_FILE: &str = "testunit";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub temp_dir: TempDirConfig,
    pub executor: ExecutorConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempDirConfig {
    /// Parent for unit temp dirs; the OS temp dir when unset
    pub root: Option<PathBuf>,
    pub prefix: String,
    /// Upper bound for best-effort removal at teardown
    pub removal_timeout_ms: u64,
}

impl Default for TempDirConfig {
    fn default() -> Self {
        Self {
            root: None,
            prefix: "testunit-".to_string(),
            removal_timeout_ms: 2000,
        }
    }
}

impl TempDirConfig {
    pub fn removal_timeout(&self) -> Duration {
        Duration::from_millis(self.removal_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Stack size in bytes for unit and teardown threads
    pub stack_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.temp_dir.removal_timeout_ms == 0 {
            return Err(UnitError::Config(
                "temp_dir.removal_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(root) = &self.temp_dir.root {
            if !root.is_dir() {
                return Err(UnitError::Config(format!(
                    "temp_dir.root is not a directory: {}",
                    root.display()
                )));
            }
        }
        if self.executor.stack_size == Some(0) {
            return Err(UnitError::Config(
                "executor.stack_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`Config`] with explicit overrides
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    env_vars: Option<HashMap<String, String>>,
    temp_root: Option<PathBuf>,
    removal_timeout_ms: Option<u64>,
    log_filter: Option<String>,
}

impl ConfigBuilder {
    /// Config file to read (overrides default search)
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Read these variables instead of the process environment (and skip `.env`)
    pub fn env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env_vars = Some(vars);
        self
    }

    pub fn temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    pub fn removal_timeout_ms(mut self, ms: u64) -> Self {
        self.removal_timeout_ms = Some(ms);
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    pub fn build(self) -> Result<Config> {
        if self.env_vars.is_none() {
            // Missing .env is the normal case
            dotenvy::dotenv().ok();
        }

        let config_path = self.config_path.clone().or_else(|| {
            let from_env = match &self.env_vars {
                Some(vars) => vars.get(CONFIG_PATH_VAR).cloned(),
                None => std::env::var(CONFIG_PATH_VAR).ok(),
            };
            from_env.map(PathBuf::from)
        });

        let file = match &config_path {
            Some(path) => File::from(path.as_path()).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };

        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(self.env_vars.clone());

        let mut builder = config::Config::builder()
            .add_source(file)
            .add_source(environment);

        if let Some(root) = &self.temp_root {
            builder = builder.set_override("temp_dir.root", root.display().to_string())?;
        }
        if let Some(ms) = self.removal_timeout_ms {
            builder = builder.set_override("temp_dir.removal_timeout_ms", ms as i64)?;
        }
        if let Some(filter) = &self.log_filter {
            builder = builder.set_override("log.filter", filter.as_str())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
