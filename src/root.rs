//! Root units: wrap a whole batch run and produce a process exit code
//!
//! The root unit is the Rust counterpart of a `TestMain`: setup code runs in
//! the unit body, calls [`MainUnit::run`] to execute the batch, and registers
//! cleanups that run after the batch. Faults are never absorbed here; they
//! are re-raised on the caller's thread once teardown has finished.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use crate::config::Config;
use crate::logger::{Logger, TracingLogger};
use crate::status::Status;
use crate::unit::{Escalation, Reporter, Unit};

pub const DEFAULT_MAIN_NAME: &str = "testunit.Main";

/// Process exit code for a failed run when the runner itself reported success
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_SUCCESS: i32 = 0;

/// The externally supplied batch runner, e.g. a test suite driver
pub trait BatchRunner: Send + 'static {
    /// Run the batch and return its exit code
    fn run(&mut self) -> i32;
}

impl<F> BatchRunner for F
where
    F: FnMut() -> i32 + Send + 'static,
{
    fn run(&mut self) -> i32 {
        self()
    }
}

/// Handle passed to the root setup callback
#[derive(Clone)]
pub struct MainUnit {
    unit: Unit,
    runner: Arc<Mutex<Box<dyn BatchRunner>>>,
    code: Arc<Mutex<Option<i32>>>,
}

impl MainUnit {
    /// Run the batch unless the unit has already failed
    ///
    /// A unit that failed during setup stops here via `fail_now`, so the batch
    /// never starts from a known-bad state.
    pub fn run(&self) -> i32 {
        if self.failed() {
            warn!(unit = self.name(), "unit already failed, batch runner not started");
            self.fail_now();
        }

        let code = self
            .runner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .run();
        *self.code.lock().unwrap_or_else(PoisonError::into_inner) = Some(code);
        info!(unit = self.name(), code, "batch runner finished");
        code
    }

    /// Exit code of the last batch run, if any
    pub fn runner_code(&self) -> Option<i32> {
        *self.code.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Reporter for MainUnit {
    fn unit(&self) -> &Unit {
        &self.unit
    }
}

impl fmt::Debug for MainUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainUnit")
            .field("unit", &self.unit)
            .field("code", &self.runner_code())
            .finish()
    }
}

/// Map the final status and runner code onto a process exit code
pub fn exit_code(status: Status, runner_code: Option<i32>) -> i32 {
    let code = runner_code.unwrap_or(EXIT_SUCCESS);
    if status.failed {
        if code == EXIT_SUCCESS {
            EXIT_FAILURE
        } else {
            code
        }
    } else if status.skipped {
        EXIT_SUCCESS
    } else {
        code
    }
}

/// Builder for running a root unit
pub struct MainBuilder {
    name: String,
    config: Config,
    logger: Arc<dyn Logger>,
}

impl Default for MainBuilder {
    fn default() -> Self {
        Self {
            name: DEFAULT_MAIN_NAME.to_string(),
            config: Config::default(),
            logger: Arc::new(TracingLogger),
        }
    }
}

impl MainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Where the unit's own log lines go (tracing by default)
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Run `setup` as the root unit body and return the process exit code
    ///
    /// If a fault occurred in `setup` or any cleanup action, it is re-raised
    /// here after teardown instead of being turned into an exit code. A run
    /// that ends failed logs `FAIL` through the unit's logger.
    pub fn run<R, F>(self, runner: R, setup: F) -> i32
    where
        R: BatchRunner,
        F: FnOnce(&MainUnit) + Send + 'static,
    {
        let unit = Unit::builder(self.name, self.logger)
            .escalation(Escalation::Propagate)
            .config(self.config)
            .build();
        let m = MainUnit {
            unit,
            runner: Arc::new(Mutex::new(Box::new(runner))),
            code: Arc::new(Mutex::new(None)),
        };

        let handle = m.clone();
        if let Some(fault) = m.unit.execute(move || setup(&handle)) {
            fault.resume();
        }

        if m.failed() {
            m.log("FAIL");
        }

        let code = exit_code(m.unit.status(), m.runner_code());
        info!(unit = m.name(), code, "root unit finished");
        code
    }
}

/// Run `setup` as a root unit with default settings
pub fn run_main<R, F>(runner: R, setup: F) -> i32
where
    R: BatchRunner,
    F: FnOnce(&MainUnit) + Send + 'static,
{
    MainBuilder::new().run(runner, setup)
}
