//! Execution unit and its reporting surface
//!
//! A [`Unit`] owns the status bits, the cleanup stack, the temp dir state and
//! the logger for one run of test-like code. It is a cheap, cloneable handle so
//! that cleanup actions (plain `FnOnce()` closures) can capture the unit they
//! belong to.
//!
//! The [`Reporter`] trait is the surface unit bodies and cleanup actions use.
//! Leaf and root units implement it by pointing at their inner `Unit`.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::cleanup::CleanupStack;
use crate::config::Config;
use crate::error::{Result, UnitError};
use crate::executor::{raise_stop, run_isolated, Fault, Outcome};
use crate::logger::Logger;
use crate::status::{Status, StatusTracker};
use crate::tempdir;

/* ===================== Policy ===================== */

/// What a unit does with a fault intercepted in its body or teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Log it and mark the unit failed (leaf units)
    Absorb,
    /// Mark the unit failed and hand the fault back for re-raising (root units)
    Propagate,
}

/* ===================== Unit ===================== */

struct UnitCore {
    id: Uuid,
    name: String,
    escalation: Escalation,
    config: Config,
    logger: Arc<dyn Logger>,
    status: StatusTracker,
    cleanups: CleanupStack,
    temp: Mutex<TempState>,
}

#[derive(Default)]
struct TempState {
    base: Option<PathBuf>,
    seq: u32,
}

/// Shared handle to one execution unit
#[derive(Clone)]
pub struct Unit {
    core: Arc<UnitCore>,
}

impl Unit {
    pub fn builder(name: impl Into<String>, logger: Arc<dyn Logger>) -> UnitBuilder {
        UnitBuilder::new(name, logger)
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn escalation(&self) -> Escalation {
        self.core.escalation
    }

    pub fn config(&self) -> &Config {
        &self.core.config
    }

    pub fn status(&self) -> Status {
        self.core.status.snapshot()
    }

    /// Number of cleanup actions waiting to run
    pub fn pending_cleanups(&self) -> usize {
        self.core.cleanups.len()
    }

    /// Run `body` isolated, then drain the cleanup stack
    ///
    /// Blocks until teardown is complete. Returns the last fault observed in
    /// the body or any cleanup action, after the escalation policy has been
    /// applied to every observed fault.
    pub fn execute<F>(&self, body: F) -> Option<Fault>
    where
        F: FnOnce() + Send + 'static,
    {
        let span = info_span!("unit", name = %self.core.name, id = %self.core.id);
        let _entered = span.enter();
        let stack_size = self.core.config.executor.stack_size;

        info!("unit started");
        let mut last_fault = match run_isolated(&self.core.name, stack_size, body) {
            Outcome::Completed(()) => None,
            Outcome::Stopped => {
                debug!(status = ?self.status(), "unit body stopped");
                None
            }
            Outcome::Faulted(fault) => {
                self.intercept(&fault);
                Some(fault)
            }
        };

        for fault in self.core.cleanups.teardown(&self.core.name, stack_size) {
            self.intercept(&fault);
            last_fault = Some(fault);
        }

        let status = self.status();
        info!(failed = status.failed, skipped = status.skipped, "unit finished");
        last_fault
    }

    fn intercept(&self, fault: &Fault) {
        match self.core.escalation {
            Escalation::Absorb => {
                warn!(fault = %fault, "unit faulted");
                self.error(format_args!("panic: {fault}"));
            }
            Escalation::Propagate => {
                error!(fault = %fault, "unit faulted");
                self.fail();
            }
        }
    }

    fn make_temp_dir(&self) -> Result<PathBuf> {
        let settings = &self.core.config.temp_dir;
        let mut temp = self.core.temp.lock().unwrap_or_else(PoisonError::into_inner);

        let base = match temp.base.clone() {
            Some(base) if tempdir::base_exists(&base)? => base,
            _ => {
                let base = tempdir::create_base(settings)?;
                self.register_removal(base.clone());
                temp.base = Some(base.clone());
                base
            }
        };

        let seq = temp.seq;
        temp.seq += 1;
        tempdir::create_subdir(&base, seq)
    }

    fn register_removal(&self, base: PathBuf) {
        let unit = Arc::downgrade(&self.core);
        let timeout = self.core.config.temp_dir.removal_timeout();
        self.core.cleanups.register(move || {
            if let Err(e) = tempdir::remove_all(&base, timeout) {
                if let Some(unit) = upgrade(&unit) {
                    unit.error(e);
                }
            }
        });
    }

    fn set_env(&self, key: &str, value: &str) -> Result<()> {
        validate_env(key, value)?;

        let previous = std::env::var_os(key);
        std::env::set_var(key, value);
        debug!(key, "environment variable set");

        let key = key.to_string();
        self.cleanup(move || restore_env(&key, previous));
        Ok(())
    }
}

fn upgrade(weak: &Weak<UnitCore>) -> Option<Unit> {
    weak.upgrade().map(|core| Unit { core })
}

fn validate_env(key: &str, value: &str) -> Result<()> {
    let reason = if key.is_empty() {
        Some("empty key")
    } else if key.contains('=') {
        Some("key contains '='")
    } else if key.contains('\0') || value.contains('\0') {
        Some("NUL byte")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(UnitError::Env {
            key: key.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn restore_env(key: &str, previous: Option<OsString>) {
    match previous {
        Some(value) => std::env::set_var(key, value),
        None => std::env::remove_var(key),
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("escalation", &self.core.escalation)
            .field("status", &self.status())
            .finish()
    }
}

/* ===================== Builder ===================== */

pub struct UnitBuilder {
    name: String,
    logger: Arc<dyn Logger>,
    escalation: Escalation,
    config: Config,
}

impl UnitBuilder {
    pub fn new(name: impl Into<String>, logger: Arc<dyn Logger>) -> Self {
        Self {
            name: name.into(),
            logger,
            escalation: Escalation::Absorb,
            config: Config::default(),
        }
    }

    pub fn escalation(mut self, escalation: Escalation) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Unit {
        Unit {
            core: Arc::new(UnitCore {
                id: Uuid::new_v4(),
                name: self.name,
                escalation: self.escalation,
                config: self.config,
                logger: self.logger,
                status: StatusTracker::new(),
                cleanups: CleanupStack::new(),
                temp: Mutex::new(TempState::default()),
            }),
        }
    }
}

/* ===================== Reporting Surface ===================== */

/// Test-reporting surface shared by every unit kind
///
/// `fail_now`, `fatal`, `skip` and `skip_now` stop the calling context: call
/// them from the unit body or a cleanup action, never from a thread the body
/// spawned itself. Messages take anything `Display`; use `format_args!` for
/// formatted output.
pub trait Reporter {
    fn unit(&self) -> &Unit;

    fn name(&self) -> &str {
        &self.unit().core.name
    }

    /// Mark failed and keep going
    fn fail(&self) {
        self.unit().core.status.fail();
    }

    fn failed(&self) -> bool {
        self.unit().core.status.failed()
    }

    /// Mark failed and stop the current context
    fn fail_now(&self) -> ! {
        self.fail();
        raise_stop()
    }

    fn error(&self, message: impl fmt::Display) {
        self.log(message);
        self.fail();
    }

    fn fatal(&self, message: impl fmt::Display) -> ! {
        self.log(message);
        self.fail_now()
    }

    fn skip(&self, message: impl fmt::Display) -> ! {
        self.log(message);
        self.skip_now()
    }

    /// Mark skipped and stop the current context
    fn skip_now(&self) -> ! {
        self.unit().core.status.skip();
        raise_stop()
    }

    fn skipped(&self) -> bool {
        self.unit().core.status.skipped()
    }

    fn log(&self, message: impl fmt::Display) {
        let core = &self.unit().core;
        core.logger.log(&core.name, &message.to_string());
    }

    /// Register an action to run at teardown, newest first
    fn cleanup(&self, action: impl FnOnce() + Send + 'static) {
        self.unit().core.cleanups.register(action);
    }

    /// New numbered directory inside this unit's temp dir
    ///
    /// The temp dir is removed at teardown. Creation errors are fatal.
    fn temp_dir(&self) -> PathBuf {
        match self.unit().make_temp_dir() {
            Ok(path) => path,
            Err(e) => self.fatal(e),
        }
    }

    /// Set an environment variable until teardown
    ///
    /// The previous value is restored (or the variable removed) by a
    /// registered cleanup action.
    fn setenv(&self, key: &str, value: &str) {
        if let Err(e) = self.unit().set_env(key, value) {
            self.fatal(e);
        }
    }
}

impl Reporter for Unit {
    fn unit(&self) -> &Unit {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::BufferLogger;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn buffered(name: &str) -> (Unit, Arc<BufferLogger>) {
        let logger = Arc::new(BufferLogger::new());
        let unit = Unit::builder(name, logger.clone()).build();
        (unit, logger)
    }

    #[test]
    fn test_fail_now_skips_rest_of_body_but_runs_cleanups() {
        let (unit, logger) = buffered("fail-now");
        let after = Arc::new(AtomicBool::new(false));
        let cleaned = Arc::new(AtomicBool::new(false));

        let t = unit.clone();
        let (after2, cleaned2) = (after.clone(), cleaned.clone());
        let fault = unit.execute(move || {
            let c = cleaned2.clone();
            t.cleanup(move || c.store(true, Ordering::SeqCst));
            let stop = || t.fail_now();
            stop();
            after2.store(true, Ordering::SeqCst);
        });

        assert!(fault.is_none());
        assert!(unit.failed());
        assert!(!unit.skipped());
        assert!(!after.load(Ordering::SeqCst));
        assert!(cleaned.load(Ordering::SeqCst));
        assert_eq!(logger.contents(), "");
    }

    #[test]
    fn test_absorbed_fault_is_logged_and_failed() {
        let (unit, logger) = buffered("absorb");
        let fault = unit.execute(|| panic!("kaput"));

        assert_eq!(fault.map(|f| f.message().to_string()).as_deref(), Some("kaput"));
        assert!(unit.failed());
        assert!(logger.contents().contains("panic: kaput"));
    }

    #[test]
    fn test_propagated_fault_is_not_logged_to_unit() {
        let logger = Arc::new(BufferLogger::new());
        let unit = Unit::builder("propagate", logger.clone())
            .escalation(Escalation::Propagate)
            .build();

        assert_eq!(unit.escalation(), Escalation::Propagate);

        let fault = unit.execute(|| panic!("escalate me"));
        assert_eq!(fault.expect("fault").message(), "escalate me");
        assert!(unit.failed());
        assert_eq!(logger.contents(), "");
    }

    #[test]
    fn test_temp_dir_reuses_base_and_is_removed() {
        let scratch = tempfile::tempdir().unwrap();
        let config = Config::builder()
            .env_vars(Default::default())
            .temp_root(scratch.path())
            .build()
            .unwrap();
        let logger = Arc::new(BufferLogger::new());
        let unit = Unit::builder("temp", logger).config(config).build();
        assert_eq!(unit.escalation(), Escalation::Absorb);
        assert_eq!(unit.config().temp_dir.root.as_deref(), Some(scratch.path()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (t, seen2) = (unit.clone(), seen.clone());
        unit.execute(move || {
            let first = t.temp_dir();
            let second = t.temp_dir();
            assert!(first.is_dir() && second.is_dir());
            seen2.lock().unwrap().extend([first, second]);
        });

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].parent(), seen[1].parent());
        assert!(seen[0].ends_with("000"));
        assert!(seen[1].ends_with("001"));
        assert!(!seen[0].parent().unwrap().exists());
        assert!(!unit.failed());
    }

    #[test]
    fn test_temp_dir_recreated_after_external_removal() {
        let scratch = tempfile::tempdir().unwrap();
        let config = Config::builder()
            .env_vars(Default::default())
            .temp_root(scratch.path())
            .build()
            .unwrap();
        let logger = Arc::new(BufferLogger::new());
        let unit = Unit::builder("temp-recreate", logger).config(config).build();

        let t = unit.clone();
        unit.execute(move || {
            let first = t.temp_dir();
            let base = first.parent().unwrap().to_path_buf();
            std::fs::remove_dir_all(&base).unwrap();

            let second = t.temp_dir();
            assert_ne!(second.parent().unwrap(), base);
            assert!(second.ends_with("001"));
            assert_eq!(t.pending_cleanups(), 2);
        });

        assert!(!unit.failed());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_setenv_restores_previous_state() {
        let set_key = "TESTUNIT_UNIT_SETENV_PREVIOUS";
        let new_key = "TESTUNIT_UNIT_SETENV_UNSET";
        std::env::set_var(set_key, "before");
        std::env::remove_var(new_key);

        let (unit, _) = buffered("setenv");
        let t = unit.clone();
        unit.execute(move || {
            t.setenv(set_key, "during");
            t.setenv(new_key, "during");
            assert_eq!(std::env::var(set_key).unwrap(), "during");
            assert_eq!(std::env::var(new_key).unwrap(), "during");
        });

        assert_eq!(std::env::var(set_key).unwrap(), "before");
        assert!(std::env::var_os(new_key).is_none());
        std::env::remove_var(set_key);
    }

    #[test]
    fn test_setenv_invalid_key_is_fatal() {
        let (unit, logger) = buffered("setenv-invalid");
        let t = unit.clone();
        unit.execute(move || t.setenv("BAD=KEY", "x"));

        assert!(unit.failed());
        assert!(logger.contents().contains("Setenv BAD=KEY"));
    }
}
