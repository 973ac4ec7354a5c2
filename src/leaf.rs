//! Leaf units: one isolated test body with buffered output
//!
//! ```rust,no_run
//! use testunit_core::{run_test, Reporter};
//!
//! let result = run_test(|t| {
//!     let handle = t.clone();
//!     t.cleanup(move || handle.log("cleaned up"));
//!     t.error("something is off");
//! });
//! assert!(result.failed());
//! assert!(result.logs().contains("cleaned up"));
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::logger::BufferLogger;
use crate::status::Status;
use crate::unit::{Escalation, Reporter, Unit};

pub const DEFAULT_TEST_NAME: &str = "testunit.Test";

/// Handle passed to a leaf body; clone it into cleanup actions
#[derive(Clone, Debug)]
pub struct TestUnit {
    unit: Unit,
    out: Arc<BufferLogger>,
}

impl TestUnit {
    /// Everything logged so far
    pub fn output(&self) -> String {
        self.out.contents()
    }
}

impl Reporter for TestUnit {
    fn unit(&self) -> &Unit {
        &self.unit
    }
}

/// Immutable record of a finished leaf unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: Uuid,
    pub name: String,
    pub status: Status,
    pub logs: String,
    /// Message of the last fault intercepted in the body or teardown
    pub cause: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TestResult {
    pub fn failed(&self) -> bool {
        self.status.failed
    }

    pub fn skipped(&self) -> bool {
        self.status.skipped
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn logs(&self) -> &str {
        &self.logs
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Builder for running a leaf unit
#[derive(Debug, Default)]
pub struct TestBuilder {
    name: Option<String>,
    config: Option<Config>,
}

impl TestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Run `body` to completion, teardown included
    ///
    /// Never unwinds into the caller: stop signals end the body, faults in the
    /// body or a cleanup action are logged and mark the result failed.
    pub fn run<F>(self, body: F) -> TestResult
    where
        F: FnOnce(&TestUnit) + Send + 'static,
    {
        let out = Arc::new(BufferLogger::new());
        let unit = Unit::builder(
            self.name.unwrap_or_else(|| DEFAULT_TEST_NAME.to_string()),
            out.clone(),
        )
        .escalation(Escalation::Absorb)
        .config(self.config.unwrap_or_default())
        .build();
        let t = TestUnit { unit, out };

        let started_at = Utc::now();
        let handle = t.clone();
        let fault = t.unit.execute(move || body(&handle));
        let finished_at = Utc::now();

        TestResult {
            id: t.unit.id(),
            name: t.name().to_string(),
            status: t.unit.status(),
            logs: t.output(),
            cause: fault.map(|f| f.message().to_string()),
            started_at,
            finished_at,
        }
    }
}

/// Run `body` as a leaf unit with default settings
pub fn run_test<F>(body: F) -> TestResult
where
    F: FnOnce(&TestUnit) + Send + 'static,
{
    TestBuilder::new().run(body)
}

#[cfg(test)]
#[path = "leaf_tests.rs"]
mod tests;
