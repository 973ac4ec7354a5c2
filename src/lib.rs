//! Test-unit controller
//!
//! Runs test-like code on an isolated thread behind a test-reporting surface
//! (`fail`, `skip`, `log`, `cleanup`, ...). Stopping a unit early or panicking
//! inside it never takes the caller down: leaf units turn faults into a
//! failed [`TestResult`], root units re-raise them after teardown.

pub mod cleanup;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod leaf;
pub mod logger;
pub mod root;
pub mod status;
pub mod telemetry;
pub mod tempdir;
pub mod unit;

// Re-export main types
pub use config::Config;
pub use error::UnitError;
pub use leaf::{run_test, TestBuilder, TestResult, TestUnit};
pub use root::{run_main, BatchRunner, MainBuilder, MainUnit};
pub use status::Status;
pub use unit::{Escalation, Reporter, Unit};
