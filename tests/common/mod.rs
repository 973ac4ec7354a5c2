//! Shared helpers for integration tests

#![allow(dead_code)]

use std::path::Path;
use std::process::{Command, Output};
use std::sync::Once;

use tempfile::TempDir;

static INIT_LOGGING: Once = Once::new();

/// Library events at warn, unit output lines at info
pub const QUIET_FILTER: &str = "warn,testunit::output=info";

/// Route library tracing output through the test harness capture
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Run the `testunit` binary in an empty working directory
///
/// The directory keeps stray `testunit.toml` and `.env` files out of the run.
pub fn run_bin(args: &[&str]) -> (Output, TempDir) {
    let workdir = tempfile::tempdir().expect("create workdir");
    let output = bin_command(workdir.path())
        .args(args)
        .output()
        .expect("spawn testunit binary");
    (output, workdir)
}

fn bin_command(workdir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_testunit"));
    cmd.current_dir(workdir)
        .env_remove("TESTUNIT_CONFIG_PATH")
        .env_remove("RUST_LOG")
        .env("TESTUNIT_LOG__FILTER", QUIET_FILTER);
    cmd
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
