//! Output sinks for unit logs
//!
//! A unit never writes to a process-wide destination on its own; it is handed
//! a [`Logger`] when it is built.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::info;

/// Destination for the lines a unit logs
pub trait Logger: Send + Sync {
    fn log(&self, unit: &str, message: &str);
}

/// Forwards unit output to `tracing` at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, unit: &str, message: &str) {
        info!(target: "testunit::output", unit, "{}", message.trim_end_matches('\n'));
    }
}

/// Keeps unit output in memory, one newline-terminated entry per call
#[derive(Default)]
pub struct BufferLogger {
    buf: Mutex<String>,
}

impl BufferLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Logger for BufferLogger {
    fn log(&self, _unit: &str, message: &str) {
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        buf.push_str(message);
        if !message.ends_with('\n') {
            buf.push('\n');
        }
    }
}

impl fmt::Debug for BufferLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferLogger")
            .field("len", &self.contents().len())
            .finish()
    }
}
