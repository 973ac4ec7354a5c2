//! LIFO cleanup stack with re-entrant teardown
//!
//! Teardown works in passes. A pass takes every entry registered so far and
//! runs them newest-first on an isolated context. Entries registered while a
//! pass runs (including by the pass's own actions) land on the emptied stack
//! and are picked up by the next pass, so none are lost and they still run
//! after everything that was present when the pass started.

use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::executor::{run_guarded, run_isolated, Fault, Outcome};

/// A registered cleanup action
pub type CleanupFn = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
pub struct CleanupStack {
    entries: Mutex<Vec<CleanupFn>>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an action on top of the stack
    ///
    /// Safe to call from inside an action that is currently being drained.
    pub fn register(&self, action: impl FnOnce() + Send + 'static) {
        self.lock().push(Box::new(action));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drain the stack until no pass finds anything left
    ///
    /// `name` labels the pass threads. Stop signals raised by an action end
    /// that action only. Faults are caught per action as well and returned in
    /// the order they happened, so the last element is the latest fault.
    pub fn teardown(&self, name: &str, stack_size: Option<usize>) -> Vec<Fault> {
        let mut faults = Vec::new();
        let mut pass = 0usize;

        loop {
            let batch = mem::take(&mut *self.lock());
            if batch.is_empty() {
                break;
            }
            pass += 1;
            debug!(unit = name, pass, actions = batch.len(), "teardown pass");

            let context = format!("{name}/teardown-{pass}");
            match run_isolated(&context, stack_size, move || drain(batch)) {
                Outcome::Completed(observed) => faults.extend(observed),
                Outcome::Faulted(fault) => faults.push(fault),
                Outcome::Stopped => {}
            }
        }

        faults
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CleanupFn>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run one pass newest-first; every action runs even if an earlier one unwinds
fn drain(batch: Vec<CleanupFn>) -> Vec<Fault> {
    let mut faults = Vec::new();
    for action in batch.into_iter().rev() {
        match run_guarded(action) {
            Outcome::Completed(()) => {}
            Outcome::Stopped => debug!("cleanup action stopped"),
            Outcome::Faulted(fault) => {
                warn!(fault = %fault, "cleanup action faulted");
                faults.push(fault);
            }
        }
    }
    faults
}
