//! Isolated execution contexts
//!
//! Every unit body and every teardown pass runs on its own thread, joined by
//! the caller. Two kinds of unwinding can end such a context early:
//!
//! - a **stop signal** raised through [`raise_stop`] (`fail_now`, `skip_now`),
//!   which is intercepted here and never reaches the caller;
//! - a **fault**, i.e. any other panic, which is intercepted and handed back
//!   to the caller as [`Outcome::Faulted`] so the unit can apply its policy.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{trace, warn, Span};

use crate::error::UnitError;

/* ===================== Stop Signal ===================== */

/// Unwind payload used to stop the current context only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSignal;

/// Stop the current execution context
///
/// Uses `resume_unwind`, so the panic hook does not fire and nothing is
/// printed. Only meaningful on a context started by [`run_isolated`] (or a
/// cleanup action); anywhere else the unwind ends the calling thread.
pub fn raise_stop() -> ! {
    panic::resume_unwind(Box::new(StopSignal))
}

/* ===================== Fault ===================== */

/// An intercepted panic that was not a stop signal
pub struct Fault {
    message: String,
    payload: Box<dyn Any + Send>,
}

impl Fault {
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        Self {
            message: panic_message(payload.as_ref()),
            payload,
        }
    }

    pub fn from_error(err: UnitError) -> Self {
        let message = err.to_string();
        Self {
            payload: Box::new(message.clone()),
            message,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Re-raise the original panic on the current thread
    pub fn resume(self) -> ! {
        panic::resume_unwind(self.payload)
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault").field("message", &self.message).finish()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(err) = payload.downcast_ref::<UnitError>() {
        err.to_string()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/* ===================== Outcome ===================== */

/// Terminal outcome of one execution context
///
/// Exactly one of these is produced per context.
#[derive(Debug)]
pub enum Outcome<T = ()> {
    /// The closure returned normally
    Completed(T),
    /// The closure raised a stop signal
    Stopped,
    /// The closure panicked with anything else
    Faulted(Fault),
}

impl<T> Outcome<T> {
    fn from_unwind(result: thread::Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Completed(value),
            Err(payload) if payload.is::<StopSignal>() => Outcome::Stopped,
            Err(payload) => Outcome::Faulted(Fault::from_payload(payload)),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Outcome::Stopped)
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, Outcome::Faulted(_))
    }

    pub fn fault(self) -> Option<Fault> {
        match self {
            Outcome::Faulted(fault) => Some(fault),
            _ => None,
        }
    }
}

/* ===================== Execution ===================== */

/// Run `f` on a fresh named thread and block until it ends
///
/// The current tracing span is carried onto the new thread. If the platform
/// refuses another thread with `WouldBlock`, `f` runs inline under
/// `catch_unwind`, which still keeps its unwinding away from the caller.
pub fn run_isolated<F, T>(name: &str, stack_size: Option<usize>, f: F) -> Outcome<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let span = Span::current();
    let slot = Arc::new(Mutex::new(Some(f)));
    let spawned = slot.clone();

    let mut builder = thread::Builder::new().name(name.to_string());
    if let Some(size) = stack_size {
        builder = builder.stack_size(size);
    }

    let outcome = match builder.spawn(move || {
        let f = take_once(&spawned);
        span.in_scope(f)
    }) {
        Ok(handle) => Outcome::from_unwind(handle.join()),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            warn!(context = name, "thread limit reached, running context inline");
            let f = take_once(&slot);
            Outcome::from_unwind(panic::catch_unwind(AssertUnwindSafe(f)))
        }
        Err(source) => Outcome::Faulted(Fault::from_error(UnitError::Spawn {
            name: name.to_string(),
            source,
        })),
    };

    match &outcome {
        Outcome::Completed(_) => trace!(context = name, "context completed"),
        Outcome::Stopped => trace!(context = name, "stop signal intercepted"),
        Outcome::Faulted(fault) => trace!(context = name, fault = %fault, "fault intercepted"),
    }
    outcome
}

/// Run `f` on the current thread, intercepting stop signals and faults
///
/// Used for individual cleanup actions inside a teardown pass.
pub fn run_guarded<F, T>(f: F) -> Outcome<T>
where
    F: FnOnce() -> T,
{
    Outcome::from_unwind(panic::catch_unwind(AssertUnwindSafe(f)))
}

fn take_once<F>(slot: &Mutex<Option<F>>) -> F {
    slot.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .expect("execution context started twice")
}
