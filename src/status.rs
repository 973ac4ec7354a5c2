//! Merge-only unit status
//!
//! A unit carries two independent bits, failed and skipped. Bits are only ever
//! set; nothing in the crate clears them once a unit exists.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time copy of a unit's status bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub failed: bool,
    pub skipped: bool,
}

impl Status {
    /// Neither bit set
    pub fn is_clean(&self) -> bool {
        !self.failed && !self.skipped
    }
}

/// Concurrency-safe holder of the status bits
///
/// Readers and writers may be the unit body, cleanup actions running after
/// the body exited, or (for the root unit) the wrapped batch runner.
#[derive(Debug, Default)]
pub struct StatusTracker {
    failed: AtomicBool,
    skipped: AtomicBool,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Only reachable through `skip_now` on a unit
    pub(crate) fn skip(&self) {
        self.skipped.store(true, Ordering::SeqCst);
    }

    pub fn skipped(&self) -> bool {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Status {
        Status {
            failed: self.failed(),
            skipped: self.skipped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_bits_are_independent() {
        let status = StatusTracker::new();
        assert!(status.snapshot().is_clean());

        status.skip();
        assert!(status.skipped());
        assert!(!status.failed());

        status.fail();
        assert_eq!(
            status.snapshot(),
            Status {
                failed: true,
                skipped: true
            }
        );
    }

    #[test]
    fn test_fail_is_idempotent() {
        let status = StatusTracker::new();
        status.fail();
        status.fail();
        assert!(status.failed());
        assert!(!status.skipped());
    }

    #[test]
    fn test_concurrent_writers_never_lose_a_bit() {
        let status = Arc::new(StatusTracker::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let status = status.clone();
                thread::spawn(move || {
                    if i % 2 == 0 {
                        status.fail();
                    } else {
                        status.skip();
                    }
                    // Once observed, a bit stays set
                    for _ in 0..100 {
                        if i % 2 == 0 {
                            assert!(status.failed());
                        } else {
                            assert!(status.skipped());
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(status.failed());
        assert!(status.skipped());
    }
}
