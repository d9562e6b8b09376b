// SPDX-License-Identifier: AGPL-3.0-only

//! Counting signals.
//!
//! A signal is the ordering primitive of the exchange: a `u32` counter
//! owned by exactly one unit, writable by any unit holding its handle.
//! The hardware pattern it models is a semaphore in local scratch memory
//! that remote units bump over the interconnect while the owner spins on
//! it; the software rendition replaces the busy-poll with a
//! condvar-blocked wait carrying a deadline, so a missing remote write
//! surfaces as a timeout instead of a hang.
//!
//! Ownership is the type split: [`Signal`] (set, wait) stays with the
//! owning unit, [`SignalHandle`] (set, increment) is what the
//! interconnect hands to everyone else. Waiting never resets the value;
//! only the owner does, via [`Signal::set`].

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct SignalState {
    value: Mutex<u32>,
    cond: Condvar,
}

/// Owner side of a counting signal: reset and blocking wait.
#[derive(Debug)]
pub struct Signal {
    name: &'static str,
    state: Arc<SignalState>,
}

/// Remote side of a counting signal: set and increment only.
#[derive(Debug, Clone)]
pub struct SignalHandle {
    state: Arc<SignalState>,
}

/// A [`Signal::wait_at_least`] deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeout {
    /// Value observed when the deadline passed.
    pub observed: u32,
    /// Threshold that was never reached.
    pub threshold: u32,
}

impl Signal {
    /// Create a signal with value 0.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(SignalState {
                value: Mutex::new(0),
                cond: Condvar::new(),
            }),
        }
    }

    /// Signal name, for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Remote-writable handle for the interconnect registry.
    #[must_use]
    pub fn handle(&self) -> SignalHandle {
        SignalHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Overwrite the value unconditionally.
    pub fn set(&self, value: u32) {
        let mut guard = self.state.value.lock().expect("signal mutex poisoned");
        *guard = value;
        drop(guard);
        self.state.cond.notify_all();
    }

    /// Block until the value reaches `threshold`, or the deadline passes.
    ///
    /// The value is not consumed; the owner resets it separately.
    ///
    /// # Errors
    ///
    /// Returns [`WaitTimeout`] with the last observed value if `timeout`
    /// elapses first.
    pub fn wait_at_least(&self, threshold: u32, timeout: Duration) -> Result<(), WaitTimeout> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.value.lock().expect("signal mutex poisoned");
        while *guard < threshold {
            let now = Instant::now();
            if now >= deadline {
                return Err(WaitTimeout {
                    observed: *guard,
                    threshold,
                });
            }
            let (next, _) = self
                .state
                .cond
                .wait_timeout(guard, deadline - now)
                .expect("signal mutex poisoned");
            guard = next;
        }
        Ok(())
    }

    /// Current value, without waiting. Diagnostics only.
    #[must_use]
    pub fn peek(&self) -> u32 {
        *self.state.value.lock().expect("signal mutex poisoned")
    }
}

impl SignalHandle {
    /// Overwrite the owner's value.
    pub fn set(&self, value: u32) {
        let mut guard = self.state.value.lock().expect("signal mutex poisoned");
        *guard = value;
        drop(guard);
        self.state.cond.notify_all();
    }

    /// Add `delta` to the owner's value. Atomic with respect to
    /// concurrent increments from other units.
    pub fn increment(&self, delta: u32) {
        let mut guard = self.state.value.lock().expect("signal mutex poisoned");
        *guard += delta;
        drop(guard);
        self.state.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_returns_once_threshold_reached() {
        let signal = Signal::new("sender-ready");
        let handle = signal.handle();
        let worker = thread::spawn(move || {
            for _ in 0..3 {
                handle.increment(1);
            }
        });
        signal
            .wait_at_least(3, Duration::from_secs(5))
            .expect("three increments must satisfy the wait");
        worker.join().unwrap();
        assert_eq!(signal.peek(), 3);
    }

    #[test]
    fn concurrent_increments_all_land() {
        let signal = Signal::new("sender-ready");
        let handles: Vec<_> = (0..8).map(|_| signal.handle()).collect();
        let workers: Vec<_> = handles
            .into_iter()
            .map(|h| thread::spawn(move || h.increment(1)))
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(signal.peek(), 8);
    }

    #[test]
    fn timeout_reports_observed_value() {
        let signal = Signal::new("delivery");
        signal.handle().increment(1);
        let err = signal
            .wait_at_least(2, Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err.observed, 1);
        assert_eq!(err.threshold, 2);
    }

    #[test]
    fn wait_does_not_consume() {
        let signal = Signal::new("delivery");
        signal.handle().set(1);
        signal.wait_at_least(1, Duration::from_secs(1)).unwrap();
        // A second wait on the same value returns immediately.
        signal.wait_at_least(1, Duration::from_secs(1)).unwrap();
        signal.set(0);
        assert_eq!(signal.peek(), 0);
    }
}
