//! Condition-gated atomic counter.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Instant;

use crate::error::WaitError;
use crate::sync::relock;
use crate::types::WaitTimeout;

/// A 64-bit integer with blocking "wait until/while equals" support.
///
/// Every mutator takes the internal lock, applies the operation, and
/// notifies all waiters before releasing, so a parked waiter can never
/// miss an update. Mutators return the new value.
#[derive(Debug)]
pub struct WaitableNumber {
    value: Mutex<i64>,
    cond: Condvar,
}

impl WaitableNumber {
    /// Creates a counter holding `initial`.
    #[must_use]
    pub fn new(initial: i64) -> Self {
        Self {
            value: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> i64 {
        *relock(self.value.lock())
    }

    /// Replaces the value.
    pub fn set(&self, n: i64) -> i64 {
        self.mutate(|v| *v = n)
    }

    /// Adds `n`.
    pub fn add(&self, n: i64) -> i64 {
        self.mutate(|v| *v = v.wrapping_add(n))
    }

    /// Subtracts `n`.
    pub fn sub(&self, n: i64) -> i64 {
        self.mutate(|v| *v = v.wrapping_sub(n))
    }

    /// Multiplies by `n`.
    pub fn mul(&self, n: i64) -> i64 {
        self.mutate(|v| *v = v.wrapping_mul(n))
    }

    /// Divides by `n`.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero.
    pub fn div(&self, n: i64) -> i64 {
        self.mutate(|v| *v = v.wrapping_div(n))
    }

    fn mutate(&self, op: impl FnOnce(&mut i64)) -> i64 {
        let mut value = relock(self.value.lock());
        op(&mut value);
        let new = *value;
        drop(value);
        self.cond.notify_all();
        new
    }

    /// Blocks until the value equals `n`.
    ///
    /// Returns without blocking if it already does.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] if the value did not reach `n` in time.
    pub fn wait_until(&self, n: i64, timeout: WaitTimeout) -> Result<(), WaitError> {
        self.wait_for(timeout, |v| v == n)
    }

    /// Blocks while the value equals `n`.
    ///
    /// Returns without blocking if it already differs.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] if the value still equals `n` when the
    /// timeout expires.
    pub fn wait_while(&self, n: i64, timeout: WaitTimeout) -> Result<(), WaitError> {
        self.wait_for(timeout, |v| v != n)
    }

    fn wait_for(&self, timeout: WaitTimeout, done: impl Fn(i64) -> bool) -> Result<(), WaitError> {
        let mut value = relock(self.value.lock());

        match timeout {
            WaitTimeout::Poll => {}
            WaitTimeout::Infinite => {
                while !done(*value) {
                    value = relock(self.cond.wait(value));
                }
            }
            WaitTimeout::Bounded(d) => {
                let deadline = Instant::now() + d;
                while !done(*value) {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(WaitError::Timeout);
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(value, remaining)
                        .unwrap_or_else(PoisonError::into_inner);
                    value = guard;
                }
            }
        }

        if done(*value) {
            Ok(())
        } else {
            Err(WaitError::Timeout)
        }
    }
}

impl PartialEq<i64> for WaitableNumber {
    fn eq(&self, other: &i64) -> bool {
        self.get() == *other
    }
}

impl Default for WaitableNumber {
    fn default() -> Self {
        Self::new(0)
    }
}
