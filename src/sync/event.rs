//! Waitable boolean events.
//!
//! [`AutoResetEvent`] releases exactly one waiter per `set` and consumes
//! the signal as part of a successful wait. [`ManualResetEvent`] releases
//! every current and future waiter until an explicit `reset`.
//!
//! Both are a flag behind one mutex/condvar pair; waits re-check the
//! flag after every wake, so spurious condvar wakeups are harmless.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Instant;

use crate::error::WaitError;
use crate::sync::relock;
use crate::types::WaitTimeout;

#[derive(Debug)]
struct EventCore {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl EventCore {
    fn new(signaled: bool) -> Self {
        Self {
            signaled: Mutex::new(signaled),
            cond: Condvar::new(),
        }
    }

    /// Waits for the flag; `consume` clears it on success (auto-reset).
    fn wait(&self, timeout: WaitTimeout, consume: bool) -> Result<(), WaitError> {
        let mut signaled = relock(self.signaled.lock());

        match timeout {
            WaitTimeout::Poll => {}
            WaitTimeout::Infinite => {
                while !*signaled {
                    signaled = relock(self.cond.wait(signaled));
                }
            }
            WaitTimeout::Bounded(d) => {
                let deadline = Instant::now() + d;
                while !*signaled {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(WaitError::Timeout);
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(signaled, remaining)
                        .unwrap_or_else(PoisonError::into_inner);
                    signaled = guard;
                }
            }
        }

        if !*signaled {
            return Err(WaitError::Timeout);
        }
        if consume {
            *signaled = false;
        }
        Ok(())
    }

    fn set(&self, wake_all: bool) {
        let mut signaled = relock(self.signaled.lock());
        *signaled = true;
        drop(signaled);
        if wake_all {
            self.cond.notify_all();
        } else {
            self.cond.notify_one();
        }
    }

    fn reset(&self) {
        *relock(self.signaled.lock()) = false;
    }

    fn is_set(&self) -> bool {
        *relock(self.signaled.lock())
    }
}

/// A waitable event that clears itself on successful wait.
///
/// With N threads blocked, a single [`set`](Self::set) releases exactly
/// one of them; the rest stay parked until further `set` calls or their
/// timeout expires.
#[derive(Debug)]
pub struct AutoResetEvent {
    core: EventCore,
}

impl AutoResetEvent {
    /// Creates an unsignaled event.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: EventCore::new(false),
        }
    }

    /// Signals the event, releasing one waiter (current or future).
    pub fn set(&self) {
        self.core.set(false);
    }

    /// Waits for the signal and atomically consumes it.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] if the signal did not arrive within the
    /// timeout.
    pub fn wait(&self, timeout: WaitTimeout) -> Result<(), WaitError> {
        self.core.wait(timeout, true)
    }
}

impl Default for AutoResetEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// A waitable event that stays signaled until explicitly reset.
///
/// [`set`](Self::set) releases all current waiters and makes every
/// subsequent [`wait`](Self::wait) return immediately until
/// [`reset`](Self::reset).
#[derive(Debug)]
pub struct ManualResetEvent {
    core: EventCore,
}

impl ManualResetEvent {
    /// Creates an unsignaled event.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: EventCore::new(false),
        }
    }

    /// Signals the event, releasing all current and future waiters.
    pub fn set(&self) {
        self.core.set(true);
    }

    /// Clears the signal.
    pub fn reset(&self) {
        self.core.reset();
    }

    /// Returns `true` while the event is signaled.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.core.is_set()
    }

    /// Waits for the signal. The signal persists.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] if the signal did not arrive within the
    /// timeout.
    pub fn wait(&self, timeout: WaitTimeout) -> Result<(), WaitError> {
        self.core.wait(timeout, false)
    }
}

impl Default for ManualResetEvent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn auto_reset_consumes_signal() {
        init_test("auto_reset_consumes_signal");
        let event = AutoResetEvent::new();
        event.set();

        let first = event.wait(WaitTimeout::Poll).is_ok();
        crate::assert_with_log!(first, "first wait consumes", true, first);

        let second = event.wait(WaitTimeout::Poll);
        crate::assert_with_log!(
            second == Err(WaitError::Timeout),
            "second wait times out",
            Err::<(), _>(WaitError::Timeout),
            second
        );
        crate::test_complete!("auto_reset_consumes_signal");
    }

    #[test]
    fn auto_reset_releases_exactly_one() {
        init_test("auto_reset_releases_exactly_one");
        let event = Arc::new(AutoResetEvent::new());
        let released = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let event = Arc::clone(&event);
                let released = Arc::clone(&released);
                thread::spawn(move || {
                    if event.wait(WaitTimeout::from_millis(2000)).is_ok() {
                        released.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        // Let the waiters park, then release one at a time.
        thread::sleep(Duration::from_millis(100));
        event.set();
        thread::sleep(Duration::from_millis(100));
        let after_one = released.load(Ordering::SeqCst);
        crate::assert_with_log!(after_one == 1, "one released per set", 1usize, after_one);

        event.set();
        event.set();
        event.set();
        for handle in handles {
            handle.join().expect("waiter panicked");
        }
        let total = released.load(Ordering::SeqCst);
        crate::assert_with_log!(total == 4, "all eventually released", 4usize, total);
        crate::test_complete!("auto_reset_releases_exactly_one");
    }

    #[test]
    fn manual_reset_broadcasts() {
        init_test("manual_reset_broadcasts");
        let event = Arc::new(ManualResetEvent::new());
        let released = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let event = Arc::clone(&event);
                let released = Arc::clone(&released);
                thread::spawn(move || {
                    event.wait(WaitTimeout::Infinite).expect("infinite wait");
                    released.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(100));
        event.set();
        for handle in handles {
            handle.join().expect("waiter panicked");
        }
        let count = released.load(Ordering::SeqCst);
        crate::assert_with_log!(count == 3, "all waiters released", 3usize, count);

        // Still signaled: a late wait returns immediately.
        let late = event.wait(WaitTimeout::Poll).is_ok();
        crate::assert_with_log!(late, "late wait passes", true, late);

        event.reset();
        let after_reset = event.wait(WaitTimeout::Poll);
        crate::assert_with_log!(
            after_reset == Err(WaitError::Timeout),
            "reset clears",
            Err::<(), _>(WaitError::Timeout),
            after_reset
        );
        crate::test_complete!("manual_reset_broadcasts");
    }

    #[test]
    fn bounded_wait_times_out() {
        init_test("bounded_wait_times_out");
        let event = AutoResetEvent::new();
        let start = std::time::Instant::now();
        let result = event.wait(WaitTimeout::from_millis(50));
        crate::assert_with_log!(
            result == Err(WaitError::Timeout),
            "times out",
            Err::<(), _>(WaitError::Timeout),
            result
        );
        let waited = start.elapsed() >= Duration::from_millis(50);
        crate::assert_with_log!(waited, "waited the bound", true, waited);
        crate::test_complete!("bounded_wait_times_out");
    }
}
