//! Reader/writer exclusion where readers never wait.
//!
//! [`LightRwLock`] trades fairness for reader-side latency: a reader
//! that arrives while a writer is active *fails immediately* instead of
//! queueing, and the caller treats the critical section as skipped. Use
//! it where a missed read is acceptable (polling caches) and a reader
//! must never block. A writer serializes against other writers, raises
//! the writer flag, and drains the reader count to zero before
//! proceeding, so no reader is ever mid-section under an active writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use crate::sync::relock;
use crate::sync::WaitableNumber;
use crate::types::WaitTimeout;

/// Writer-vs-writer gate that stays held across the manual
/// acquire/release pair (a `MutexGuard` could not be).
#[derive(Debug, Default)]
struct Gate {
    locked: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    fn acquire(&self) {
        let mut locked = relock(self.locked.lock());
        while *locked {
            locked = relock(self.cond.wait(locked));
        }
        *locked = true;
    }

    fn release(&self) {
        *relock(self.locked.lock()) = false;
        self.cond.notify_one();
    }
}

/// Reader/writer lock with non-blocking readers.
#[derive(Debug, Default)]
pub struct LightRwLock {
    writer_gate: Gate,
    writer_existing: AtomicBool,
    readers: WaitableNumber,
}

impl LightRwLock {
    /// Creates an unlocked instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts shared access without blocking.
    ///
    /// Returns `false` while a writer is active or draining readers;
    /// the caller must skip the critical section. On `true`, pair with
    /// [`release_read`](Self::release_read).
    #[must_use]
    pub fn try_read(&self) -> bool {
        if self.writer_existing.load(Ordering::Acquire) {
            return false;
        }
        self.readers.add(1);
        // A writer may have raised the flag between the check and the
        // increment; back out so its drain is not held up.
        if self.writer_existing.load(Ordering::Acquire) {
            self.readers.sub(1);
            return false;
        }
        true
    }

    /// Releases shared access obtained from a successful [`try_read`](Self::try_read).
    pub fn release_read(&self) {
        self.readers.sub(1);
    }

    /// Blocks until exclusive access is granted: serializes against
    /// other writers, then drains the reader count to zero.
    pub fn acquire_write(&self) {
        self.writer_gate.acquire();
        self.writer_existing.store(true, Ordering::Release);
        // Infinite wait on the reader count cannot time out.
        let _ = self.readers.wait_until(0, WaitTimeout::Infinite);
    }

    /// Releases exclusive access.
    pub fn release_write(&self) {
        self.writer_existing.store(false, Ordering::Release);
        self.writer_gate.release();
    }

    /// Attempts a scoped reader lease; the guard records whether the
    /// lock was actually obtained.
    pub fn read_guard(&self) -> LightReadGuard<'_> {
        let acquired = self.try_read();
        LightReadGuard {
            lock: self,
            acquired,
        }
    }

    /// Acquires a scoped writer lease.
    pub fn write_guard(&self) -> LightWriteGuard<'_> {
        self.acquire_write();
        LightWriteGuard { lock: self }
    }
}

/// Scoped reader lease that may have failed to acquire.
#[must_use = "the lease is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LightReadGuard<'a> {
    lock: &'a LightRwLock,
    acquired: bool,
}

impl LightReadGuard<'_> {
    /// Returns `true` if the read lock was actually obtained.
    #[must_use]
    pub const fn acquired(&self) -> bool {
        self.acquired
    }
}

impl Drop for LightReadGuard<'_> {
    fn drop(&mut self) {
        if self.acquired {
            self.lock.release_read();
        }
    }
}

/// Scoped writer lease.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LightWriteGuard<'a> {
    lock: &'a LightRwLock,
}

impl Drop for LightWriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}
