//! Blocking synchronization primitives.
//!
//! Everything here is a shared-memory, multi-thread-safe construct built
//! on OS mutexes and condition variables. These are the tools higher
//! layers reach for only where a worker's single-thread serialization is
//! not enough: a lock shared between a worker thread and an external
//! caller, or a producer/consumer handoff across two workers.
//!
//! # Primitives
//!
//! - [`AutoResetEvent`] / [`ManualResetEvent`]: boolean signal with
//!   blocking wait and timeout
//! - [`WaitableNumber`]: condition-gated atomic counter
//! - [`MultiEventFactory`] / [`MultiEvent`]: fixed-capacity pool of
//!   signal slots with wait-for-any/all
//! - [`RwLock`]: writer-preferred reader/writer lock with an
//!   anti-starvation alternating preference token
//! - [`LightRwLock`]: reader/writer exclusion where readers never wait
//!
//! # Blocking and teardown
//!
//! Every blocking entry point accepts a [`WaitTimeout`](crate::types::WaitTimeout)
//! and re-checks its predicate after any condition-variable wake. None of
//! these primitives hold two of their own locks at once, and none call
//! into user code while holding an internal lock. Destroying a primitive
//! while a thread is parked on it is out of contract; callers guarantee
//! quiescence first. The one deliberate exception is
//! [`MultiEventFactory::close`], which hands parked waiters a
//! distinguished `Closed` result instead.

mod event;
mod light_rwlock;
mod multi_event;
mod number;
mod rwlock;

pub use event::{AutoResetEvent, ManualResetEvent};
pub use light_rwlock::{LightReadGuard, LightRwLock, LightWriteGuard};
pub use multi_event::{MultiEvent, MultiEventFactory, SlotId, SLOT_CAPACITY};
pub use number::WaitableNumber;
pub use rwlock::{FairRwLock, NativeRwLock, Prefer, RawRwLock, ReadGuard, RwLock, WriteGuard};

use std::sync::{LockResult, MutexGuard, PoisonError};

/// Recovers the guard from a poisoned lock result.
///
/// A panic inside one of these primitives' critical sections cannot
/// leave shared state torn (the sections only move plain integers and
/// flags), so waiters keep going instead of cascading the panic.
pub(crate) fn relock<T>(result: LockResult<MutexGuard<'_, T>>) -> MutexGuard<'_, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}
