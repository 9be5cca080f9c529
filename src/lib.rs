//! Rtcsync: blocking concurrency kernel for a real-time media SDK.
//!
//! # Overview
//!
//! Rtcsync is the thread-coordination layer an RTC engine runs on. It
//! provides waitable primitives (events, a waitable counter, a pooled
//! multi-event), two reader/writer locks tuned for different latency
//! profiles, a serial-queue [`Worker`] thread, and the [`ThreadManager`]
//! that owns the SDK's worker topology. Everything here blocks OS
//! threads; there is no async runtime underneath.
//!
//! # Core Guarantees
//!
//! - **No lost signals**: every waitable re-checks its predicate under
//!   the lock after each wake, so spurious wakeups and racing signals
//!   are harmless
//! - **Writer-fair locking**: [`RwLock`] queues writers FIFO and
//!   alternates grants between the reader and writer sides under
//!   contention, so neither side starves
//! - **Serial execution**: every task handed to a [`Worker`] runs on
//!   that worker's one thread in submission order
//! - **Fail-fast startup**: [`ThreadManager::new`] probes the engine
//!   before spawning anything
//! - **Clean teardown**: worker stop drains the queue before joining;
//!   blocked `sync_call`s observe a stop instead of hanging
//!
//! # Module Structure
//!
//! - [`types`]: Core value types ([`WaitTimeout`], [`CallSite`])
//! - [`error`]: Error types
//! - [`sync`]: Waitable events, counter, multi-event, and both locks
//! - [`worker`]: The serial-queue worker thread
//! - [`manager`]: The worker topology and its lifecycle
//! - [`test_utils`]: Logging and assertion helpers for tests

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod manager;
pub mod sync;
pub mod test_utils;
pub mod types;
pub mod worker;

// Re-exports for convenient access to core types
pub use error::{EngineError, FactoryError, ManagerError, SyncCallError, WaitError};
pub use manager::{DefaultEngineProbe, EngineProbe, ManagerConfig, ThreadManager};
pub use sync::{
    AutoResetEvent, FairRwLock, LightReadGuard, LightRwLock, LightWriteGuard, ManualResetEvent,
    MultiEvent, MultiEventFactory, NativeRwLock, Prefer, RawRwLock, ReadGuard, RwLock, SlotId,
    WaitableNumber, WriteGuard, SLOT_CAPACITY,
};
pub use types::{CallSite, WaitTimeout};
pub use worker::{TimerHandle, Worker, WorkerOptions};
