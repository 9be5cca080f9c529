//! Error types for the kernel.
//!
//! Error handling follows these principles:
//!
//! - Failures are explicit return values; nothing in this crate throws
//!   across the API boundary.
//! - Timeouts and slot exhaustion are recoverable and must be handled
//!   by the caller (retry, degrade, or surface upward).
//! - An unusable I/O engine is fatal to startup: [`ManagerError`] is
//!   returned before any worker is constructed.
//! - Provably fatal lock-acquisition patterns abort with a diagnostic
//!   in debug builds only; see [`sync`](crate::sync).

use core::fmt;
use std::time::Duration;

/// Failure of a blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The bounded wait expired before the predicate held.
    Timeout,
    /// A multi-event slot was closed while this thread was waiting on it.
    Closed,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "wait timed out"),
            Self::Closed => write!(f, "slot closed while waiting"),
        }
    }
}

impl std::error::Error for WaitError {}

/// Failure to lease a slot from a [`MultiEventFactory`](crate::sync::MultiEventFactory).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryError {
    /// All slots are currently leased.
    Exhausted,
}

impl fmt::Display for FactoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "no free event slot"),
        }
    }
}

impl std::error::Error for FactoryError {}

/// Failure of a blocking [`Worker::sync_call`](crate::worker::Worker::sync_call).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCallError {
    /// The call did not complete within the timeout. The closure may
    /// still execute later; its result is discarded.
    Timeout,
    /// The worker was stopped before the call could be queued.
    Stopped,
}

impl fmt::Display for SyncCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "sync call timed out"),
            Self::Stopped => write!(f, "worker is stopped"),
        }
    }
}

impl std::error::Error for SyncCallError {}

/// Failure of the I/O engine startup probe.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The probe worker thread could not be spawned.
    #[error("engine probe thread could not be spawned: {0}")]
    SpawnFailed(String),
    /// The probe task did not round-trip within the bound.
    #[error("engine probe did not complete within {0:?}")]
    ProbeTimeout(Duration),
}

/// Failure of a [`ThreadManager`](crate::manager::ThreadManager) operation.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The underlying I/O engine failed its startup probe. No workers
    /// were constructed; initialization must not proceed.
    #[error("i/o engine unavailable: {0}")]
    EngineUnavailable(#[from] EngineError),
    /// A worker thread could not be spawned after the probe passed.
    #[error("worker thread spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
    /// The manager has already been cleared.
    #[error("thread manager already cleared")]
    Cleared,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(WaitError::Timeout.to_string(), "wait timed out");
        assert_eq!(FactoryError::Exhausted.to_string(), "no free event slot");
        assert_eq!(SyncCallError::Stopped.to_string(), "worker is stopped");
    }

    #[test]
    fn engine_error_wraps_into_manager_error() {
        let err: ManagerError = EngineError::SpawnFailed("denied".into()).into();
        assert!(matches!(err, ManagerError::EngineUnavailable(_)));
        assert!(err.to_string().contains("denied"));
    }
}
