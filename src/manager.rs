//! Process-wide worker topology.
//!
//! [`ThreadManager`] owns the four long-lived workers the SDK runs on
//! (`ui`, `major`, `callback`, `event-listener`) plus a by-name pool of
//! minor workers created on demand. It is an explicit context object:
//! construct one, pass it around, and call [`clear`](ThreadManager::clear)
//! (or just drop it) when the SDK shuts down. There is no process-global
//! instance.
//!
//! Construction is fail-fast: the I/O engine is probed *before* any
//! worker is spawned, so a host whose thread or I/O resources are
//! exhausted gets an error instead of a half-built topology.
//!
//! Teardown order is fixed: minors first, then `event-listener`,
//! `callback`, `major`, and `ui` last, reversing the dependency
//! direction of callbacks flowing toward the UI thread.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{EngineError, ManagerError, SyncCallError};
use crate::sync::relock;
use crate::types::WaitTimeout;
use crate::worker::{Worker, WorkerOptions};
use crate::call_site;

/// Hook that builds a minor worker for a given name.
pub type MinorCreator = Arc<dyn Fn(&str) -> io::Result<Worker> + Send + Sync>;

/// Hook observing a minor worker just before it is stopped.
pub type MinorStopObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Readiness check for the platform the workers will run on.
///
/// [`ThreadManager::new`] runs the probe before constructing anything;
/// a probe failure aborts initialization.
pub trait EngineProbe {
    /// Verifies the engine can do useful work within `timeout`.
    ///
    /// # Errors
    ///
    /// An [`EngineError`] describing why the engine is unusable.
    fn probe(&self, timeout: Duration) -> Result<(), EngineError>;
}

/// Default probe: spawns a scratch thread and round-trips a no-op task
/// through it. Exercises thread creation and scheduling, the two
/// resources every worker needs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEngineProbe;

impl EngineProbe for DefaultEngineProbe {
    fn probe(&self, timeout: Duration) -> Result<(), EngineError> {
        let scratch = Worker::spawn("engine-probe", WorkerOptions::default())
            .map_err(|e| EngineError::SpawnFailed(e.to_string()))?;
        let result = scratch.sync_call(call_site!(), || (), WaitTimeout::Bounded(timeout));
        scratch.stop();
        match result {
            Ok(()) => Ok(()),
            Err(SyncCallError::Timeout | SyncCallError::Stopped) => {
                Err(EngineError::ProbeTimeout(timeout))
            }
        }
    }
}

/// Construction knobs for [`ThreadManager`].
#[derive(Clone)]
pub struct ManagerConfig {
    /// Engine readiness check; defaults to [`DefaultEngineProbe`].
    pub probe: Arc<dyn EngineProbe + Send + Sync>,
    /// Bound on the probe round-trip.
    pub probe_timeout: Duration,
    /// Options applied to the four fixed workers.
    pub worker_options: WorkerOptions,
    /// Override for minor-worker construction; defaults to a plain
    /// [`Worker::spawn`] with [`ManagerConfig::worker_options`].
    pub minor_creator: Option<MinorCreator>,
    /// Called with the worker's name just before a minor is stopped.
    pub minor_stop_observer: Option<MinorStopObserver>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            probe: Arc::new(DefaultEngineProbe),
            probe_timeout: Duration::from_secs(3),
            worker_options: WorkerOptions::default(),
            minor_creator: None,
            minor_stop_observer: None,
        }
    }
}

impl std::fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("probe_timeout", &self.probe_timeout)
            .field("worker_options", &self.worker_options)
            .field("minor_creator", &self.minor_creator.is_some())
            .field("minor_stop_observer", &self.minor_stop_observer.is_some())
            .finish()
    }
}

/// Owns the fixed workers and the minor-worker pool.
pub struct ThreadManager {
    ui: Arc<Worker>,
    major: Arc<Worker>,
    callback: Arc<Worker>,
    event_listener: Arc<Worker>,
    minors: Mutex<HashMap<String, Arc<Worker>>>,
    cleared: AtomicBool,
    minor_creator: MinorCreator,
    minor_stop_observer: Option<MinorStopObserver>,
}

impl std::fmt::Debug for ThreadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadManager")
            .field("cleared", &self.cleared.load(Ordering::Acquire))
            .field("minors", &relock(self.minors.lock()).len())
            .finish()
    }
}

impl ThreadManager {
    /// Probes the engine, then spawns the four fixed workers.
    ///
    /// # Errors
    ///
    /// [`ManagerError::EngineUnavailable`] if the probe fails (nothing
    /// is spawned in that case), or [`ManagerError::Spawn`] if a fixed
    /// worker thread cannot be created.
    pub fn new(config: ManagerConfig) -> Result<Self, ManagerError> {
        config.probe.probe(config.probe_timeout)?;
        tracing::debug!("engine probe passed, building worker topology");

        let options = config.worker_options;
        let ui = Arc::new(Worker::spawn("ui", options.clone())?);
        let major = Arc::new(Worker::spawn("major", options.clone())?);
        let callback = Arc::new(Worker::spawn("callback", options.clone())?);
        let event_listener = Arc::new(Worker::spawn("event-listener", options.clone())?);

        let minor_creator = config.minor_creator.unwrap_or_else(|| {
            Arc::new(move |name: &str| Worker::spawn(name, options.clone()))
        });

        Ok(Self {
            ui,
            major,
            callback,
            event_listener,
            minors: Mutex::new(HashMap::new()),
            cleared: AtomicBool::new(false),
            minor_creator,
            minor_stop_observer: config.minor_stop_observer,
        })
    }

    fn fixed(&self, worker: &Arc<Worker>) -> Result<Arc<Worker>, ManagerError> {
        if self.cleared.load(Ordering::Acquire) {
            return Err(ManagerError::Cleared);
        }
        Ok(Arc::clone(worker))
    }

    /// The UI-facing worker. Final delivery point for host callbacks.
    ///
    /// # Errors
    ///
    /// [`ManagerError::Cleared`] after [`clear`](Self::clear).
    pub fn ui_worker(&self) -> Result<Arc<Worker>, ManagerError> {
        self.fixed(&self.ui)
    }

    /// The main signaling/control worker.
    ///
    /// # Errors
    ///
    /// [`ManagerError::Cleared`] after [`clear`](Self::clear).
    pub fn major_worker(&self) -> Result<Arc<Worker>, ManagerError> {
        self.fixed(&self.major)
    }

    /// The worker that marshals SDK callbacks out of internal threads.
    ///
    /// # Errors
    ///
    /// [`ManagerError::Cleared`] after [`clear`](Self::clear).
    pub fn callback_worker(&self) -> Result<Arc<Worker>, ManagerError> {
        self.fixed(&self.callback)
    }

    /// The worker dedicated to host event-listener invocations.
    ///
    /// # Errors
    ///
    /// [`ManagerError::Cleared`] after [`clear`](Self::clear).
    pub fn event_listener_worker(&self) -> Result<Arc<Worker>, ManagerError> {
        self.fixed(&self.event_listener)
    }

    /// Returns the minor worker registered under `name`, creating it on
    /// first use. Repeated calls with the same name share one worker.
    ///
    /// # Errors
    ///
    /// [`ManagerError::Cleared`] after [`clear`](Self::clear), or
    /// [`ManagerError::Spawn`] if the creator hook fails.
    pub fn minor_worker(&self, name: &str) -> Result<Arc<Worker>, ManagerError> {
        if self.cleared.load(Ordering::Acquire) {
            return Err(ManagerError::Cleared);
        }
        if let Some(existing) = relock(self.minors.lock()).get(name) {
            return Ok(Arc::clone(existing));
        }

        // Run the creator without the pool lock held so a hook may
        // itself resolve other minor workers.
        let worker = Arc::new((self.minor_creator)(name)?);

        let mut minors = relock(self.minors.lock());
        if self.cleared.load(Ordering::Acquire) {
            // clear() already drained the pool; this worker was never
            // in it, so it must be stopped here.
            drop(minors);
            worker.stop();
            return Err(ManagerError::Cleared);
        }
        if let Some(existing) = minors.get(name) {
            // Another thread registered the name while the creator
            // ran; keep theirs.
            let existing = Arc::clone(existing);
            drop(minors);
            worker.stop();
            return Ok(existing);
        }
        minors.insert(name.to_owned(), Arc::clone(&worker));
        drop(minors);
        tracing::debug!(worker = name, "minor worker created");
        Ok(worker)
    }

    /// Stops and removes the minor worker named `name`, if present.
    /// Queued tasks drain before the thread exits.
    pub fn stop_minor_worker(&self, name: &str) {
        let removed = relock(self.minors.lock()).remove(name);
        if let Some(worker) = removed {
            if let Some(observer) = &self.minor_stop_observer {
                observer(name);
            }
            tracing::debug!(worker = name, "minor worker stopping");
            worker.stop();
        }
    }

    /// Tears down every worker: minors first, then `event-listener`,
    /// `callback`, `major`, and `ui` last. Each stop drains queued
    /// tasks before joining. Idempotent; runs from [`Drop`] as well.
    pub fn clear(&self) {
        if self.cleared.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("thread manager clearing");

        let minors: Vec<(String, Arc<Worker>)> =
            relock(self.minors.lock()).drain().collect();
        for (name, worker) in minors {
            if let Some(observer) = &self.minor_stop_observer {
                observer(&name);
            }
            worker.stop();
        }

        self.event_listener.stop();
        self.callback.stop();
        self.major.stop();
        self.ui.stop();
        tracing::debug!("thread manager cleared");
    }
}

impl Drop for ThreadManager {
    fn drop(&mut self) {
        self.clear();
    }
}
