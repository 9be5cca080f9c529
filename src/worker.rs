//! Dedicated task-execution thread.
//!
//! A [`Worker`] owns one named OS thread and a FIFO task queue. Callers
//! hand work over with [`async_call`](Worker::async_call) (fire and
//! forget) or [`sync_call`](Worker::sync_call) (block for the result),
//! and every task runs on the worker thread in submission order, so
//! state touched only from tasks needs no further locking. Repeating
//! timers share the same thread: a timer callback never overlaps a
//! queued task.
//!
//! `sync_call` issued *from* the worker thread runs the closure inline
//! instead of deadlocking on its own queue. [`stop`](Worker::stop)
//! drains already-queued tasks, joins the thread, and abandons any
//! task that raced in after the drain; abandoned `sync_call`s observe
//! [`SyncCallError::Stopped`] rather than hanging.

use std::collections::BinaryHeap;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;

use crate::error::SyncCallError;
use crate::sync::relock;
use crate::types::{CallSite, WaitTimeout};

/// Lifecycle callback run on the worker thread itself.
pub type ThreadCallback = Arc<dyn Fn() + Send + Sync>;

/// Spawn-time knobs for a [`Worker`].
#[derive(Clone, Default)]
pub struct WorkerOptions {
    /// Stack size for the worker thread; `None` uses the platform default.
    pub stack_size: Option<usize>,
    /// Runs on the worker thread before the first task.
    pub on_start: Option<ThreadCallback>,
    /// Runs on the worker thread after the last task.
    pub on_stop: Option<ThreadCallback>,
}

impl std::fmt::Debug for WorkerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerOptions")
            .field("stack_size", &self.stack_size)
            .field("on_start", &self.on_start.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .finish()
    }
}

struct Task {
    site: CallSite,
    work: Box<dyn FnOnce() + Send>,
}

/// Repeating timer owned by the worker thread's heap. Ordered so the
/// `BinaryHeap` pops the *earliest* deadline first.
struct TimerEntry {
    deadline: Instant,
    interval: Duration,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    callback: Box<dyn FnMut() + Send>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Cancellation handle for a repeating timer.
///
/// Dropping the handle does *not* cancel the timer; call
/// [`cancel`](Self::cancel). Cancellation takes effect before the next
/// tick; a tick already running completes.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Stops future ticks.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Completion slot a `sync_call` parks on.
struct CallSlot<T> {
    state: Mutex<SlotState<T>>,
    cond: Condvar,
}

struct SlotState<T> {
    value: Option<T>,
    abandoned: bool,
}

impl<T> CallSlot<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                abandoned: false,
            }),
            cond: Condvar::new(),
        }
    }

    fn complete(&self, value: T) {
        let mut state = relock(self.state.lock());
        state.value = Some(value);
        drop(state);
        self.cond.notify_all();
    }

    fn abandon(&self) {
        let mut state = relock(self.state.lock());
        if state.value.is_none() {
            state.abandoned = true;
        }
        drop(state);
        self.cond.notify_all();
    }

    fn wait(&self, timeout: WaitTimeout) -> Result<T, SyncCallError> {
        let mut state = relock(self.state.lock());

        match timeout {
            WaitTimeout::Poll => {}
            WaitTimeout::Infinite => {
                while state.value.is_none() && !state.abandoned {
                    state = relock(self.cond.wait(state));
                }
            }
            WaitTimeout::Bounded(d) => {
                let deadline = Instant::now() + d;
                while state.value.is_none() && !state.abandoned {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    state = guard;
                }
            }
        }

        if let Some(value) = state.value.take() {
            Ok(value)
        } else if state.abandoned {
            Err(SyncCallError::Stopped)
        } else {
            Err(SyncCallError::Timeout)
        }
    }
}

/// Marks the slot abandoned if the task is dropped without running,
/// which happens when the worker stops with the task still queued.
struct SlotGuard<T> {
    slot: Arc<CallSlot<T>>,
    fired: bool,
}

impl<T> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        if !self.fired {
            self.slot.abandon();
        }
    }
}

struct WorkerInner {
    name: String,
    queue: SegQueue<Task>,
    pending: AtomicUsize,
    stopping: AtomicBool,
    /// Set by the worker thread, under the park mutex, once it has
    /// exited and emptied the queue for the last time.
    drained: AtomicBool,
    park: Mutex<()>,
    unpark: Condvar,
    timers: Mutex<BinaryHeap<TimerEntry>>,
    timer_seq: AtomicU64,
    thread_id: OnceLock<thread::ThreadId>,
}

impl WorkerInner {
    fn is_worker_thread(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }

    /// Enqueue and wake. The notify happens under the park mutex so a
    /// worker mid-check cannot miss it; the `drained` check under the
    /// same mutex catches a push that lost the race against the worker
    /// thread's final drain, so its waiter is abandoned rather than
    /// stranded.
    fn submit(&self, task: Task) {
        self.queue.push(task);
        self.pending.fetch_add(1, Ordering::Release);
        let _guard = relock(self.park.lock());
        if self.drained.load(Ordering::Acquire) {
            tracing::warn!(worker = %self.name, "task submitted after stop was dropped");
            self.drain_queue();
        } else {
            self.unpark.notify_all();
        }
    }

    /// Drops every queued task. Only sound after the worker thread has
    /// exited; callers hold the park mutex.
    fn drain_queue(&self) {
        while let Some(task) = self.queue.pop() {
            self.pending.fetch_sub(1, Ordering::Release);
            drop(task);
        }
    }

    fn wake(&self) {
        let _guard = relock(self.park.lock());
        self.unpark.notify_all();
    }
}

/// A named thread with a serial task queue and repeating timers.
pub struct Worker {
    inner: Arc<WorkerInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.inner.name)
            .field("pending", &self.pending_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Worker {
    /// Spawns a worker thread named `name`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(name: impl Into<String>, options: WorkerOptions) -> io::Result<Self> {
        let name = name.into();
        let inner = Arc::new(WorkerInner {
            name: name.clone(),
            queue: SegQueue::new(),
            pending: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            park: Mutex::new(()),
            unpark: Condvar::new(),
            timers: Mutex::new(BinaryHeap::new()),
            timer_seq: AtomicU64::new(0),
            thread_id: OnceLock::new(),
        });

        let mut builder = thread::Builder::new().name(name);
        if let Some(size) = options.stack_size {
            builder = builder.stack_size(size);
        }

        let run_inner = Arc::clone(&inner);
        let on_start = options.on_start;
        let on_stop = options.on_stop;
        let handle = builder.spawn(move || {
            let _ = run_inner.thread_id.set(thread::current().id());
            if let Some(callback) = on_start {
                callback();
            }
            run_loop(&run_inner);
            if let Some(callback) = on_stop {
                callback();
            }
        })?;

        Ok(Self {
            inner,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// The thread name given at spawn.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of tasks submitted but not yet started.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopping.load(Ordering::Acquire)
    }

    /// Returns `true` when called from this worker's own thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.inner.is_worker_thread()
    }

    /// Queues `f` to run on the worker thread and returns immediately.
    ///
    /// Silently dropped if the worker is stopping.
    pub fn async_call(&self, site: CallSite, f: impl FnOnce() + Send + 'static) {
        if self.inner.stopping.load(Ordering::Acquire) {
            tracing::warn!(worker = %self.inner.name, %site, "task dropped, worker stopping");
            return;
        }
        self.inner.submit(Task {
            site,
            work: Box::new(f),
        });
    }

    /// Runs `f` on the worker thread and blocks for its result.
    ///
    /// Called from the worker's own thread, `f` runs inline. On
    /// timeout the task is *not* withdrawn: it still runs when its
    /// turn comes and the result is discarded.
    ///
    /// # Errors
    ///
    /// [`SyncCallError::Timeout`] if the result did not arrive in
    /// time; [`SyncCallError::Stopped`] if the worker shut down before
    /// running the task.
    pub fn sync_call<T, F>(&self, site: CallSite, f: F, timeout: WaitTimeout) -> Result<T, SyncCallError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.inner.is_worker_thread() {
            return Ok(f());
        }
        if self.inner.stopping.load(Ordering::Acquire) {
            return Err(SyncCallError::Stopped);
        }

        let slot = Arc::new(CallSlot::new());
        let mut guard = SlotGuard {
            slot: Arc::clone(&slot),
            fired: false,
        };
        self.inner.submit(Task {
            site,
            work: Box::new(move || {
                let value = f();
                guard.fired = true;
                guard.slot.complete(value);
            }),
        });
        slot.wait(timeout)
    }

    /// Schedules `f` to run on the worker thread every `interval`,
    /// first tick one `interval` from now.
    pub fn schedule_repeating(
        &self,
        site: CallSite,
        interval: Duration,
        f: impl FnMut() + Send + 'static,
    ) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = TimerEntry {
            deadline: Instant::now() + interval,
            interval,
            seq: self.inner.timer_seq.fetch_add(1, Ordering::Relaxed),
            cancelled: Arc::clone(&cancelled),
            callback: Box::new(f),
        };
        relock(self.inner.timers.lock()).push(entry);
        tracing::trace!(worker = %self.inner.name, %site, ?interval, "timer scheduled");
        // The new deadline may be sooner than whatever the thread is
        // currently parked on.
        self.inner.wake();
        TimerHandle { cancelled }
    }

    /// Stops the worker: every task queued before the stop request
    /// still runs, then the thread is joined. Tasks submitted after
    /// the final drain are abandoned, so their `sync_call` waiters
    /// observe [`SyncCallError::Stopped`]. Idempotent. Called from the
    /// worker's own thread the join is skipped and the run loop
    /// finishes the queue after the current task returns.
    pub fn stop(&self) {
        if self.inner.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(worker = %self.inner.name, "worker stopping");
        self.inner.wake();

        if self.inner.is_worker_thread() {
            return;
        }
        let handle = relock(self.handle.lock()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(inner: &Arc<WorkerInner>) {
    tracing::debug!(worker = %inner.name, "worker thread started");
    loop {
        let next_deadline = run_due_timers(inner);

        if let Some(task) = inner.queue.pop() {
            inner.pending.fetch_sub(1, Ordering::Release);
            tracing::trace!(worker = %inner.name, site = %task.site, "task start");
            let work = task.work;
            if std::panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
                tracing::error!(worker = %inner.name, site = %task.site, "task panicked");
            }
            continue;
        }

        if inner.stopping.load(Ordering::Acquire) {
            break;
        }

        let guard = relock(inner.park.lock());
        // Re-check under the park mutex; submit() notifies under the
        // same mutex, so a task that arrived since the pop above is
        // visible here.
        if inner.pending.load(Ordering::Acquire) > 0 || inner.stopping.load(Ordering::Acquire) {
            continue;
        }
        match next_deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    continue;
                }
                drop(inner.unpark.wait_timeout(guard, remaining));
            }
            None => {
                drop(inner.unpark.wait(guard));
            }
        }
    }

    // A push can land between the final empty pop and here; those
    // tasks never run, so drop them now to abandon their waiters. The
    // park mutex orders this drain against submit()'s drained check.
    let _guard = relock(inner.park.lock());
    inner.drain_queue();
    inner.drained.store(true, Ordering::Release);
    tracing::debug!(worker = %inner.name, "worker thread exiting");
}

/// Fires every due timer, re-arms the survivors, and reports the next
/// deadline. Callbacks run without the heap lock held.
fn run_due_timers(inner: &WorkerInner) -> Option<Instant> {
    if inner.stopping.load(Ordering::Acquire) {
        return None;
    }
    let mut timers = relock(inner.timers.lock());
    loop {
        let due = matches!(timers.peek(), Some(t) if t.deadline <= Instant::now());
        if !due {
            break;
        }
        let Some(mut entry) = timers.pop() else { break };
        if entry.cancelled.load(Ordering::Acquire) {
            continue;
        }
        drop(timers);
        if std::panic::catch_unwind(AssertUnwindSafe(|| (entry.callback)())).is_err() {
            tracing::error!(worker = %inner.name, "timer callback panicked");
            entry.cancelled.store(true, Ordering::Release);
        }
        entry.deadline = Instant::now() + entry.interval;
        timers = relock(inner.timers.lock());
        if !entry.cancelled.load(Ordering::Acquire) {
            timers.push(entry);
        }
    }
    timers.peek().map(|t| t.deadline)
}
