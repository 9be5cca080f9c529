//! Reader/writer lock with writer-preference and starvation avoidance.
//!
//! # Fairness
//!
//! The portable backend ([`FairRwLock`]) keeps a usage counter (`0`
//! free, `> 0` readers, `-1` writer), a FIFO queue of waiting writers
//! (one condvar each, so writers acquire in strict arrival order), a
//! batch of waiting readers on one shared condvar, and a *preference
//! token* deciding who is woken next. On every successful acquisition
//! the token flips to favor the other role, so neither side can
//! monopolize the lock under sustained contention from both:
//!
//! | Scenario                      | Behavior                                 |
//! |-------------------------------|------------------------------------------|
//! | Lock free, nobody queued      | Either role acquires immediately         |
//! | Writer queued, token = read   | New readers still admitted this turn     |
//! | Writer queued, token = write  | New readers park until the writer's turn |
//! | Multiple writers              | FIFO among writers, always               |
//! | Readers woken on release      | Admitted as one batch (one token flip)   |
//!
//! [`set_prefer`](RwLock::set_prefer) pins the token to one role.
//! A fixed preference can starve the disfavored role indefinitely under
//! sustained contention; that is a deliberate, documented trade-off for
//! callers that want it, not a defect of the default alternating mode.
//!
//! # Backends
//!
//! [`RawRwLock`] is the seam between the public [`RwLock`] surface and
//! the acquisition algorithm. [`FairRwLock`] is the hand-rolled
//! reference; [`NativeRwLock`] is a thin wrapper over the platform
//! primitive (`parking_lot`) for builds where its fairness is
//! acceptable. `set_prefer` is a no-op on the native backend.
//!
//! # Debug-only deadlock guard
//!
//! In debug builds the fair backend tracks holder thread identities and
//! panics with a diagnostic on patterns that are provably fatal under
//! writer preference: re-acquiring a reader or writer lock already held
//! by the same thread, or crossing roles while holding the other. The
//! check is compiled out of release builds and is never read for
//! correctness.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::sync::relock;

/// Which role the lock favors when both are waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefer {
    /// Always wake readers first. Can starve writers.
    Read,
    /// Always wake writers first. Can starve readers.
    Write,
    /// Alternate roles on every acquisition (the default).
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Reader,
    Writer,
}

impl Role {
    const fn other(self) -> Self {
        match self {
            Self::Reader => Self::Writer,
            Self::Writer => Self::Reader,
        }
    }
}

/// Acquisition backend behind [`RwLock`].
///
/// Callers must pair every release with a prior acquire by the same
/// logical owner; the fair backend enforces this in debug builds.
pub trait RawRwLock: Send + Sync {
    /// Blocks until shared access is granted.
    fn acquire_read(&self);
    /// Releases shared access.
    fn release_read(&self);
    /// Blocks until exclusive access is granted.
    fn acquire_write(&self);
    /// Releases exclusive access.
    fn release_write(&self);
    /// Sets the fairness preference, where the backend supports one.
    fn set_prefer(&self, prefer: Prefer);
}

#[cfg(debug_assertions)]
#[derive(Debug, Default)]
struct HolderSet {
    readers: Vec<std::thread::ThreadId>,
    writer: Option<std::thread::ThreadId>,
}

#[cfg(debug_assertions)]
impl HolderSet {
    fn check_reader(&self) {
        let me = std::thread::current().id();
        assert!(
            !self.readers.contains(&me),
            "deadlock: thread {me:?} re-acquired a reader lock it already holds"
        );
        assert!(
            self.writer != Some(me),
            "deadlock: thread {me:?} acquired a reader lock while holding the writer lock"
        );
    }

    fn check_writer(&self) {
        let me = std::thread::current().id();
        assert!(
            self.writer != Some(me),
            "deadlock: thread {me:?} re-acquired the writer lock it already holds"
        );
        assert!(
            !self.readers.contains(&me),
            "deadlock: thread {me:?} acquired the writer lock while holding a reader lock"
        );
    }

    fn add_reader(&mut self) {
        self.readers.push(std::thread::current().id());
    }

    fn remove_reader(&mut self) {
        let me = std::thread::current().id();
        if let Some(pos) = self.readers.iter().position(|&id| id == me) {
            self.readers.swap_remove(pos);
        }
    }

    fn set_writer(&mut self) {
        self.writer = Some(std::thread::current().id());
    }

    fn clear_writer(&mut self) {
        self.writer = None;
    }
}

/// One queued writer: a private condvar (paired with the shared state
/// mutex) plus a grant flag written under that mutex.
#[derive(Debug)]
struct WriterWaiter {
    cond: Condvar,
    granted: AtomicBool,
}

#[derive(Debug)]
struct LockState {
    /// `0` free, `> 0` active readers, `-1` one active writer.
    usage: i64,
    /// Preference token: who is favored next (consulted in `Auto`).
    token: Role,
    prefer: Prefer,
    /// Readers parked on the shared reader condvar.
    waiting_readers: usize,
    /// Admission slots already counted into `usage` for woken readers.
    reader_grants: usize,
    writer_queue: VecDeque<Arc<WriterWaiter>>,
    #[cfg(debug_assertions)]
    holders: HolderSet,
}

impl LockState {
    fn favored(&self) -> Role {
        match self.prefer {
            Prefer::Read => Role::Reader,
            Prefer::Write => Role::Writer,
            Prefer::Auto => self.token,
        }
    }

    fn flip_token(&mut self, acquired: Role) {
        if self.prefer == Prefer::Auto {
            self.token = acquired.other();
        }
    }
}

/// The hand-rolled fair backend; the portable reference implementation.
#[derive(Debug)]
pub struct FairRwLock {
    state: Mutex<LockState>,
    reader_cond: Condvar,
}

impl FairRwLock {
    /// Creates an unlocked fair lock with alternating preference.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                usage: 0,
                token: Role::Reader,
                prefer: Prefer::Auto,
                waiting_readers: 0,
                reader_grants: 0,
                writer_queue: VecDeque::new(),
                #[cfg(debug_assertions)]
                holders: HolderSet::default(),
            }),
            reader_cond: Condvar::new(),
        }
    }

    /// Recomputes who to wake once the lock has gone free.
    fn wake(&self, s: &mut LockState) {
        if s.favored() == Role::Reader && s.waiting_readers > 0 {
            self.grant_readers(s);
        } else if let Some(writer) = s.writer_queue.pop_front() {
            s.usage = -1;
            s.flip_token(Role::Writer);
            writer.granted.store(true, Ordering::Relaxed);
            writer.cond.notify_one();
        } else if s.waiting_readers > 0 {
            self.grant_readers(s);
        }
    }

    /// Admits every currently-waiting reader as one batch: one token
    /// flip per reader turn, so a queued writer gets the next turn.
    fn grant_readers(&self, s: &mut LockState) {
        s.usage += s.waiting_readers as i64;
        s.reader_grants += s.waiting_readers;
        s.waiting_readers = 0;
        s.flip_token(Role::Reader);
        self.reader_cond.notify_all();
    }
}

impl RawRwLock for FairRwLock {
    fn acquire_read(&self) {
        let mut s = relock(self.state.lock());
        #[cfg(debug_assertions)]
        s.holders.check_reader();

        if s.usage >= 0 && (s.writer_queue.is_empty() || s.favored() == Role::Reader) {
            s.usage += 1;
            s.flip_token(Role::Reader);
        } else {
            s.waiting_readers += 1;
            loop {
                s = relock(self.reader_cond.wait(s));
                if s.reader_grants > 0 {
                    // Admission was already counted into `usage` by the
                    // granting thread.
                    s.reader_grants -= 1;
                    break;
                }
            }
        }

        #[cfg(debug_assertions)]
        s.holders.add_reader();
    }

    fn release_read(&self) {
        let mut s = relock(self.state.lock());
        debug_assert!(s.usage > 0, "release_read without an active reader");
        #[cfg(debug_assertions)]
        s.holders.remove_reader();
        s.usage -= 1;
        if s.usage == 0 {
            self.wake(&mut s);
        }
    }

    fn acquire_write(&self) {
        let mut s = relock(self.state.lock());
        #[cfg(debug_assertions)]
        s.holders.check_writer();

        if s.usage == 0
            && s.writer_queue.is_empty()
            && (s.waiting_readers == 0 || s.favored() == Role::Writer)
        {
            s.usage = -1;
            s.flip_token(Role::Writer);
        } else {
            let waiter = Arc::new(WriterWaiter {
                cond: Condvar::new(),
                granted: AtomicBool::new(false),
            });
            s.writer_queue.push_back(Arc::clone(&waiter));
            loop {
                s = relock(waiter.cond.wait(s));
                if waiter.granted.load(Ordering::Relaxed) {
                    // The granting thread already set `usage = -1` and
                    // popped us from the queue.
                    break;
                }
            }
        }

        #[cfg(debug_assertions)]
        s.holders.set_writer();
    }

    fn release_write(&self) {
        let mut s = relock(self.state.lock());
        debug_assert!(s.usage == -1, "release_write without the active writer");
        #[cfg(debug_assertions)]
        s.holders.clear_writer();
        s.usage = 0;
        self.wake(&mut s);
    }

    fn set_prefer(&self, prefer: Prefer) {
        relock(self.state.lock()).prefer = prefer;
    }
}

impl Default for FairRwLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Thin wrapper over the platform reader/writer primitive.
///
/// Used where the native lock's fairness is acceptable; the hand-rolled
/// [`FairRwLock`] is the reference elsewhere. `set_prefer` is a no-op:
/// the native primitive's policy is fixed.
///
/// Ownership counters validate that every release pairs with a held
/// acquisition before the call reaches the raw primitive.
pub struct NativeRwLock {
    raw: parking_lot::RawRwLock,
    readers: AtomicUsize,
    writer: AtomicBool,
}

impl std::fmt::Debug for NativeRwLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRwLock")
            .field("readers", &self.readers.load(Ordering::Relaxed))
            .field("writer", &self.writer.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl NativeRwLock {
    /// Creates an unlocked native-backed lock.
    #[must_use]
    pub fn new() -> Self {
        use parking_lot::lock_api::RawRwLock as _;
        Self {
            raw: parking_lot::RawRwLock::INIT,
            readers: AtomicUsize::new(0),
            writer: AtomicBool::new(false),
        }
    }
}

impl RawRwLock for NativeRwLock {
    fn acquire_read(&self) {
        use parking_lot::lock_api::RawRwLock as _;
        self.raw.lock_shared();
        self.readers.fetch_add(1, Ordering::Relaxed);
    }

    #[allow(unsafe_code)]
    fn release_read(&self) {
        use parking_lot::lock_api::RawRwLock as _;
        let prev = self.readers.fetch_sub(1, Ordering::Relaxed);
        assert!(prev > 0, "release_read without an active reader");
        // Safety: the counter above proves a shared lock is held; the
        // manual acquire/release surface transfers lock ownership to
        // the caller, matching lock_api's send-guard model.
        unsafe { self.raw.unlock_shared() };
    }

    fn acquire_write(&self) {
        use parking_lot::lock_api::RawRwLock as _;
        self.raw.lock_exclusive();
        self.writer.store(true, Ordering::Relaxed);
    }

    #[allow(unsafe_code)]
    fn release_write(&self) {
        use parking_lot::lock_api::RawRwLock as _;
        assert!(
            self.writer.swap(false, Ordering::Relaxed),
            "release_write without the active writer"
        );
        // Safety: the flag above proves the exclusive lock is held.
        unsafe { self.raw.unlock_exclusive() };
    }

    fn set_prefer(&self, _prefer: Prefer) {}
}

impl Default for NativeRwLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader/writer mutual exclusion with two fairness policies.
///
/// Defaults to the fair backend; [`RwLock::native`] selects the
/// platform primitive. Embed it as a field of the owner object and
/// never reseat it; destroying it while a thread is parked is out of
/// contract.
#[derive(Debug, Default)]
pub struct RwLock<R: RawRwLock = FairRwLock> {
    raw: R,
}

impl RwLock<FairRwLock> {
    /// Creates a lock on the fair reference backend.
    #[must_use]
    pub fn new() -> Self {
        Self::from_raw(FairRwLock::new())
    }
}

impl RwLock<NativeRwLock> {
    /// Creates a lock on the platform-native backend.
    #[must_use]
    pub fn native() -> Self {
        Self::from_raw(NativeRwLock::new())
    }
}

impl<R: RawRwLock> RwLock<R> {
    /// Wraps an explicit backend.
    pub fn from_raw(raw: R) -> Self {
        Self { raw }
    }

    /// Blocks until shared access is granted.
    pub fn acquire_read(&self) {
        self.raw.acquire_read();
    }

    /// Releases shared access acquired with [`acquire_read`](Self::acquire_read).
    pub fn release_read(&self) {
        self.raw.release_read();
    }

    /// Blocks until exclusive access is granted.
    pub fn acquire_write(&self) {
        self.raw.acquire_write();
    }

    /// Releases exclusive access acquired with [`acquire_write`](Self::acquire_write).
    pub fn release_write(&self) {
        self.raw.release_write();
    }

    /// Sets the fairness preference. `Prefer::Read`/`Prefer::Write` pin
    /// the token and can starve the other role; `Prefer::Auto` restores
    /// alternation.
    pub fn set_prefer(&self, prefer: Prefer) {
        self.raw.set_prefer(prefer);
    }

    /// Acquires shared access for the lifetime of the guard.
    pub fn read_guard(&self) -> ReadGuard<'_, R> {
        self.acquire_read();
        ReadGuard { lock: self }
    }

    /// Acquires exclusive access for the lifetime of the guard.
    pub fn write_guard(&self) -> WriteGuard<'_, R> {
        self.acquire_write();
        WriteGuard { lock: self }
    }
}

/// Scoped reader lease; releases on drop, on every exit path.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReadGuard<'a, R: RawRwLock = FairRwLock> {
    lock: &'a RwLock<R>,
}

impl<R: RawRwLock> Drop for ReadGuard<'_, R> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

/// Scoped writer lease; releases on drop, on every exit path.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct WriteGuard<'a, R: RawRwLock = FairRwLock> {
    lock: &'a RwLock<R>,
}

impl<R: RawRwLock> Drop for WriteGuard<'_, R> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}
