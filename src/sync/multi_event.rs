//! Multi-object wait over a fixed pool of signal slots.
//!
//! Some platforms have no native "wait for any/all of these handles"
//! primitive; [`MultiEventFactory`] supplies one. The factory owns 64
//! slots, an allocation bitset, a signaled bitset, and a single
//! mutex/condvar pair shared by every slot: a `set` on any slot must
//! wake all waiters, because any waiter might be watching any subset.
//!
//! A successful wait performs an atomic poll-and-reset: only the bits
//! among the *requested* slots that were actually observed signaled are
//! cleared. A third slot signaled concurrently stays signaled for its
//! own waiter.
//!
//! # Slot lifecycle
//!
//! `free → open → (signaled ⇄ unsignaled) → closed`. Closing a slot
//! while threads are parked on it does not strand them: the factory
//! counts parked waiters per slot, `close` wakes them with
//! [`WaitError::Closed`], and the slot rejoins the free pool only after
//! the last such waiter has left. A re-`open` therefore can never alias
//! a slot that parked waiters still reference.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Instant;

use crate::error::{FactoryError, WaitError};
use crate::sync::relock;
use crate::types::WaitTimeout;

/// Number of slots per factory.
pub const SLOT_CAPACITY: usize = 64;

/// Handle into exactly one slot of a [`MultiEventFactory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u8);

impl SlotId {
    /// Returns the slot index, `0..SLOT_CAPACITY`.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    const fn bit(self) -> u64 {
        1 << self.0
    }
}

#[derive(Debug)]
struct Slots {
    /// Slots currently leased.
    open: u64,
    /// Open slots currently signaled.
    signaled: u64,
    /// Closed slots whose parked waiters have not all left yet.
    draining: u64,
    /// Parked waiters per slot.
    waiters: [u16; SLOT_CAPACITY],
}

/// Fixed-capacity pool of named signal slots with wait-for-any/all.
#[derive(Debug)]
pub struct MultiEventFactory {
    slots: Mutex<Slots>,
    cond: Condvar,
}

impl MultiEventFactory {
    /// Creates a factory with all slots free.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                open: 0,
                signaled: 0,
                draining: 0,
                waiters: [0; SLOT_CAPACITY],
            }),
            cond: Condvar::new(),
        }
    }

    /// Leases the first free slot.
    ///
    /// # Errors
    ///
    /// [`FactoryError::Exhausted`] if all slots are leased or still
    /// draining waiters from a recent close.
    pub fn open(&self) -> Result<SlotId, FactoryError> {
        let mut slots = relock(self.slots.lock());
        let free = !(slots.open | slots.draining);
        if free == 0 {
            return Err(FactoryError::Exhausted);
        }
        let index = free.trailing_zeros() as u8;
        let id = SlotId(index);
        slots.open |= id.bit();
        slots.signaled &= !id.bit();
        Ok(id)
    }

    /// Returns a slot to the pool.
    ///
    /// Parked waiters watching the slot are woken and observe
    /// [`WaitError::Closed`]. Returns `false` if the slot was not open.
    pub fn close(&self, id: SlotId) -> bool {
        let mut slots = relock(self.slots.lock());
        if slots.open & id.bit() == 0 {
            return false;
        }
        slots.open &= !id.bit();
        slots.signaled &= !id.bit();
        if slots.waiters[id.index()] > 0 {
            slots.draining |= id.bit();
            drop(slots);
            self.cond.notify_all();
        }
        true
    }

    /// Signals a slot. No-op if the slot is already signaled; returns
    /// `false` if it is not open.
    pub fn set(&self, id: SlotId) -> bool {
        let mut slots = relock(self.slots.lock());
        if slots.open & id.bit() == 0 {
            return false;
        }
        slots.signaled |= id.bit();
        drop(slots);
        self.cond.notify_all();
        true
    }

    /// Returns `true` if the slot is open and currently signaled.
    #[must_use]
    pub fn is_signaled(&self, id: SlotId) -> bool {
        relock(self.slots.lock()).signaled & id.bit() != 0
    }

    /// Blocks until one (`all = false`) or every (`all = true`) slot in
    /// `ids` is signaled, then atomically clears exactly the observed
    /// bits and returns them as a mask.
    ///
    /// # Errors
    ///
    /// - [`WaitError::Timeout`] if the condition was not met in time.
    /// - [`WaitError::Closed`] if any requested slot is not open, or is
    ///   closed while this thread is parked.
    pub fn wait(&self, ids: &[SlotId], all: bool, timeout: WaitTimeout) -> Result<u64, WaitError> {
        let mask = ids.iter().fold(0u64, |m, id| m | id.bit());
        if mask == 0 {
            return Ok(0);
        }
        let deadline = timeout.bound().map(|d| Instant::now() + d);

        let mut slots = relock(self.slots.lock());
        for index in BitIndices::of(mask) {
            slots.waiters[index] += 1;
        }

        let outcome = loop {
            if slots.open & mask != mask {
                break Err(WaitError::Closed);
            }
            let observed = slots.signaled & mask;
            let ready = if all { observed == mask } else { observed != 0 };
            if ready {
                slots.signaled &= !observed;
                break Ok(observed);
            }
            match timeout {
                WaitTimeout::Poll => break Err(WaitError::Timeout),
                WaitTimeout::Infinite => {
                    slots = relock(self.cond.wait(slots));
                }
                WaitTimeout::Bounded(_) => {
                    let deadline = deadline.unwrap_or_else(Instant::now);
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break Err(WaitError::Timeout);
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(slots, remaining)
                        .unwrap_or_else(PoisonError::into_inner);
                    slots = guard;
                }
            }
        };

        for index in BitIndices::of(mask) {
            slots.waiters[index] -= 1;
            let bit = 1u64 << index;
            if slots.waiters[index] == 0 && slots.draining & bit != 0 {
                slots.draining &= !bit;
            }
        }
        outcome
    }
}

impl Default for MultiEventFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the set bit indices of a mask.
struct BitIndices(u64);

impl BitIndices {
    const fn of(mask: u64) -> Self {
        Self(mask)
    }
}

impl Iterator for BitIndices {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let index = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(index)
    }
}

/// RAII lease of one factory slot: opens on construction, closes on
/// drop. The factory must outlive the lease; sharing it behind an
/// [`Arc`] is the normal arrangement.
#[derive(Debug)]
pub struct MultiEvent {
    factory: Arc<MultiEventFactory>,
    id: SlotId,
}

impl MultiEvent {
    /// Leases a slot from `factory`.
    ///
    /// # Errors
    ///
    /// [`FactoryError::Exhausted`] if no slot is free.
    pub fn open(factory: &Arc<MultiEventFactory>) -> Result<Self, FactoryError> {
        let id = factory.open()?;
        Ok(Self {
            factory: Arc::clone(factory),
            id,
        })
    }

    /// Returns the leased slot id.
    #[must_use]
    pub const fn id(&self) -> SlotId {
        self.id
    }

    /// Signals the leased slot.
    pub fn set(&self) {
        self.factory.set(self.id);
    }

    /// Waits for the leased slot and consumes its signal.
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] if the signal did not arrive in time.
    pub fn wait(&self, timeout: WaitTimeout) -> Result<(), WaitError> {
        self.factory.wait(&[self.id], true, timeout).map(|_| ())
    }
}

impl Drop for MultiEvent {
    fn drop(&mut self) {
        self.factory.close(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::thread;
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn open_exhausts_at_capacity() {
        init_test("open_exhausts_at_capacity");
        let factory = MultiEventFactory::new();
        let ids: Vec<_> = (0..SLOT_CAPACITY).map(|_| factory.open().expect("slot")).collect();
        let overflow = factory.open();
        crate::assert_with_log!(
            matches!(overflow, Err(FactoryError::Exhausted)),
            "65th open fails",
            "Exhausted",
            format!("{overflow:?}")
        );

        factory.close(ids[10]);
        let reused = factory.open().expect("slot after close");
        crate::assert_with_log!(
            reused == ids[10],
            "freed slot is reused",
            ids[10].index(),
            reused.index()
        );
        crate::test_complete!("open_exhausts_at_capacity");
    }

    #[test]
    fn wait_any_returns_first_signal() {
        init_test("wait_any_returns_first_signal");
        let factory = MultiEventFactory::new();
        let a = factory.open().expect("a");
        let b = factory.open().expect("b");

        factory.set(b);
        let observed = factory
            .wait(&[a, b], false, WaitTimeout::Poll)
            .expect("any-wait");
        crate::assert_with_log!(observed == b.bit(), "only b observed", b.bit(), observed);

        // b's signal was consumed; a is still unsignaled.
        let empty = factory.wait(&[a, b], false, WaitTimeout::Poll);
        crate::assert_with_log!(
            empty == Err(WaitError::Timeout),
            "signals consumed",
            Err::<u64, _>(WaitError::Timeout),
            empty
        );
        crate::test_complete!("wait_any_returns_first_signal");
    }

    #[test]
    fn wait_all_needs_every_slot_and_spares_others() {
        init_test("wait_all_needs_every_slot_and_spares_others");
        let factory = Arc::new(MultiEventFactory::new());
        let a = factory.open().expect("a");
        let b = factory.open().expect("b");
        let c = factory.open().expect("c");

        factory.set(a);
        let partial = factory.wait(&[a, b], true, WaitTimeout::from_millis(50));
        crate::assert_with_log!(
            partial == Err(WaitError::Timeout),
            "a alone does not satisfy all",
            Err::<u64, _>(WaitError::Timeout),
            partial
        );
        // The failed all-wait must not have consumed a's signal.
        let a_still = factory.is_signaled(a);
        crate::assert_with_log!(a_still, "a still signaled after timeout", true, a_still);

        let waiter = {
            let factory = Arc::clone(&factory);
            thread::spawn(move || factory.wait(&[a, b], true, WaitTimeout::from_millis(2000)))
        };
        thread::sleep(Duration::from_millis(100));
        factory.set(c);
        factory.set(b);
        let observed = waiter.join().expect("waiter panicked").expect("all-wait");
        crate::assert_with_log!(
            observed == (a.bit() | b.bit()),
            "both bits observed",
            a.bit() | b.bit(),
            observed
        );

        // c belongs to another waiter and must survive untouched.
        let c_still = factory.is_signaled(c);
        crate::assert_with_log!(c_still, "third slot spared", true, c_still);
        crate::test_complete!("wait_all_needs_every_slot_and_spares_others");
    }

    #[test]
    fn close_hands_waiters_a_closed_result() {
        init_test("close_hands_waiters_a_closed_result");
        let factory = Arc::new(MultiEventFactory::new());
        let a = factory.open().expect("a");

        let waiter = {
            let factory = Arc::clone(&factory);
            thread::spawn(move || factory.wait(&[a], true, WaitTimeout::Infinite))
        };
        thread::sleep(Duration::from_millis(100));
        factory.close(a);
        let result = waiter.join().expect("waiter panicked");
        crate::assert_with_log!(
            result == Err(WaitError::Closed),
            "waiter observes close",
            Err::<u64, _>(WaitError::Closed),
            result
        );

        // The slot drained and is allocatable again.
        let reopened = factory.open().expect("reopen");
        crate::assert_with_log!(reopened == a, "slot back in pool", a.index(), reopened.index());
        crate::test_complete!("close_hands_waiters_a_closed_result");
    }

    #[test]
    fn lease_returns_slot_on_drop() {
        init_test("lease_returns_slot_on_drop");
        let factory = Arc::new(MultiEventFactory::new());
        let first_index = {
            let lease = MultiEvent::open(&factory).expect("lease");
            lease.set();
            lease.wait(WaitTimeout::Poll).expect("own signal");
            lease.id().index()
        };
        let next = factory.open().expect("slot after drop");
        crate::assert_with_log!(
            next.index() == first_index,
            "dropped lease freed its slot",
            first_index,
            next.index()
        );
        crate::test_complete!("lease_returns_slot_on_drop");
    }
}
