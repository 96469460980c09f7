//! Bounded slot pool
//!
//! Hands fixed-size buffers between a real-time producer that must never
//! block and a worker thread that may. All storage is allocated in
//! [`SlotPool::new`]; nothing allocates afterwards.
//!
//! Each slot carries a tag with three states:
//!
//! ```text
//!            acquire_unmarked               mark
//!  UNMARKED ─────────────────▶ HELD ─────────────────▶ MARKED
//!      ▲                        │ ▲                      │
//!      └────────── unmark ──────┘ └───── wait_marked ────┘
//! ```
//!
//! Only the side holding a [`SlotId`] may touch the slot's data, and a
//! `SlotId` is consumed by `mark`/`unmark`, so ownership moves in exactly
//! one direction at a time. What "marked" means is up to the caller: the
//! raw capture pool uses it for "has audio", the encoded pool is created
//! with [`SlotPool::new_marked`] and uses it for "free".
//!
//! Marked slots are handed out oldest first: `mark` stamps the slot with a
//! publication ticket and `wait_marked` claims the lowest one, so the
//! consumer sees frames in the order they were published no matter which
//! slot the producer happened to reuse. Both directions are a linear scan,
//! which is fine for the handful of slots a 5 ms pipeline needs.

use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

const UNMARKED: u8 = 0;
const HELD: u8 = 1;
const MARKED: u8 = 2;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Exclusive handle to a held slot
///
/// Not `Clone`: whoever owns the id owns the slot.
#[derive(Debug, PartialEq, Eq)]
pub struct SlotId {
    pool: u64,
    index: usize,
}

impl SlotId {
    pub fn index(&self) -> usize {
        self.index
    }
}

struct Slot<T> {
    state: CachePadded<AtomicU8>,
    /// Publication order, written by `mark` while the slot is held
    ticket: AtomicU64,
    data: Mutex<T>,
}

/// Fixed-capacity hand-off buffer between one producer and one consumer
pub struct SlotPool<T> {
    id: u64,
    slots: Box<[Slot<T>]>,
    /// Guards the condvar; slot states themselves are atomics
    wait_lock: Mutex<()>,
    available: Condvar,
    closed: AtomicBool,
    dropped: AtomicU64,
    next_ticket: AtomicU64,
}

impl<T> SlotPool<T> {
    /// Create a pool with every slot unmarked
    pub fn new(capacity: usize, init: impl FnMut() -> T) -> Self {
        Self::with_state(capacity, UNMARKED, init)
    }

    /// Create a pool with every slot marked
    pub fn new_marked(capacity: usize, init: impl FnMut() -> T) -> Self {
        Self::with_state(capacity, MARKED, init)
    }

    fn with_state(capacity: usize, state: u8, mut init: impl FnMut() -> T) -> Self {
        assert!(capacity > 0, "slot pool capacity must be non-zero");

        let slots = (0..capacity)
            .map(|_| Slot {
                state: CachePadded::new(AtomicU8::new(state)),
                ticket: AtomicU64::new(0),
                data: Mutex::new(init()),
            })
            .collect();

        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            slots,
            wait_lock: Mutex::new(()),
            available: Condvar::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Claim the first unmarked slot without blocking
    ///
    /// Returns `None` when every slot is held or marked. Safe to call from
    /// a real-time callback.
    pub fn acquire_unmarked(&self) -> Option<SlotId> {
        self.claim(UNMARKED)
    }

    /// Claim the longest-marked slot, sleeping until one is available
    ///
    /// Returns `None` once the pool is closed and no marked slot is left,
    /// so a consumer drains everything that was published before close.
    pub fn wait_marked(&self) -> Option<SlotId> {
        let mut guard = self.wait_lock.lock();
        loop {
            if let Some(id) = self.claim_oldest_marked() {
                return Some(id);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.available.wait(&mut guard);
        }
    }

    /// Publish a held slot as marked and wake one waiter
    pub fn mark(&self, id: SlotId) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.slot(&id).ticket.store(ticket, Ordering::Relaxed);
        self.release(&id, MARKED);
        let _guard = self.wait_lock.lock();
        self.available.notify_one();
    }

    /// Return a held slot to the unmarked state
    pub fn unmark(&self, id: SlotId) {
        self.release(&id, UNMARKED);
    }

    /// Run `f` with exclusive access to a held slot's contents
    pub fn with_data<R>(&self, id: &SlotId, f: impl FnOnce(&mut T) -> R) -> R {
        let slot = self.slot(id);
        if slot.state.load(Ordering::Acquire) != HELD {
            panic!("slot {} accessed while not held", id.index);
        }
        let mut data = match slot.data.try_lock() {
            Some(data) => data,
            None => panic!("slot {} accessed concurrently", id.index),
        };
        f(&mut data)
    }

    /// Stop the pool: waiters return once nothing marked is left
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.wait_lock.lock();
        self.available.notify_all();
    }

    /// Count a frame dropped because the pool was exhausted
    pub fn record_drop(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Snapshot of slot states; racy by nature, use for stats only
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            capacity: self.slots.len(),
            dropped: self.dropped(),
            ..Default::default()
        };
        for slot in self.slots.iter() {
            match slot.state.load(Ordering::Relaxed) {
                MARKED => stats.marked += 1,
                HELD => stats.held += 1,
                _ => stats.unmarked += 1,
            }
        }
        stats
    }

    fn claim(&self, from: u8) -> Option<SlotId> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            slot.state
                .compare_exchange(from, HELD, Ordering::AcqRel, Ordering::Relaxed)
                .ok()
                .map(|_| SlotId {
                    pool: self.id,
                    index,
                })
        })
    }

    fn claim_oldest_marked(&self) -> Option<SlotId> {
        loop {
            let index = self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.state.load(Ordering::Acquire) == MARKED)
                .min_by_key(|(_, slot)| slot.ticket.load(Ordering::Relaxed))
                .map(|(index, _)| index)?;

            // Lost a race for this slot; rescan
            if self.slots[index]
                .state
                .compare_exchange(MARKED, HELD, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(SlotId {
                    pool: self.id,
                    index,
                });
            }
        }
    }

    fn release(&self, id: &SlotId, to: u8) {
        let slot = self.slot(id);
        if let Err(actual) =
            slot.state
                .compare_exchange(HELD, to, Ordering::AcqRel, Ordering::Relaxed)
        {
            panic!(
                "slot {} released from state {} (expected held)",
                id.index, actual
            );
        }
    }

    fn slot(&self, id: &SlotId) -> &Slot<T> {
        if id.pool != self.id {
            panic!("slot id belongs to a different pool");
        }
        match self.slots.get(id.index) {
            Some(slot) => slot,
            None => panic!("slot index {} out of range 0..{}", id.index, self.slots.len()),
        }
    }
}

/// Pool occupancy statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub unmarked: usize,
    pub held: usize,
    pub marked: usize,
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_exhaustion_and_recovery() {
        let pool = SlotPool::new(4, || 0u64);

        let mut held: Vec<SlotId> = (0..4).map(|_| pool.acquire_unmarked().unwrap()).collect();
        assert!(pool.acquire_unmarked().is_none());

        for id in held.drain(..) {
            pool.mark(id);
        }
        assert!(pool.acquire_unmarked().is_none());

        let taken = pool.wait_marked().unwrap();
        pool.unmark(taken);

        assert!(pool.acquire_unmarked().is_some());
        assert!(pool.acquire_unmarked().is_none());
    }

    #[test]
    fn test_marked_pool_starts_full() {
        let pool = SlotPool::new_marked(3, || 0u8);
        assert!(pool.acquire_unmarked().is_none());
        assert_eq!(pool.stats().marked, 3);

        let id = pool.wait_marked().unwrap();
        assert_eq!(pool.stats().held, 1);
        pool.mark(id);
        assert_eq!(pool.stats().marked, 3);
    }

    #[test]
    fn test_data_moves_with_ownership() {
        let pool = SlotPool::new(2, || 0u32);

        let id = pool.acquire_unmarked().unwrap();
        pool.with_data(&id, |v| *v = 42);
        pool.mark(id);

        let id = pool.wait_marked().unwrap();
        assert_eq!(pool.with_data(&id, |v| *v), 42);
        pool.unmark(id);
    }

    #[test]
    fn test_wait_marked_wakes_on_mark() {
        let pool = Arc::new(SlotPool::new(2, || 0u32));
        let consumer = {
            let pool = pool.clone();
            thread::spawn(move || {
                let id = pool.wait_marked().unwrap();
                let value = pool.with_data(&id, |v| *v);
                pool.unmark(id);
                value
            })
        };

        thread::sleep(Duration::from_millis(20));
        let id = pool.acquire_unmarked().unwrap();
        pool.with_data(&id, |v| *v = 7);
        pool.mark(id);

        assert_eq!(consumer.join().unwrap(), 7);
    }

    #[test]
    fn test_marked_slots_come_out_in_publication_order() {
        let pool = SlotPool::new(4, || 0u64);

        for sequence in 1..=4 {
            let id = pool.acquire_unmarked().unwrap();
            pool.with_data(&id, |v| *v = sequence);
            pool.mark(id);
        }

        let take = |pool: &SlotPool<u64>| {
            let id = pool.wait_marked().unwrap();
            let value = pool.with_data(&id, |v| *v);
            pool.unmark(id);
            value
        };
        assert_eq!(take(&pool), 1);
        assert_eq!(take(&pool), 2);

        // The producer reuses the two low slots for newer frames
        for sequence in 5..=6 {
            let id = pool.acquire_unmarked().unwrap();
            assert!(id.index() < 2);
            pool.with_data(&id, |v| *v = sequence);
            pool.mark(id);
        }

        let rest: Vec<u64> = (0..4).map(|_| take(&pool)).collect();
        assert_eq!(rest, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_close_drains_then_stops() {
        let pool = Arc::new(SlotPool::new(2, || 0u32));
        let id = pool.acquire_unmarked().unwrap();
        pool.mark(id);
        pool.close();

        let id = pool.wait_marked().expect("marked slot survives close");
        pool.unmark(id);
        assert!(pool.wait_marked().is_none());
    }

    #[test]
    fn test_close_wakes_blocked_waiter() {
        let pool = Arc::new(SlotPool::new(1, || ()));
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.wait_marked().is_none())
        };
        thread::sleep(Duration::from_millis(20));
        pool.close();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_drop_counter() {
        let pool = SlotPool::new(1, || ());
        assert_eq!(pool.record_drop(), 1);
        assert_eq!(pool.record_drop(), 2);
        assert_eq!(pool.stats().dropped, 2);
    }

    #[test]
    #[should_panic(expected = "different pool")]
    fn test_foreign_slot_panics() {
        let a = SlotPool::new(1, || ());
        let b = SlotPool::new(1, || ());
        let id = a.acquire_unmarked().unwrap();
        b.mark(id);
    }
}
