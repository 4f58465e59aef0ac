//! Lock synchronization (mutexes, rwlocks, spinlocks — all modeled
//! identically as a single held-by/waiters pair).

use std::collections::VecDeque;

use tracing::warn;

use crate::common::{Address, Tid, Transition, INVALID_THREAD_ID};

use super::model::SyncModel;

/// A lock: who holds it, and who is waiting for it, in arrival order.
#[derive(Debug, Default)]
pub struct Lock {
    pub held_by: Tid,
    pub waiters: VecDeque<Tid>,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            held_by: INVALID_THREAD_ID,
            waiters: VecDeque::new(),
        }
    }
}

pub fn add_lock(sm: &mut SyncModel, address: Address) {
    sm.locks.insert(address, Lock::new());
}

fn grant(sm: &mut SyncModel, thread_id: Tid, address: Address) {
    sm.locks.get_mut(&address).unwrap().held_by = thread_id;
    sm.threads.get_mut(&thread_id).unwrap().locks_held.push(address);
}

/// Acquire a lock on behalf of `thread_id`. Auto-registers the lock (with a
/// warning) if the trace never saw its init call.
pub fn acquire(sm: &mut SyncModel, thread_id: Tid, address: Address) -> Transition {
    if !sm.locks.contains_key(&address) {
        warn!(target: "rhythm", "encountered a lock that was not initialized: {address}");
        add_lock(sm, address);
    }

    let mut t = Transition::default();

    let held_by = sm.locks.get(&address).unwrap().held_by;
    if held_by == INVALID_THREAD_ID {
        grant(sm, thread_id, address);
    } else {
        sm.locks.get_mut(&address).unwrap().waiters.push_back(thread_id);
        t.to_sleep.push(thread_id);
    }

    t
}

/// Release a lock held by `thread_id`, handing it to the oldest waiter if
/// any.
///
/// Panics if `thread_id` is not the current holder: that is an invariant
/// violation, not a recoverable condition.
pub fn release(sm: &mut SyncModel, thread_id: Tid, address: Address) -> Transition {
    let lock = sm
        .locks
        .get(&address)
        .unwrap_or_else(|| panic!("release of unregistered lock {address}"));
    assert_eq!(
        lock.held_by, thread_id,
        "thread {thread_id} released lock {address} it does not hold"
    );

    sm.threads
        .get_mut(&thread_id)
        .unwrap()
        .locks_held
        .retain(|&a| a != address);

    let mut t = Transition::default();
    let lock = sm.locks.get_mut(&address).unwrap();

    if let Some(next) = lock.waiters.pop_front() {
        drop(lock);
        grant(sm, next, address);
        t.to_wake.push(next);
    } else {
        lock.held_by = INVALID_THREAD_ID;
    }

    t
}
