//! Barrier synchronization.

use std::collections::VecDeque;

use crate::common::{Address, Tid, Transition};

use super::model::SyncModel;

/// A barrier: the arrival threshold and who has arrived so far.
#[derive(Debug)]
pub struct Barrier {
    pub count: usize,
    pub waiters: VecDeque<Tid>,
}

impl Barrier {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            waiters: VecDeque::new(),
        }
    }
}

/// Register a barrier. Re-initializing an address that is already live
/// replaces its state outright (the original source comments out the
/// not-present assertion here; preserved rather than corrected).
pub fn add_barrier(sm: &mut SyncModel, address: Address, count: usize) {
    assert!(count > 0, "barrier count must be positive");
    sm.barriers.insert(address, Barrier::new(count));
}

/// Arrive at a barrier. The thread that completes the barrier (the last
/// arrival) continues running; every other waiter is woken.
pub fn barrier_wait(sm: &mut SyncModel, thread_id: Tid, address: Address) -> Transition {
    let barrier = sm
        .barriers
        .get_mut(&address)
        .unwrap_or_else(|| panic!("wait on unregistered barrier {address}"));

    barrier.waiters.push_back(thread_id);

    let mut t = Transition::default();
    if barrier.waiters.len() == barrier.count {
        for &waiter in &barrier.waiters {
            if waiter != thread_id {
                t.to_wake.push(waiter);
            }
        }
        barrier.waiters.clear();
    } else {
        t.to_sleep.push(thread_id);
    }

    t
}
