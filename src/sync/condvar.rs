//! Condition-variable synchronization.
//!
//! The simulator never re-executes application code, so it cannot know
//! exactly how many times a producer will signal/broadcast before a
//! consumer's wait is reached. It approximates this with a saturating
//! `production` counter and a liveness escape (`can_wait`) that lets a
//! consumer proceed without blocking when no live producer could ever wake
//! it — see `crate::sync::model::break_deadlock` for the complementary
//! safety net used when the approximation still causes a stall.

use std::collections::{HashSet, VecDeque};

use tracing::warn;

use crate::common::{Address, Event, EventKind, Tid, Transition, INVALID_THREAD_ID};

use super::lock::acquire;
use super::model::SyncModel;

/// A condition variable: who produces on it, who consumes from it, and an
/// approximation of pending-wakeup state.
#[derive(Debug, Default)]
pub struct ConditionVariable {
    pub signallers: HashSet<Tid>,
    pub signal_count: u64,
    pub broadcasters: HashSet<Tid>,
    pub broadcast_count: u64,
    pub last_broadcaster: Tid,
    pub consumers: HashSet<Tid>,
    /// Saturating counter of pending wakeups, capped at `consumers.len()`.
    pub production: u64,
    pub waiters: VecDeque<Tid>,
    /// Mutex addresses parallel to `waiters`.
    pub mutexes: VecDeque<Address>,
}

impl ConditionVariable {
    pub fn new() -> Self {
        Self {
            last_broadcaster: INVALID_THREAD_ID,
            ..Default::default()
        }
    }
}

pub fn add_condition_variable(sm: &mut SyncModel, address: Address) {
    sm.condition_variables.insert(address, ConditionVariable::new());
}

fn find_subset(a: &std::collections::BTreeSet<Tid>, b: &HashSet<Tid>) -> HashSet<Tid> {
    b.iter().filter(|tid| a.contains(tid)).copied().collect()
}

fn update_safety_net(sm: &mut SyncModel, event: Event, consumers: &HashSet<Tid>) {
    let thread = sm.threads.get_mut(&event.thread_id).unwrap();

    for &consumer in consumers {
        // Mirrors std::map::emplace: a consumer already present keeps its
        // first-recorded substitute event rather than being overwritten.
        if thread.safety_net.iter().any(|(tid, _)| *tid == consumer) {
            continue;
        }

        let silent = Event {
            thread_id: thread.id,
            kind: event.kind,
            distance: 0,
            object: event.object,
            object2: 0,
            target_thread: INVALID_THREAD_ID,
        };

        thread.safety_net.push((consumer, silent));
    }
}

/// Pre-scan a condition-variable event as it is ingested from the trace,
/// before the thread ever reaches it during simulation. Builds the
/// signaller/broadcaster/consumer sets and the producer's safety net ahead
/// of time.
pub fn update_condition_variable(sm: &mut SyncModel, event: Event) {
    if !sm.condition_variables.contains_key(&event.object) {
        warn!(target: "rhythm", "encountered a condition variable that was not initialized: {}", event.object);
        add_condition_variable(sm, event.object);
    }

    match event.kind {
        EventKind::CondWait => {
            sm.condition_variables
                .get_mut(&event.object)
                .unwrap()
                .consumers
                .insert(event.thread_id);
        }
        EventKind::CondSignal => {
            let cv = sm.condition_variables.get_mut(&event.object).unwrap();
            cv.signallers.insert(event.thread_id);
            cv.signal_count += 1;
            let consumers = cv.consumers.clone();

            update_safety_net(sm, event, &consumers);
        }
        EventKind::CondBroadcast => {
            let cv = sm.condition_variables.get_mut(&event.object).unwrap();
            cv.broadcasters.insert(event.thread_id);
            cv.broadcast_count += 1;
            let consumers = cv.consumers.clone();

            update_safety_net(sm, event, &consumers);
        }
        _ => panic!("update_condition_variable called with non-cv event kind"),
    }
}

/// Acquire `mutex` on behalf of a woken waiter, without surfacing the
/// transition: per the original source, waiters flushed this way remain
/// blocked on the mutex queue and are rescheduled later by ordinary lock
/// release, not by this call. Documented as a behavior to replicate, not a
/// bug to fix (see `spec.md` open questions).
fn acquire_silently(sm: &mut SyncModel, thread_id: Tid, mutex: Address) {
    acquire(sm, thread_id, mutex);
}

fn wake_via_acquire(sm: &mut SyncModel, thread_id: Tid, mutex: Address) -> Option<Tid> {
    let acquired = acquire(sm, thread_id, mutex);
    if acquired.to_sleep.contains(&thread_id) {
        None
    } else {
        Some(thread_id)
    }
}

pub fn condition_signal(sm: &mut SyncModel, address: Address) -> Transition {
    let mut t = Transition::default();

    if sm.condition_variables.get(&address).unwrap().consumers.is_empty() {
        return t;
    }

    {
        let cv = sm.condition_variables.get_mut(&address).unwrap();
        assert!(cv.signal_count >= 1, "signal_count underflow on {address}");
        cv.signal_count -= 1;
    }

    let waiter_and_mutex = {
        let cv = sm.condition_variables.get_mut(&address).unwrap();
        if cv.waiters.is_empty() {
            let consumer_count = cv.consumers.len() as u64;
            cv.production = (cv.production + 1).min(consumer_count);
            None
        } else {
            Some((cv.waiters.pop_front().unwrap(), cv.mutexes.pop_front().unwrap()))
        }
    };

    if let Some((waiting_thread, mutex)) = waiter_and_mutex {
        if let Some(woken) = wake_via_acquire(sm, waiting_thread, mutex) {
            t.to_wake.push(woken);
        }
    }

    let signal_count_exhausted = sm.condition_variables.get(&address).unwrap().signal_count == 0;
    if signal_count_exhausted {
        flush_remaining_waiters(sm, address);
    }

    t
}

pub fn condition_broadcast(sm: &mut SyncModel, thread_id: Tid, address: Address) -> Transition {
    let mut t = Transition::default();

    if sm.condition_variables.get(&address).unwrap().consumers.is_empty() {
        return t;
    }

    {
        let cv = sm.condition_variables.get_mut(&address).unwrap();
        assert!(cv.broadcast_count >= 1, "broadcast_count underflow on {address}");
        cv.broadcast_count -= 1;
        cv.last_broadcaster = thread_id;
    }

    let live_consumers = {
        let cv = sm.condition_variables.get(&address).unwrap();
        find_subset(&sm.live_threads, &cv.consumers)
    };

    let waiter_and_mutex = {
        let cv = sm.condition_variables.get_mut(&address).unwrap();
        assert!(
            live_consumers.len() >= cv.waiters.len(),
            "more waiters than live consumers on cv {address}"
        );
        let production_estimate = live_consumers.len() as u64 - cv.waiters.len() as u64;
        let consumer_count = cv.consumers.len() as u64;
        cv.production = (cv.production + production_estimate).min(consumer_count);

        if cv.waiters.is_empty() {
            None
        } else {
            Some((cv.waiters.pop_front().unwrap(), cv.mutexes.pop_front().unwrap()))
        }
    };

    if let Some((priority_thread, mutex)) = waiter_and_mutex {
        if let Some(woken) = wake_via_acquire(sm, priority_thread, mutex) {
            t.to_wake.push(woken);
        }

        flush_remaining_waiters(sm, address);
    }

    t
}

/// Drain any waiters left in the queue through a plain lock acquire; they
/// stay blocked on the mutex rather than the cv until ordinary lock release
/// reaches them.
fn flush_remaining_waiters(sm: &mut SyncModel, address: Address) {
    let remaining: Vec<(Tid, Address)> = {
        let cv = sm.condition_variables.get_mut(&address).unwrap();
        assert_eq!(cv.waiters.len(), cv.mutexes.len());
        let pairs = cv.waiters.iter().copied().zip(cv.mutexes.iter().copied()).collect();
        cv.waiters.clear();
        cv.mutexes.clear();
        pairs
    };

    for (waiter, mutex) in remaining {
        acquire_silently(sm, waiter, mutex);
    }
}

fn can_wait(sm: &SyncModel, cv: &ConditionVariable, thread_id: Tid) -> bool {
    let live_broadcasters = find_subset(&sm.live_threads, &cv.broadcasters);
    let live_signallers = find_subset(&sm.live_threads, &cv.signallers);

    if live_broadcasters.is_empty() && live_signallers.is_empty() {
        return false;
    }

    if live_broadcasters.len() == 1 && live_broadcasters.contains(&thread_id) {
        return false;
    }

    if live_signallers.len() == 1 && live_signallers.contains(&thread_id) {
        return false;
    }

    if cv.broadcast_count == 0 && cv.signal_count == 0 {
        return false;
    }

    true
}

pub fn condition_wait(sm: &mut SyncModel, thread_id: Tid, address: Address, mutex: Address) -> Transition {
    {
        let cv = sm.condition_variables.get_mut(&address).unwrap();
        if cv.production > 0 {
            cv.production -= 1;
            return Transition::default();
        }
    }

    let disallowed = {
        let cv = sm.condition_variables.get(&address).unwrap();
        !can_wait(sm, cv, thread_id)
    };
    if disallowed {
        return Transition::default();
    }

    {
        let cv = sm.condition_variables.get_mut(&address).unwrap();
        cv.waiters.push_back(thread_id);
        cv.mutexes.push_back(mutex);
    }

    let mut t = super::lock::release(sm, thread_id, mutex);
    t.to_sleep.push(thread_id);

    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::lock::add_lock;

    fn cv_event(thread_id: Tid, kind: EventKind, object: Address) -> Event {
        let mut event = Event::new(thread_id, kind, 0);
        event.object = object;
        event
    }

    fn setup(consumers: &[Tid], signallers: &[Tid]) -> SyncModel {
        let mut sm = SyncModel::new();
        for &tid in consumers.iter().chain(signallers.iter()) {
            if !sm.threads.contains_key(&tid) {
                sm.add_thread(tid);
            }
            sm.live_threads.insert(tid);
        }
        add_condition_variable(&mut sm, 0xC);
        add_lock(&mut sm, 0xM);

        // Mimic the trace pre-scan: consumers are known from their eventual
        // `CondWait` calls before the simulation ever reaches them.
        for &tid in consumers {
            update_condition_variable(&mut sm, cv_event(tid, EventKind::CondWait, 0xC));
        }

        sm
    }

    #[test]
    fn signal_before_wait_increments_production_and_wait_consumes_it() {
        let mut sm = setup(&[1], &[0]);
        update_condition_variable(&mut sm, cv_event(0, EventKind::CondSignal, 0xC));

        let t = condition_signal(&mut sm, 0xC);
        assert!(t.to_wake.is_empty());
        assert_eq!(sm.condition_variables[&0xC].production, 1);

        let t = condition_wait(&mut sm, 1, 0xC, 0xM);
        assert!(t.to_sleep.is_empty());
        assert_eq!(sm.condition_variables[&0xC].production, 0);
    }

    #[test]
    fn wait_blocks_when_no_production_but_live_producer_exists() {
        let mut sm = setup(&[1], &[0]);
        update_condition_variable(&mut sm, cv_event(0, EventKind::CondSignal, 0xC));
        acquire(&mut sm, 1, 0xM);

        let t = condition_wait(&mut sm, 1, 0xC, 0xM);
        assert_eq!(t.to_sleep, vec![1]);
    }

    #[test]
    fn wait_proceeds_without_blocking_when_no_live_producer_remains() {
        let mut sm = setup(&[1], &[0]);
        update_condition_variable(&mut sm, cv_event(0, EventKind::CondSignal, 0xC));
        // Consume the only signal, then the producer finishes.
        condition_signal(&mut sm, 0xC);
        condition_wait(&mut sm, 1, 0xC, 0xM);
        sm.live_threads.remove(&0);

        let t = condition_wait(&mut sm, 1, 0xC, 0xM);
        assert!(t.to_sleep.is_empty());
    }

    #[test]
    fn broadcast_wakes_all_consumers() {
        let mut sm = setup(&[1, 2], &[0]);
        update_condition_variable(&mut sm, cv_event(0, EventKind::CondBroadcast, 0xC));
        add_lock(&mut sm, 0xM2);
        acquire(&mut sm, 1, 0xM);
        acquire(&mut sm, 2, 0xM2);

        condition_wait(&mut sm, 1, 0xC, 0xM);
        condition_wait(&mut sm, 2, 0xC, 0xM2);

        let t = condition_broadcast(&mut sm, 0, 0xC);
        assert!(!t.to_wake.is_empty());
        assert!(sm.condition_variables[&0xC].waiters.is_empty());
        assert!(sm.condition_variables[&0xC].mutexes.is_empty());
    }
}
