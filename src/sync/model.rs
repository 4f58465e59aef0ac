//! The synchronization model (C5) and its single dispatcher, `synchronize`.
//!
//! This is the heart of the engine: it holds per-object state for locks,
//! barriers, and condition variables, plus join dependencies, and turns one
//! [`Event`] into a [`Transition`] the scheduler applies.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::warn;

use crate::common::{Address, Event, EventKind, Tid, Transition};
use crate::system::{KernelThread, ThreadStatus};

use super::barrier::Barrier;
use super::condvar::ConditionVariable;
use super::lock::{self, Lock};

/// A synchronization model of the thread library: every registered
/// synchronization object plus the liveness bookkeeping needed to drive
/// `synchronize`.
#[derive(Debug, Default)]
pub struct SyncModel {
    pub threads: BTreeMap<Tid, KernelThread>,
    pub live_threads: BTreeSet<Tid>,
    pub finished_threads: BTreeSet<Tid>,
    pub blocked_threads: BTreeSet<Tid>,

    pub barriers: HashMap<Address, Barrier>,
    pub condition_variables: HashMap<Address, ConditionVariable>,
    pub locks: HashMap<Address, Lock>,

    /// target thread -> waiter thread
    pub join_queue: HashMap<Tid, Tid>,
}

impl SyncModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_thread(&mut self, thread_id: Tid) {
        assert!(
            !self.threads.contains_key(&thread_id),
            "thread {thread_id} registered twice"
        );
        self.threads.insert(thread_id, KernelThread::new(thread_id));
    }
}

impl std::fmt::Display for SyncModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[synchronization model] Threads: {}, Barriers: {}, Condition Variables: {}, Locks: {}",
            self.threads.len(),
            self.barriers.len(),
            self.condition_variables.len(),
            self.locks.len()
        )
    }
}

fn create(sm: &mut SyncModel, target_thread: Tid) -> Transition {
    sm.threads.get_mut(&target_thread).unwrap().status = ThreadStatus::Runnable;

    Transition {
        to_wake: vec![target_thread],
        ..Default::default()
    }
}

fn start(sm: &mut SyncModel, thread_id: Tid) -> Transition {
    sm.live_threads.insert(thread_id);
    Transition::default()
}

fn join(sm: &mut SyncModel, current_thread: Tid, target_thread: Tid) -> Transition {
    let mut t = Transition::default();

    if !sm.finished_threads.contains(&target_thread) {
        t.to_sleep.push(current_thread);
        sm.join_queue.insert(target_thread, current_thread);
    }

    t
}

fn finish(sm: &mut SyncModel, thread_id: Tid) -> Transition {
    assert!(
        !sm.finished_threads.contains(&thread_id),
        "thread {thread_id} finished twice"
    );

    let mut t = Transition::default();

    if let Some(waiter) = sm.join_queue.remove(&thread_id) {
        t.to_wake.push(waiter);
    }

    let held_locks = sm.threads.get(&thread_id).unwrap().locks_held.clone();
    for address in held_locks {
        warn!(
            target: "rhythm",
            "thread {thread_id} finished while holding a lock ({address})"
        );
        lock::release(sm, thread_id, address);
    }

    sm.finished_threads.insert(thread_id);
    sm.threads.get_mut(&thread_id).unwrap().status = ThreadStatus::Finished;
    sm.live_threads.remove(&thread_id);

    t.to_kill.push(thread_id);

    t
}

/// Update internal state in response to `event`, maintaining the
/// invariants of synchronization to ensure liveness and atomicity.
///
/// Returns the set of threads to be scheduled/slept.
pub fn synchronize(sm: &mut SyncModel, event: Event) -> Transition {
    let t = match event.kind {
        EventKind::ThreadCreate => create(sm, event.target_thread),
        EventKind::ThreadStart => start(sm, event.thread_id),
        EventKind::ThreadJoin => join(sm, event.thread_id, event.target_thread),
        EventKind::ThreadFinish => finish(sm, event.thread_id),
        EventKind::LockAcquire => lock::acquire(sm, event.thread_id, event.object),
        EventKind::LockRelease => lock::release(sm, event.thread_id, event.object),
        EventKind::BarrierWait => super::barrier::barrier_wait(sm, event.thread_id, event.object),
        EventKind::CondBroadcast => super::condvar::condition_broadcast(sm, event.thread_id, event.object),
        EventKind::CondSignal => super::condvar::condition_signal(sm, event.object),
        EventKind::CondWait => super::condvar::condition_wait(sm, event.thread_id, event.object, event.object2),
    };

    for &thread in &t.to_sleep {
        sm.blocked_threads.insert(thread);
    }
    for &thread in t.to_wake.iter().chain(t.to_kill.iter()) {
        sm.blocked_threads.remove(&thread);
    }

    t
}

/// Escape an approximation-induced deadlock: replay the first
/// (insertion-ordered) safety-net entry of `thread_id` whose target
/// consumer is still live.
///
/// Returns a fatal-deadlock error string if no viable entry exists; the
/// caller turns this into [`crate::error::RhythmError::Deadlock`].
pub fn break_deadlock(sm: &mut SyncModel, thread_id: Tid) -> Result<Transition, String> {
    let safety_net = sm.threads.get(&thread_id).unwrap().safety_net.clone();

    if safety_net.is_empty() {
        return Err(format!(
            "all threads are blocked and thread {thread_id} has no safety net"
        ));
    }

    let replay = safety_net
        .into_iter()
        .find(|(consumer, _)| sm.live_threads.contains(consumer));

    match replay {
        Some((_, event)) => Ok(synchronize(sm, event)),
        None => Err(format!(
            "all threads are blocked and thread {thread_id} has no live safety-net option"
        )),
    }
}
