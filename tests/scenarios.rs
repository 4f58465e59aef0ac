//! End-to-end scenarios exercised directly against the engine's public
//! types, without going through trace-file ingestion.

use std::collections::HashMap;

use rhythm::application::ApplicationModel;
use rhythm::architecture::{Architecture, Core, CoreType};
use rhythm::common::{Event, EventKind};
use rhythm::controller;
use rhythm::statistics::Stats;
use rhythm::sync::{self, SyncModel};
use rhythm::system::{SchedulerState, ThreadStatus};

fn homogeneous_arch(num_cores: usize, cpi: f64, freq: u64, tids: &[i64]) -> Architecture {
    let mut cpi_rates = HashMap::new();
    for &tid in tids {
        cpi_rates.insert(tid, cpi);
    }

    Architecture {
        core_types: vec![CoreType {
            cpi_rates,
            frequencies: vec![freq],
        }],
        cores: (0..num_cores).map(|_| Core { type_index: 0, frequency: freq }).collect(),
    }
}

fn heterogeneous_arch() -> Architecture {
    let mut fast_cpi = HashMap::new();
    fast_cpi.insert(0i64, 1.0);
    let mut slow_cpi = HashMap::new();
    slow_cpi.insert(1i64, 2.0);

    Architecture {
        core_types: vec![
            CoreType { cpi_rates: fast_cpi, frequencies: vec![1_000_000_000] },
            CoreType { cpi_rates: slow_cpi, frequencies: vec![500_000_000] },
        ],
        cores: vec![
            Core { type_index: 0, frequency: 1_000_000_000 },
            Core { type_index: 1, frequency: 500_000_000 },
        ],
    }
}

fn event(tid: i64, kind: EventKind, distance: u64, object: u64) -> Event {
    let mut e = Event::new(tid, kind, distance);
    e.object = object;
    e
}

/// Bring each of `running` up as already running, one per core, in order.
fn bootstrap_running(sm: &mut SyncModel, sched: &mut SchedulerState, num_cores: usize, running: &[i64]) {
    sched.idle_cores.extend(0..num_cores);
    for &tid in running {
        sm.add_thread(tid);
        sm.threads.get_mut(&tid).unwrap().status = ThreadStatus::Running;
        sm.live_threads.insert(tid);
        let core = sched.idle_cores.pop_front().unwrap();
        sched.mapping.insert(tid, core);
        sched.running.insert(tid);
    }
}

fn run_to_completion(
    app: &mut ApplicationModel,
    arch: &Architecture,
    sched: &mut SchedulerState,
    sm: &mut SyncModel,
    stats: &mut Stats,
) -> u64 {
    let mut total = 0u64;
    while !sm.live_threads.is_empty() {
        total += controller::step(app, arch, sched, sm, stats).unwrap();
    }
    total
}

/// Scenario 1: two threads contend for a single lock.
#[test]
fn two_threads_single_lock() {
    let arch = homogeneous_arch(2, 1.0, 1_000_000_000, &[0, 1]);

    let mut sm = SyncModel::new();
    let mut sched = SchedulerState::new();
    bootstrap_running(&mut sm, &mut sched, 2, &[0, 1]);
    sync::lock::add_lock(&mut sm, 0xA);

    let mut app = ApplicationModel::new();
    // T0 acquires A almost immediately and holds it for 2000ns of work.
    app.thread_mut(0).add_event(event(0, EventKind::LockAcquire, 0, 0xA));
    app.thread_mut(0).add_event(event(0, EventKind::LockRelease, 2000, 0xA));
    app.thread_mut(0).add_event(Event::new(0, EventKind::ThreadFinish, 0));

    // T1 reaches its own acquire attempt at t=500, finds A held, and blocks
    // until T0 releases at t=2000; it then does 500ns more work before
    // releasing and finishing.
    app.thread_mut(1).add_event(event(1, EventKind::LockAcquire, 500, 0xA));
    app.thread_mut(1).add_event(event(1, EventKind::LockRelease, 500, 0xA));
    app.thread_mut(1).add_event(Event::new(1, EventKind::ThreadFinish, 0));

    let mut stats = Stats::new();
    let total = run_to_completion(&mut app, &arch, &mut sched, &mut sm, &mut stats);

    assert_eq!(total, 2500);
    assert_eq!(stats.sync_time[&1].lock_wait_times[&0xA], 1500);
}

/// Scenario 2: three threads meet at a barrier after equal work.
#[test]
fn barrier_of_three() {
    let arch = homogeneous_arch(3, 1.0, 1_000_000_000, &[0, 1, 2]);

    let mut sm = SyncModel::new();
    let mut sched = SchedulerState::new();
    bootstrap_running(&mut sm, &mut sched, 3, &[0, 1, 2]);
    sync::barrier::add_barrier(&mut sm, 0xB, 3);

    let mut app = ApplicationModel::new();
    for tid in 0..3i64 {
        app.thread_mut(tid).add_event(event(tid, EventKind::BarrierWait, 1000, 0xB));
        app.thread_mut(tid).add_event(Event::new(tid, EventKind::ThreadFinish, 0));
    }

    let mut stats = Stats::new();
    let total = run_to_completion(&mut app, &arch, &mut sched, &mut sm, &mut stats);

    assert_eq!(total, 1000);
    assert!(sm.barriers[&0xB].waiters.is_empty());
    for tid in 0..3i64 {
        let wait = stats
            .sync_time
            .get(&tid)
            .and_then(|t| t.barrier_wait_times.get(&0xB))
            .copied()
            .unwrap_or(0);
        assert_eq!(wait, 0);
    }
}

/// Scenario 3: a producer signals before the consumer's wait is reached, so
/// the consumer never blocks.
#[test]
fn producer_consumer_via_condition_variable() {
    let arch = homogeneous_arch(2, 1.0, 1_000_000_000, &[0, 1]);

    let mut sm = SyncModel::new();
    let mut sched = SchedulerState::new();
    bootstrap_running(&mut sm, &mut sched, 2, &[0, 1]);
    sync::condvar::add_condition_variable(&mut sm, 0xC);
    sync::lock::add_lock(&mut sm, 0xM);
    sync::lock::acquire(&mut sm, 1, 0xM);

    // Pre-scan: thread 1 is a known consumer, thread 0 a known signaller.
    sync::condvar::update_condition_variable(&mut sm, event(1, EventKind::CondWait, 0, 0xC));
    sync::condvar::update_condition_variable(&mut sm, event(0, EventKind::CondSignal, 0, 0xC));

    let mut app = ApplicationModel::new();
    app.thread_mut(0).add_event(event(0, EventKind::CondSignal, 500, 0xC));
    app.thread_mut(0).add_event(Event::new(0, EventKind::ThreadFinish, 0));

    app.thread_mut(1).add_event({
        let mut e = event(1, EventKind::CondWait, 200, 0xC);
        e.object2 = 0xM;
        e
    });
    app.thread_mut(1).add_event(event(1, EventKind::LockRelease, 0, 0xM));
    app.thread_mut(1).add_event(Event::new(1, EventKind::ThreadFinish, 0));

    let mut stats = Stats::new();
    let total = run_to_completion(&mut app, &arch, &mut sched, &mut sm, &mut stats);

    // T1 reaches its wait at 200ns and blocks until T0 signals at 500ns.
    assert_eq!(total, 500);
}

/// Scenario 4: a join blocks the caller until the target thread finishes,
/// then wakes it.
#[test]
fn join_blocks_until_target_finishes() {
    let arch = homogeneous_arch(2, 1.0, 1_000_000_000, &[0, 1]);

    let mut sm = SyncModel::new();
    let mut sched = SchedulerState::new();
    bootstrap_running(&mut sm, &mut sched, 2, &[0, 1]);

    let mut app = ApplicationModel::new();
    let mut join_event = Event::new(0, EventKind::ThreadJoin, 1000);
    join_event.target_thread = 1;
    app.thread_mut(0).add_event(join_event);
    app.thread_mut(0).add_event(Event::new(0, EventKind::ThreadFinish, 0));

    app.thread_mut(1).add_event(Event::new(1, EventKind::ThreadFinish, 1500));

    let mut stats = Stats::new();
    let total = run_to_completion(&mut app, &arch, &mut sched, &mut sm, &mut stats);

    assert_eq!(total, 1500);
    assert!(sm.finished_threads.contains(&0));
    assert!(sm.finished_threads.contains(&1));
}

/// Scenario 5: an approximation-induced false deadlock is avoided because
/// `can_wait` lets the second wait proceed without blocking, so
/// `break_deadlock` is never needed.
#[test]
fn second_wait_proceeds_without_live_producer() {
    let mut sm = SyncModel::new();
    sm.add_thread(0);
    sm.add_thread(1);
    sm.live_threads.insert(0);
    sm.live_threads.insert(1);

    sync::condvar::add_condition_variable(&mut sm, 0xC);
    sync::lock::add_lock(&mut sm, 0xM);
    sync::lock::acquire(&mut sm, 1, 0xM);

    sync::condvar::update_condition_variable(&mut sm, event(1, EventKind::CondWait, 0, 0xC));
    sync::condvar::update_condition_variable(&mut sm, event(0, EventKind::CondSignal, 0, 0xC));

    sync::condvar::condition_signal(&mut sm, 0xC);
    assert_eq!(sm.condition_variables[&0xC].production, 1);

    // First wait consumes the lone production unit.
    let t1 = sync::condvar::condition_wait(&mut sm, 1, 0xC, 0xM);
    assert!(t1.to_sleep.is_empty());
    assert_eq!(sm.condition_variables[&0xC].production, 0);
    assert_eq!(sm.locks[&0xM].held_by, 1);

    sm.live_threads.remove(&0);

    // Second wait: no production left, and no live producer besides the
    // (now finished) signaller, so it proceeds rather than blocking.
    let t2 = sync::condvar::condition_wait(&mut sm, 1, 0xC, 0xM);
    assert!(t2.to_sleep.is_empty());
}

/// Scenario 6: a heterogeneous two-core system runs the fast thread quickly
/// and the slow thread proportionally slower.
#[test]
fn heterogeneous_cores_scale_by_cpi_and_frequency() {
    let arch = heterogeneous_arch();

    let mut sm = SyncModel::new();
    let mut sched = SchedulerState::new();
    bootstrap_running(&mut sm, &mut sched, 2, &[0, 1]);

    let mut app = ApplicationModel::new();
    app.thread_mut(0).add_event(Event::new(0, EventKind::ThreadFinish, 1000));
    app.thread_mut(1).add_event(Event::new(1, EventKind::ThreadFinish, 1000));

    let mut stats = Stats::new();
    let total = run_to_completion(&mut app, &arch, &mut sched, &mut sm, &mut stats);

    assert_eq!(total, 4000);
    assert_eq!(stats.run_time[&0], 1000);
    assert_eq!(stats.run_time[&1], 4000);
}
