//! Statistics (C7): per-thread time-by-status accrual and per-object wait
//! times, plus the two CSV reports written by the driver.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use crate::common::{Address, Event, EventKind, Tid};
use crate::error::Result;
use crate::sync::SyncModel;
use crate::system::ThreadStatus;

/// Time spent in each [`ThreadStatus`], in nanoseconds.
#[derive(Debug, Default)]
pub struct StatusTracker {
    pub times: HashMap<ThreadStatusKey, u64>,
}

/// `ThreadStatus` doesn't derive `Hash`/`Eq` (it's a plain enum used widely
/// by value); wrap it locally for use as a map key without growing its
/// public surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadStatusKey {
    Unknown,
    Runnable,
    Running,
    Blocked,
    Finished,
}

impl From<ThreadStatus> for ThreadStatusKey {
    fn from(s: ThreadStatus) -> Self {
        match s {
            ThreadStatus::Unknown => ThreadStatusKey::Unknown,
            ThreadStatus::Runnable => ThreadStatusKey::Runnable,
            ThreadStatus::Running => ThreadStatusKey::Running,
            ThreadStatus::Blocked => ThreadStatusKey::Blocked,
            ThreadStatus::Finished => ThreadStatusKey::Finished,
        }
    }
}

impl std::fmt::Display for ThreadStatusKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThreadStatusKey::Unknown => "unknown",
            ThreadStatusKey::Runnable => "runnable",
            ThreadStatusKey::Running => "running",
            ThreadStatusKey::Blocked => "blocked",
            ThreadStatusKey::Finished => "finished",
        };
        write!(f, "{s}")
    }
}

/// Time spent waiting on each specific synchronization object, keyed by
/// the object's address, plus the last event seen for this thread.
#[derive(Debug, Default)]
pub struct SyncTracker {
    pub last_event: Option<Event>,
    pub lock_wait_times: HashMap<Address, u64>,
    pub barrier_wait_times: HashMap<Address, u64>,
    pub condition_wait_times: HashMap<Address, u64>,
}

/// The full collection of performance metrics estimated by Rhythm.
#[derive(Debug, Default)]
pub struct Stats {
    pub total_time: u64,
    pub run_time: HashMap<Tid, u64>,
    pub status_time: HashMap<Tid, StatusTracker>,
    pub sync_time: HashMap<Tid, SyncTracker>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }
}

fn update_blocked_thread(tracker: &mut SyncTracker, elapsed: u64) {
    let Some(event) = tracker.last_event else {
        return;
    };

    match event.kind {
        EventKind::LockAcquire => {
            *tracker.lock_wait_times.entry(event.object).or_insert(0) += elapsed;
        }
        EventKind::BarrierWait => {
            *tracker.barrier_wait_times.entry(event.object).or_insert(0) += elapsed;
        }
        EventKind::CondWait => {
            *tracker.condition_wait_times.entry(event.object).or_insert(0) += elapsed;
        }
        _ => {}
    }
}

/// Update the performance metrics based on how much time has elapsed during
/// one controller step.
pub fn update(stats: &mut Stats, elapsed: u64, event: &Event, sm: &SyncModel) {
    for &tid in &sm.live_threads {
        let thread = sm.threads.get(&tid).expect("live thread missing from thread table");

        *stats.run_time.entry(tid).or_insert(0) += elapsed;

        let status_tracker = stats.status_time.entry(tid).or_default();
        *status_tracker.times.entry(thread.status.into()).or_insert(0) += elapsed;

        if thread.status == ThreadStatus::Blocked {
            let sync_tracker = stats.sync_time.entry(tid).or_default();
            update_blocked_thread(sync_tracker, elapsed);
        }
    }

    stats.sync_time.entry(event.thread_id).or_default().last_event = Some(*event);
}

fn write_time_stacks(stats: &Stats, path: &Path) -> Result<()> {
    let mut out = std::fs::File::create(path)?;
    writeln!(out, "TID,status,time")?;

    for (tid, tracker) in &stats.status_time {
        for (status, time) in &tracker.times {
            writeln!(out, "{tid},{status},{}", *time as f64 / 1e9)?;
        }
    }

    for (tid, time) in &stats.run_time {
        writeln!(out, "{tid},total,{}", *time as f64 / 1e9)?;
    }

    Ok(())
}

fn write_sync_stacks(stats: &Stats, path: &Path) -> Result<()> {
    let mut out = std::fs::File::create(path)?;
    writeln!(out, "TID,synchronization,address,time")?;

    for (tid, tracker) in &stats.sync_time {
        for (address, time) in &tracker.lock_wait_times {
            writeln!(out, "{tid},lock,{address},{}", *time as f64 / 1e9)?;
        }
        for (address, time) in &tracker.barrier_wait_times {
            writeln!(out, "{tid},barrier-wait,{address},{}", *time as f64 / 1e9)?;
        }
        for (address, time) in &tracker.condition_wait_times {
            writeln!(out, "{tid},condition-wait,{address},{}", *time as f64 / 1e9)?;
        }
    }

    Ok(())
}

/// Write the two CSV reports into `output_dir`.
pub fn print(stats: &Stats, output_dir: &Path) -> Result<()> {
    write_time_stacks(stats, &output_dir.join("rhythm-time-stacks.csv"))?;
    write_sync_stacks(stats, &output_dir.join("rhythm-sync-stacks.csv"))?;

    Ok(())
}
