//! Top-level orchestration (C8): load the architecture and traces, bootstrap
//! the master thread, run the controller loop to completion, and write the
//! statistics reports.

use std::path::Path;

use tracing::info;

use crate::architecture::{self, Architecture};
use crate::application::ApplicationModel;
use crate::common::DEFAULT_MASTER_THREAD_ID;
use crate::controller;
use crate::error::{Result, RhythmError};
use crate::statistics::Stats;
use crate::sync::SyncModel;
use crate::system::{SchedulerState, ThreadStatus};
use crate::trace;

/// Bootstrap the master thread as already running on the first core, and
/// discard the synthetic `ThreadStart` event the trace carries for it: the
/// master thread is live and running from the first instant of the
/// simulation, not started by another thread's `pthread_create`.
fn bootstrap_master_thread(app: &mut ApplicationModel, arch: &Architecture, sched: &mut SchedulerState, sm: &mut SyncModel) {
    sched.idle_cores.extend(0..arch.cores.len());

    sm.threads.get_mut(&DEFAULT_MASTER_THREAD_ID).unwrap().status = ThreadStatus::Running;
    sm.live_threads.insert(DEFAULT_MASTER_THREAD_ID);

    sched.running.insert(DEFAULT_MASTER_THREAD_ID);
    sched.mapping.insert(DEFAULT_MASTER_THREAD_ID, 0);
    sched.idle_cores.pop_front();

    if app.thread_mut(DEFAULT_MASTER_THREAD_ID).event_count() > 0 {
        app.thread_mut(DEFAULT_MASTER_THREAD_ID).pop_current();
    }
}

/// Estimate the wall-clock execution time of the traced program on the
/// configured architecture, writing CSV reports into `output_dir`.
///
/// Returns the total simulated time, in nanoseconds.
pub fn estimate(config_path: &Path, trace_manifest_path: &Path, output_dir: &Path) -> Result<u64> {
    let arch = architecture::parse_config_file(config_path)?;
    if arch.cores.is_empty() {
        return Err(RhythmError::Configuration("architecture has no cores".into()));
    }

    let mut sm = SyncModel::new();
    let mut app = trace::parse_traces(trace_manifest_path, &mut sm)?;

    let mut sched = SchedulerState::new();
    bootstrap_master_thread(&mut app, &arch, &mut sched, &mut sm);

    let mut stats = Stats::new();

    info!(target: "rhythm", "simulation starting: {} threads, {} cores", sm.threads.len(), arch.cores.len());

    while !sm.live_threads.is_empty() {
        let elapsed = controller::step(&mut app, &arch, &mut sched, &mut sm, &mut stats)?;
        stats.total_time += elapsed;
    }

    info!(target: "rhythm", "simulation complete: {} ns estimated", stats.total_time);

    std::fs::create_dir_all(output_dir)?;
    crate::statistics::print(&stats, output_dir)?;

    Ok(stats.total_time)
}
