//! The controller step loop (C6): select the critical-path thread, advance
//! every running thread by the same amount of simulated time, drive
//! synchronization, reschedule, and recover from approximation-induced
//! deadlock.

use tracing::{info, trace};

use crate::application::ApplicationModel;
use crate::architecture::Architecture;
use crate::common::{estimate_instructions, estimate_time, Tid};
use crate::error::{Result, RhythmError};
use crate::statistics::{self, Stats};
use crate::sync::{self, SyncModel};
use crate::system::{self, SchedulerState};

/// Pick the running thread whose next event is reached first in simulated
/// time. Ties are broken by the arbitrary iteration order of the running
/// set (a `BTreeSet`-like deterministic order here, since `running` is a
/// `HashSet<Tid>` — callers must not rely on tie-break order beyond
/// determinism within a single run).
fn select_next_thread(app: &ApplicationModel, arch: &Architecture, sched: &SchedulerState) -> (Tid, u64) {
    assert!(!sched.running.is_empty(), "step called with no running threads");

    let mut shortest_time = u64::MAX;
    let mut next_thread = *sched.running.iter().next().unwrap();

    // Iterate threads in numeric order so that ties resolve deterministically
    // across runs (HashSet iteration order is not stable between runs).
    let mut running: Vec<Tid> = sched.running.iter().copied().collect();
    running.sort_unstable();

    for thread_id in running {
        let thread = app.threads.get(&thread_id).expect("running thread missing from application model");
        let event = thread.peek();

        let cpi = system::get_cpi(arch, sched, thread_id);
        let freq = system::get_freq(arch, sched, thread_id);
        let time_till_event = estimate_time(event.distance, cpi, freq);

        if time_till_event < shortest_time {
            next_thread = thread_id;
            shortest_time = time_till_event;
        }
    }

    (next_thread, shortest_time)
}

/// Execute up to the next synchronization event on the critical path.
/// Returns the elapsed simulated time for this step.
pub fn step(
    app: &mut ApplicationModel,
    arch: &Architecture,
    sched: &mut SchedulerState,
    sm: &mut SyncModel,
    stats: &mut Stats,
) -> Result<u64> {
    let (current_thread, elapsed_time) = select_next_thread(app, arch, sched);

    let running: Vec<Tid> = sched.running.iter().copied().collect();
    for thread_id in running {
        if elapsed_time > 0 {
            let cpi = system::get_cpi(arch, sched, thread_id);
            let freq = system::get_freq(arch, sched, thread_id);
            let instructions = estimate_instructions(elapsed_time, cpi, freq);

            app.thread_mut(thread_id).execute(instructions);
        }
    }

    let current_event = app.thread_mut(current_thread).peek();
    statistics::update(stats, elapsed_time, &current_event, sm);

    trace!(
        target: "rhythm::trace",
        "{current_event} [{elapsed_time} ns] [{} ns]",
        stats.total_time
    );

    let transition = sync::synchronize(sm, current_event);
    system::schedule(sched, &mut sm.threads, &transition);

    if sched.running.is_empty() && !sm.live_threads.is_empty() {
        info!(target: "rhythm", "breaking deadlock");
        let recovery = sync::break_deadlock(sm, current_thread)
            .map_err(RhythmError::Deadlock)?;
        system::schedule(sched, &mut sm.threads, &recovery);
    }

    assert!(
        current_event.distance <= 1,
        "popped an event with unresolved distance {}",
        current_event.distance
    );
    app.thread_mut(current_thread).pop_current();

    Ok(elapsed_time)
}
