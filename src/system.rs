//! The kernel-thread model and the scheduler (C4): tracks running,
//! runnable, blocked, and finished threads, and assigns runnable threads to
//! idle cores.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::architecture::Architecture;
use crate::common::{Address, Cpi, Event, Freq, Tid, Transition};

/// The status of a kernel thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadStatus {
    /// Before a thread has been created by another thread.
    Unknown,
    /// Waiting to be assigned a core.
    Runnable,
    /// Currently assigned to a core.
    Running,
    /// Waiting on another thread to wake it up.
    Blocked,
    /// No more events remain.
    Finished,
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThreadStatus::Unknown => "unknown",
            ThreadStatus::Runnable => "runnable",
            ThreadStatus::Running => "running",
            ThreadStatus::Blocked => "blocked",
            ThreadStatus::Finished => "finished",
        };
        write!(f, "{s}")
    }
}

/// A model of a kernel-level thread: its status, the locks it holds, and the
/// safety net of substitute events used to escape approximation-induced
/// deadlock (see `crate::sync::break_deadlock`).
#[derive(Debug, Clone)]
pub struct KernelThread {
    pub id: Tid,
    pub status: ThreadStatus,
    pub locks_held: Vec<Address>,
    /// Per-peer-consumer substitute event, insertion ordered.
    pub safety_net: Vec<(Tid, Event)>,
}

impl KernelThread {
    pub fn new(id: Tid) -> Self {
        Self {
            id,
            status: ThreadStatus::Unknown,
            locks_held: Vec::new(),
            safety_net: Vec::new(),
        }
    }

    pub fn holds_lock(&self, address: Address) -> bool {
        self.locks_held.contains(&address)
    }
}

/// Scheduler state: the running/runnable/idle-core bookkeeping that maps
/// threads onto cores.
#[derive(Debug, Default)]
pub struct SchedulerState {
    pub running: HashSet<Tid>,
    pub runnable: VecDeque<Tid>,
    pub mapping: HashMap<Tid, usize>,
    pub idle_cores: VecDeque<usize>,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn core_for(&self, thread_id: Tid) -> usize {
        *self
            .mapping
            .get(&thread_id)
            .unwrap_or_else(|| panic!("no core mapping for running thread {thread_id}"))
    }
}

/// The core a thread is running on.
pub fn get_core<'a>(arch: &'a Architecture, sched: &SchedulerState, thread_id: Tid) -> &'a crate::architecture::Core {
    let core_index = sched.core_for(thread_id);
    &arch.cores[core_index]
}

/// The CPI rate a thread runs at, based on the core it is mapped to.
///
/// A missing CPI-rate entry for a thread on its assigned core type is a
/// programming error (the config omitted a thread the trace uses).
pub fn get_cpi(arch: &Architecture, sched: &SchedulerState, thread_id: Tid) -> Cpi {
    let core = get_core(arch, sched, thread_id);
    let core_type = arch.core_type(core);

    *core_type.cpi_rates.get(&thread_id).unwrap_or_else(|| {
        panic!("no CPI rate configured for thread {thread_id} on its assigned core type")
    })
}

/// The frequency of the core a thread is running on.
pub fn get_freq(arch: &Architecture, sched: &SchedulerState, thread_id: Tid) -> Freq {
    get_core(arch, sched, thread_id).frequency
}

fn use_next_core(sched: &mut SchedulerState, thread_id: Tid) {
    let core_id = sched
        .idle_cores
        .pop_front()
        .expect("dispatch loop invariant: runnable thread with no idle core");

    sched.mapping.insert(thread_id, core_id);
    sched.running.insert(thread_id);
}

fn free_core(sched: &mut SchedulerState, thread_id: Tid) {
    let core_id = sched
        .mapping
        .remove(&thread_id)
        .unwrap_or_else(|| panic!("thread {thread_id} has no core mapping to free"));

    sched.idle_cores.push_back(core_id);
}

fn wake_up(sched: &mut SchedulerState, thread: &mut KernelThread) {
    assert!(
        !sched.running.contains(&thread.id),
        "cannot wake a thread that is already running"
    );

    sched.runnable.push_back(thread.id);
    thread.status = ThreadStatus::Runnable;
}

fn sleep(sched: &mut SchedulerState, thread: &mut KernelThread) {
    sched.running.remove(&thread.id);
    thread.status = ThreadStatus::Blocked;
}

fn kill(sched: &mut SchedulerState, thread: &KernelThread) {
    assert_eq!(
        thread.status,
        ThreadStatus::Finished,
        "only finished threads may be killed"
    );

    sched.running.remove(&thread.id);
}

/// Apply a transition to the scheduler: wake, then sleep, then kill, then
/// dispatch runnable threads onto idle cores FIFO.
///
/// Wake-up is applied before sleep/kill so that a thread which both wakes
/// and is later put to sleep within the same transition (a rare but legal
/// condition-variable path) never briefly violates the running-set size
/// bound.
pub fn schedule(sched: &mut SchedulerState, threads: &mut BTreeMap<Tid, KernelThread>, transition: &Transition) {
    for &thread_id in &transition.to_wake {
        let thread = threads
            .get_mut(&thread_id)
            .unwrap_or_else(|| panic!("unknown thread {thread_id} in to_wake"));
        wake_up(sched, thread);
    }

    for &thread_id in &transition.to_sleep {
        let thread = threads
            .get_mut(&thread_id)
            .unwrap_or_else(|| panic!("unknown thread {thread_id} in to_sleep"));
        sleep(sched, thread);
        free_core(sched, thread_id);
    }

    for &thread_id in &transition.to_kill {
        let thread = threads
            .get(&thread_id)
            .unwrap_or_else(|| panic!("unknown thread {thread_id} in to_kill"));
        kill(sched, thread);
        free_core(sched, thread_id);
    }

    while !sched.idle_cores.is_empty() && !sched.runnable.is_empty() {
        let thread_id = sched.runnable.pop_front().unwrap();
        use_next_core(sched, thread_id);
        threads.get_mut(&thread_id).unwrap().status = ThreadStatus::Running;
    }
}
