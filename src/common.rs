//! Shared primitive types used across the simulation engine.

/// A thread identifier. `-1` denotes absence of a thread.
pub type Tid = i64;

/// The thread ID to use for the initial master thread.
pub const DEFAULT_MASTER_THREAD_ID: Tid = 0;

/// An invalid/absent thread ID sentinel.
pub const INVALID_THREAD_ID: Tid = -1;

/// The address of a synchronization object (lock, barrier, condition variable).
pub type Address = u64;

/// A dynamic instruction count.
pub type Icount = u64;

/// Cycles-per-instruction, a fractional rate.
pub type Cpi = f64;

/// A frequency in Hertz.
pub type Freq = u64;

/// The kind of synchronization event a trace row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BarrierWait,
    CondBroadcast,
    CondSignal,
    CondWait,
    LockAcquire,
    LockRelease,
    ThreadCreate,
    ThreadFinish,
    ThreadJoin,
    ThreadStart,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::BarrierWait => "barrier_wait",
            EventKind::CondBroadcast => "broadcast",
            EventKind::CondSignal => "signal",
            EventKind::CondWait => "condition_wait",
            EventKind::LockAcquire => "acquire",
            EventKind::LockRelease => "release",
            EventKind::ThreadCreate => "create",
            EventKind::ThreadFinish => "finish",
            EventKind::ThreadJoin => "join",
            EventKind::ThreadStart => "start",
        };
        write!(f, "{s}")
    }
}

/// A single recorded synchronization event.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub thread_id: Tid,
    pub kind: EventKind,
    pub distance: Icount,
    pub object: Address,
    pub object2: Address,
    pub target_thread: Tid,
}

impl Event {
    pub fn new(thread_id: Tid, kind: EventKind, distance: Icount) -> Self {
        Self {
            thread_id,
            kind,
            distance,
            object: 0,
            object2: 0,
            target_thread: INVALID_THREAD_ID,
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[event] [TID: {}] [{}]", self.thread_id, self.kind)?;
        match self.kind {
            EventKind::LockAcquire
            | EventKind::LockRelease
            | EventKind::BarrierWait
            | EventKind::CondSignal
            | EventKind::CondBroadcast => write!(f, " [{}]", self.object),
            EventKind::CondWait => write!(f, " [{}, {}]", self.object, self.object2),
            EventKind::ThreadCreate | EventKind::ThreadJoin => write!(f, " [{}]", self.target_thread),
            _ => Ok(()),
        }
    }
}

/// Threads that must transition state as a result of a synchronization event.
#[derive(Debug, Clone, Default)]
pub struct Transition {
    pub to_sleep: Vec<Tid>,
    pub to_wake: Vec<Tid>,
    pub to_kill: Vec<Tid>,
}

/// Convert a dynamic instruction count into elapsed time, rounded up to the
/// nearest nanosecond so that any non-zero instruction count makes forward
/// progress.
pub fn estimate_time(instructions: Icount, cpi: Cpi, frequency: Freq) -> u64 {
    let cycles = instructions as f64 * cpi;
    let period = 1.0 / frequency as f64;
    (1e9 * cycles * period).ceil() as u64
}

/// Convert an elapsed time back into an instruction count, truncated.
///
/// Floating-point rounding can make this estimate slightly larger than the
/// remaining distance of the event it is applied to; callers must clamp
/// (see [`crate::application::ApplicationThread::execute`]) rather than
/// treating the result as exact.
pub fn estimate_instructions(time_ns: u64, cpi: Cpi, frequency: Freq) -> Icount {
    let cycles = time_ns as f64 * frequency as f64 * 1e-9;
    (cycles / cpi) as Icount
}
