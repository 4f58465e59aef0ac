//! The application model (C2): a per-thread ordered queue of pending
//! synchronization events.

use std::collections::{BTreeMap, VecDeque};

use crate::common::{Event, Icount, Tid};

/// A thread modeled as a sequence of events separated by dynamic instruction
/// counts.
#[derive(Debug)]
pub struct ApplicationThread {
    pub id: Tid,
    events: VecDeque<Event>,
}

impl ApplicationThread {
    pub fn new(id: Tid) -> Self {
        Self {
            id,
            events: VecDeque::new(),
        }
    }

    /// Append a synchronization event to this thread's queue.
    pub fn add_event(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// The next event to be reached by this thread.
    ///
    /// Panics if the queue is empty, mirroring the original's precondition
    /// that this is only called on live threads with pending work.
    pub fn peek(&self) -> Event {
        *self
            .events
            .front()
            .expect("peek called on a thread with no pending events")
    }

    /// Drop the front event. Only valid once its distance has been driven to
    /// (approximately) zero by the controller.
    pub fn pop_current(&mut self) {
        self.events
            .pop_front()
            .expect("pop_current called on a thread with no pending events");
    }

    /// Progress this thread by executing `instructions`, consuming distance
    /// from the front event. Clamps to zero rather than going negative,
    /// since instruction estimation from elapsed time can overshoot slightly
    /// due to floating-point rounding (see [`crate::common::estimate_instructions`]).
    pub fn execute(&mut self, instructions: Icount) {
        let front = self
            .events
            .front_mut()
            .expect("execute called on a thread with no pending events");

        if front.distance >= instructions {
            front.distance -= instructions;
        } else {
            front.distance = 0;
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

impl std::fmt::Display for ApplicationThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[thread] ID: {}, Events: {}", self.id, self.events.len())
    }
}

/// The full application: every thread's event queue, keyed by thread ID.
#[derive(Debug, Default)]
pub struct ApplicationModel {
    pub threads: BTreeMap<Tid, ApplicationThread>,
}

impl ApplicationModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_mut(&mut self, id: Tid) -> &mut ApplicationThread {
        self.threads.entry(id).or_insert_with(|| ApplicationThread::new(id))
    }
}

impl std::fmt::Display for ApplicationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[application] Threads: {}", self.threads.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::EventKind;

    #[test]
    fn execute_clamps_to_zero_on_overshoot() {
        let mut thread = ApplicationThread::new(0);
        thread.add_event(Event::new(0, EventKind::LockAcquire, 10));

        thread.execute(15);

        assert_eq!(thread.peek().distance, 0);
    }

    #[test]
    fn execute_subtracts_when_sufficient_distance_remains() {
        let mut thread = ApplicationThread::new(0);
        thread.add_event(Event::new(0, EventKind::LockAcquire, 100));

        thread.execute(40);

        assert_eq!(thread.peek().distance, 60);
    }

    #[test]
    fn pop_current_drops_the_front_event() {
        let mut thread = ApplicationThread::new(0);
        thread.add_event(Event::new(0, EventKind::ThreadStart, 0));
        thread.add_event(Event::new(0, EventKind::ThreadFinish, 0));

        thread.pop_current();

        assert_eq!(thread.peek().kind, EventKind::ThreadFinish);
    }
}
