//! Synchronization model (C5): locks, barriers, condition variables, join
//! dependencies, and the `synchronize`/`break_deadlock` dispatcher that
//! turns an event into a scheduler transition.

pub mod barrier;
pub mod condvar;
pub mod lock;
pub mod model;

pub use model::{break_deadlock, synchronize, SyncModel};
