//! Rhythm: a discrete-event simulator that estimates the wall-clock
//! execution time of a multithreaded program on a heterogeneous multicore,
//! by replaying a captured pthread synchronization trace rather than
//! re-executing application code.

pub mod application;
pub mod architecture;
pub mod common;
pub mod controller;
pub mod driver;
pub mod error;
pub mod statistics;
pub mod sync;
pub mod system;
pub mod trace;

pub use error::{Result, RhythmError};
