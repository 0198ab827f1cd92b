//! Execute time-ordered simulation events with a deterministic scheduler.
//!
//! This crate provides the kernel of a discrete-event simulation: a [Scheduler] that owns
//! simulated time and releases events in non-decreasing timestamp order, and a family of
//! pull-based random variate sources ([distribution]) used to sample latencies, drops, and
//! failure times.
//!
//! # Terminology
//!
//! An event is any value implementing [Task]. The scheduler never inspects events beyond
//! their label: when an event comes due it is handed to a [Handler], which may schedule
//! further events. "Suspension" is modeled by scheduling a continuation at a later time and
//! returning.
//!
//! # Determinism
//!
//! Events scheduled for the same instant are released in the order they were scheduled (a
//! monotonic sequence number breaks ties). Given the same seed for every [distribution], a
//! run is fully reproducible, which can be verified by comparing [Auditor::state].

pub mod deterministic;
pub mod distribution;

pub use deterministic::{Auditor, Config, Scheduler};
pub use distribution::{Distribution, Spec};

use thiserror::Error;

/// Simulated time, in seconds.
pub type Time = f64;

/// Errors that can occur when configuring the runtime.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid distribution: {0}")]
    InvalidDistribution(String),
    #[error("invalid probability (must be in [0, 1]): {0}")]
    InvalidProbability(f64),
    #[error("invalid range: [{0}, {1}]")]
    InvalidRange(usize, usize),
    #[error("invalid end time: {0}")]
    InvalidEnd(Time),
}

/// Converts bytes to a hexadecimal string.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// A deferred, time-stamped action placed on the [Scheduler].
pub trait Task {
    /// Short, static description of the event (used for metrics and auditing).
    fn label(&self) -> &'static str;
}

/// Consumer of events released by a [Scheduler].
pub trait Handler<T: Task> {
    /// Error returned when an event cannot be processed.
    type Error;

    /// Process a due event.
    ///
    /// `scheduler.now()` is the event's timestamp. The handler may schedule new events
    /// (at or after `now`) before returning.
    fn handle(&mut self, scheduler: &mut Scheduler<T>, event: T) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[]), "");
        assert_eq!(hex(&[0x01]), "01");
        assert_eq!(hex(&[0x01, 0x02, 0xab]), "0102ab");
    }
}
