//! A deterministic scheduler that releases events in timestamp order.
//!
//! Events are kept in a min-heap keyed by `(time, sequence)`. The sequence number is assigned
//! at scheduling time, so events due at the same instant are released in FIFO order and every
//! run with the same inputs visits events in exactly the same order.
//!
//! # Coercion
//!
//! Scheduling an event before the current time (or at a non-comparable time, such as `NaN`)
//! does not fail: the event is coerced to run at the current time, a warning is logged, and the
//! `coerced` counter is incremented. Simulated time never moves backwards.
//!
//! # Example
//!
//! ```rust
//! use pilo_runtime::{Handler, Scheduler, Task, Time};
//!
//! struct Tick;
//!
//! impl Task for Tick {
//!     fn label(&self) -> &'static str {
//!         "tick"
//!     }
//! }
//!
//! struct Clock {
//!     ticks: Vec<Time>,
//! }
//!
//! impl Handler<Tick> for Clock {
//!     type Error = ();
//!
//!     fn handle(&mut self, scheduler: &mut Scheduler<Tick>, _: Tick) -> Result<(), ()> {
//!         self.ticks.push(scheduler.now());
//!         if self.ticks.len() < 3 {
//!             scheduler.schedule(1.0, Tick);
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let mut scheduler = Scheduler::default();
//! let mut clock = Clock { ticks: Vec::new() };
//! scheduler.schedule(1.0, Tick);
//! scheduler.run(&mut clock).unwrap();
//! assert_eq!(clock.ticks, vec![1.0, 2.0, 3.0]);
//! ```

use crate::{hex, Error, Handler, Task, Time};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use sha2::{Digest, Sha256};
use std::{cmp::Ordering, collections::BinaryHeap};
use tracing::{trace, warn};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct Work {
    label: String,
}

#[derive(Debug, Default)]
struct Metrics {
    tasks_scheduled: Family<Work, Counter>,
    tasks_processed: Family<Work, Counter>,
    tasks_pending: Gauge,
    coerced: Counter,
}

impl Metrics {
    fn register(&self, registry: &mut Registry) {
        registry.register(
            "tasks_scheduled",
            "Total number of tasks scheduled",
            self.tasks_scheduled.clone(),
        );
        registry.register(
            "tasks_processed",
            "Total number of tasks processed",
            self.tasks_processed.clone(),
        );
        registry.register(
            "tasks_pending",
            "Number of tasks waiting in the queue",
            self.tasks_pending.clone(),
        );
        registry.register(
            "coerced",
            "Number of tasks scheduled in the past and coerced to the current time",
            self.coerced.clone(),
        );
    }
}

/// Track the order of processed events for determinism auditing.
#[derive(Clone, Debug, Default)]
pub struct Auditor {
    hash: Vec<u8>,
}

impl Auditor {
    fn process_task(&mut self, time: Time, sequence: u64, label: &str) {
        let mut hasher = Sha256::new();
        hasher.update(&self.hash);
        hasher.update(b"process_task");
        hasher.update(time.to_bits().to_be_bytes());
        hasher.update(sequence.to_be_bytes());
        hasher.update(label.as_bytes());
        self.hash = hasher.finalize().to_vec();
    }

    /// Mix arbitrary bytes into the audit state.
    ///
    /// Handlers can use this to make the audit sensitive to outcomes (not just to the
    /// order in which events were released).
    pub fn record(&mut self, kind: &[u8], data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(&self.hash);
        hasher.update(kind);
        hasher.update(data);
        self.hash = hasher.finalize().to_vec();
    }

    /// Generate a representation of the current state of the run.
    ///
    /// Two runs with identical inputs produce identical states.
    pub fn state(&self) -> String {
        hex(&self.hash)
    }
}

/// Configuration for the [Scheduler].
#[derive(Clone, Debug)]
pub struct Config {
    /// Events scheduled after this time are never released.
    pub end: Time,
}

impl Default for Config {
    fn default() -> Self {
        Self { end: Time::INFINITY }
    }
}

/// A pending event.
struct Alarm<T> {
    time: Time,
    sequence: u64,
    task: T,
}

impl<T> PartialEq for Alarm<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Alarm<T> {}

impl<T> PartialOrd for Alarm<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Alarm<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse the ordering for min-heap
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Min-time priority queue of deferred events that owns simulated time.
pub struct Scheduler<T> {
    now: Time,
    end: Time,
    sequence: u64,
    queue: BinaryHeap<Alarm<T>>,

    metrics: Metrics,
    auditor: Auditor,
}

impl<T: Task> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new(Time::INFINITY)
    }
}

impl<T: Task> Scheduler<T> {
    fn new(end: Time) -> Self {
        Self {
            now: 0.0,
            end,
            sequence: 0,
            queue: BinaryHeap::new(),
            metrics: Metrics::default(),
            auditor: Auditor::default(),
        }
    }

    /// Initialize a new scheduler at time zero.
    pub fn init(cfg: Config) -> Result<Self, Error> {
        if cfg.end.is_nan() || cfg.end < 0.0 {
            return Err(Error::InvalidEnd(cfg.end));
        }
        Ok(Self::new(cfg.end))
    }

    /// Register the scheduler's metrics with the provided registry.
    pub fn register(&self, registry: &mut Registry) {
        self.metrics.register(registry);
    }

    /// Current simulated time.
    pub fn now(&self) -> Time {
        self.now
    }

    /// Time after which no event is released.
    pub fn end(&self) -> Time {
        self.end
    }

    /// Number of pending events (including those beyond the end time).
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if no events are pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Time of the earliest pending event, if any.
    pub fn peek(&self) -> Option<Time> {
        self.queue.peek().map(|alarm| alarm.time)
    }

    /// Access the run's [Auditor].
    pub fn auditor(&mut self) -> &mut Auditor {
        &mut self.auditor
    }

    /// Schedule `task` to run `delay` seconds after the current time.
    ///
    /// Returns the time at which the task will run.
    pub fn schedule(&mut self, delay: Time, task: T) -> Time {
        self.schedule_absolute(self.now + delay, task)
    }

    /// Schedule `task` to run at `time`.
    ///
    /// A `time` earlier than the current time is coerced to the current time. Returns the
    /// time at which the task will run.
    pub fn schedule_absolute(&mut self, time: Time, task: T) -> Time {
        let time = if time >= self.now {
            time
        } else {
            warn!(
                requested = time,
                now = self.now,
                label = task.label(),
                "coercing task to current time"
            );
            self.metrics.coerced.inc();
            self.now
        };
        let sequence = self.sequence;
        self.sequence += 1;
        self.metrics
            .tasks_scheduled
            .get_or_create(&Work {
                label: task.label().to_string(),
            })
            .inc();
        self.queue.push(Alarm {
            time,
            sequence,
            task,
        });
        self.metrics.tasks_pending.set(self.queue.len() as i64);
        time
    }

    /// Returns `true` if the earliest pending event falls within the end time.
    pub fn due(&self) -> bool {
        self.queue.peek().is_some_and(|alarm| alarm.time <= self.end)
    }

    /// Release the earliest due event to `handler`, advancing time to its timestamp.
    ///
    /// Returns whether another event is due afterwards. If no event is due when called,
    /// nothing is processed and `false` is returned.
    pub fn next<H: Handler<T>>(&mut self, handler: &mut H) -> Result<bool, H::Error> {
        if !self.due() {
            return Ok(false);
        }
        let Some(alarm) = self.queue.pop() else {
            return Ok(false);
        };
        self.metrics.tasks_pending.set(self.queue.len() as i64);
        self.now = alarm.time;

        // Record task for auditing
        let label = alarm.task.label();
        self.auditor.process_task(alarm.time, alarm.sequence, label);
        self.metrics
            .tasks_processed
            .get_or_create(&Work {
                label: label.to_string(),
            })
            .inc();
        trace!(now = self.now, sequence = alarm.sequence, label, "processing task");

        handler.handle(self, alarm.task)?;
        Ok(self.due())
    }

    /// Release events until none are due, returning the number processed.
    pub fn run<H: Handler<T>>(&mut self, handler: &mut H) -> Result<u64, H::Error> {
        let mut processed = 0;
        while self.due() {
            self.next(handler)?;
            processed += 1;
        }
        Ok(processed)
    }
}
