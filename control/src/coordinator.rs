//! Global sequencing of controller input.
//!
//! In coordinated mode, packets delivered to any registered controller are intercepted. The
//! first copy of each new packet (by id, per destination) is released to every registered
//! controller after a synchronization delay of two controller-to-controller round trips,
//! never earlier than the previous release. Later copies are discarded.

use crate::NodeId;
use pilo_runtime::Time;
use std::collections::BTreeMap;
use tracing::trace;

#[derive(Clone, Debug, Default)]
pub struct Coordinator {
    controllers: Vec<NodeId>,
    /// Highest packet id admitted, by destination.
    last_seen: BTreeMap<String, u64>,
    /// Time of the latest scheduled release.
    last: Time,
    /// Round-trip time between the most distant controllers.
    rtt: Time,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, controller: NodeId) {
        if !self.controllers.contains(&controller) {
            self.controllers.push(controller);
        }
    }

    pub fn is_registered(&self, controller: NodeId) -> bool {
        self.controllers.contains(&controller)
    }

    /// Registered controllers, in registration order.
    pub fn controllers(&self) -> &[NodeId] {
        &self.controllers
    }

    pub fn rtt(&self) -> Time {
        self.rtt
    }

    pub fn set_rtt(&mut self, rtt: Time) {
        self.rtt = rtt;
    }

    /// Decide when a packet (`id` addressed to `destination`) arriving at `now` is released.
    ///
    /// Returns `None` if a packet at least as new was already admitted for `destination`.
    pub fn admit(&mut self, now: Time, destination: &str, id: u64) -> Option<Time> {
        let seen = self.last_seen.entry(destination.to_string()).or_insert(0);
        if *seen >= id {
            return None;
        }
        *seen = id;
        let release = now.max(self.last) + 2.0 * self.rtt;
        self.last = release;
        trace!(id, destination, now, release, "sequenced packet");
        Some(release)
    }
}
