//! Bidirectional, versioned, lossy transport between two nodes.

use crate::{packet::Kind, NodeId, Version};
use pilo_runtime::{Distribution, Time};
use std::collections::BTreeMap;

/// Maximum number of packets queued at one endpoint before new sends are dropped.
pub const QUEUE_CAPACITY: usize = 50;

/// Whether a link is carrying traffic.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    #[default]
    Down,
    Up,
}

/// Reason a packet was not accepted by a [Link].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dropped {
    /// The link was down when sending.
    Down,
    /// The packet was lost at random.
    Lost,
    /// The sender's queue was full.
    Backpressure,
    /// The sender is not attached to the link.
    NotEndpoint,
}

impl Dropped {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Down => "link down",
            Self::Lost => "random link failure",
            Self::Backpressure => "queue full",
            Self::NotEndpoint => "not an endpoint",
        }
    }
}

/// Per-endpoint transmit state.
#[derive(Clone, Copy, Debug, Default)]
struct Endpoint {
    /// Earliest time the next packet can finish transmitting.
    next: Time,
    /// Packets sent but not yet delivered.
    queued: usize,
}

/// Describes a connection between two nodes.
pub struct Link {
    name: String,
    endpoints: [NodeId; 2],
    state: State,
    version: Version,

    /// Bits per second.
    bandwidth: f64,
    latency: Box<dyn Distribution<Time>>,
    success: Box<dyn Distribution<bool>>,

    transmit: [Endpoint; 2],
    usage: BTreeMap<Kind, u64>,
}

impl Link {
    /// Create a new link (initially down) between `a` and `b`.
    pub fn new(
        name: String,
        a: NodeId,
        b: NodeId,
        bandwidth: f64,
        latency: Box<dyn Distribution<Time>>,
        success: Box<dyn Distribution<bool>>,
    ) -> Self {
        Self {
            name,
            endpoints: [a, b],
            state: State::Down,
            version: 0,
            bandwidth,
            latency,
            success,
            transmit: [Endpoint::default(); 2],
            usage: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoints(&self) -> (NodeId, NodeId) {
        (self.endpoints[0], self.endpoints[1])
    }

    /// Endpoint opposite `node`, if `node` is attached.
    pub fn peer(&self, node: NodeId) -> Option<NodeId> {
        self.side(node).map(|side| self.endpoints[1 - side])
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_up(&self) -> bool {
        self.state == State::Up
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Bits delivered over this link, by packet kind.
    pub fn usage(&self) -> &BTreeMap<Kind, u64> {
        &self.usage
    }

    /// Packets queued at `node`'s end of the link.
    pub fn queued(&self, node: NodeId) -> usize {
        self.side(node).map_or(0, |side| self.transmit[side].queued)
    }

    fn side(&self, node: NodeId) -> Option<usize> {
        self.endpoints.iter().position(|endpoint| *endpoint == node)
    }

    /// Accept a packet of `size` bits from `sender` at time `now`.
    ///
    /// Returns the delivery time and the receiving endpoint. A latency sample is only
    /// drawn when the sender's queue is empty (queued packets pipeline behind it).
    pub fn transmit(
        &mut self,
        now: Time,
        sender: NodeId,
        size: usize,
    ) -> Result<(Time, NodeId), Dropped> {
        let side = self.side(sender).ok_or(Dropped::NotEndpoint)?;
        if self.state == State::Down {
            return Err(Dropped::Down);
        }
        if !self.success.next() {
            return Err(Dropped::Lost);
        }
        let endpoint = &mut self.transmit[side];
        if endpoint.queued >= QUEUE_CAPACITY {
            return Err(Dropped::Backpressure);
        }

        let mut delay = size as f64 / self.bandwidth;
        if endpoint.queued == 0 {
            delay += self.latency.next();
        }
        let arrival = endpoint.next.max(now) + delay;
        endpoint.next = arrival;
        endpoint.queued += 1;
        Ok((arrival, self.endpoints[1 - side]))
    }

    /// Complete a transmission towards `receiver`.
    ///
    /// Returns `false` if the link went down while the packet was in flight (the packet
    /// is lost).
    pub fn deliver(&mut self, receiver: NodeId, kind: Kind, size: usize) -> bool {
        if let Some(side) = self.side(receiver) {
            let endpoint = &mut self.transmit[1 - side];
            endpoint.queued = endpoint.queued.saturating_sub(1);
        }
        if self.state == State::Down {
            return false;
        }
        *self.usage.entry(kind).or_default() += size as u64;
        true
    }

    /// Transition to `state`, bumping the version.
    ///
    /// Returns `false` (and leaves the version unchanged) if already in `state`.
    pub fn set(&mut self, state: State) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        self.version += 1;
        true
    }
}
