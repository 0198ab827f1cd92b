//! Endpoints of the network and the context they act through.

use crate::{
    controller::Controller,
    link::Link,
    metrics::Metrics,
    network::Event,
    packet::{Kind, Packet, Payload},
    switch::Switch,
    LinkId, NodeId, Version,
};
use pilo_runtime::{Scheduler, Time};
use std::{collections::BTreeMap, rc::Rc};
use tracing::{debug, trace};

/// Behavior of a node.
pub enum Role {
    Host(Host),
    Switch(Switch),
    Controller(Box<Controller>),
}

/// A named endpoint with a table of attached links.
pub struct Node {
    pub(crate) name: String,
    /// Attached links, keyed by link name.
    pub(crate) ports: BTreeMap<String, LinkId>,
    pub(crate) role: Role,
}

impl Node {
    pub fn new(name: String, role: Role) -> Self {
        Self {
            name,
            ports: BTreeMap::new(),
            role,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ports(&self) -> &BTreeMap<String, LinkId> {
        &self.ports
    }

    pub fn role(&self) -> &Role {
        &self.role
    }
}

/// Source and sink of data traffic.
#[derive(Debug, Default)]
pub struct Host {
    sent: u64,
    received: u64,
}

impl Host {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data packets originated by this host.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Data packets addressed to this host that arrived.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Send a data packet to `destination` over the first link that is up.
    pub fn send(&mut self, ctx: &mut Context<'_>, destination: &str) -> bool {
        let Some(link) = ctx.first_up() else {
            debug!(host = ctx.name(), reason = "no link up", "dropping message");
            ctx.metrics().dropped_packet(Kind::Data, "no link up");
            return false;
        };
        let packet = ctx.packet(destination, Payload::Data);
        self.sent += 1;
        ctx.send(&link, &packet)
    }

    pub fn receive(&mut self, name: &str, packet: &Packet) {
        if packet.kind() == Kind::Data && packet.destination == name {
            self.received += 1;
            trace!(host = name, source = %packet.source, id = packet.id, "received data");
        }
    }
}

/// Everything a node may touch while handling an event.
///
/// Nodes never mutate each other: they only send packets, which arrive later as
/// scheduled deliveries.
pub struct Context<'a> {
    node: NodeId,
    name: &'a str,
    ports: &'a BTreeMap<String, LinkId>,
    links: &'a mut [Link],
    scheduler: &'a mut Scheduler<Event>,
    packets: &'a mut u64,
    metrics: &'a Metrics,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        node: NodeId,
        name: &'a str,
        ports: &'a BTreeMap<String, LinkId>,
        links: &'a mut [Link],
        scheduler: &'a mut Scheduler<Event>,
        packets: &'a mut u64,
        metrics: &'a Metrics,
    ) -> Self {
        Self {
            node,
            name,
            ports,
            links,
            scheduler,
            packets,
            metrics,
        }
    }

    /// Index of the acting node.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Name of the acting node.
    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn now(&self) -> Time {
        self.scheduler.now()
    }

    pub fn metrics(&self) -> &'a Metrics {
        self.metrics
    }

    /// Create a packet from the acting node with a fresh id.
    pub fn packet(&mut self, destination: &str, payload: Payload) -> Rc<Packet> {
        *self.packets += 1;
        Rc::new(Packet::new(*self.packets, self.name, destination, payload))
    }

    /// Schedule `event` to fire `delay` seconds from now.
    pub fn schedule(&mut self, delay: Time, event: Event) {
        self.scheduler.schedule(delay, event);
    }

    /// Current version of an attached link.
    pub fn link_version(&self, link: &str) -> Option<Version> {
        let id = *self.ports.get(link)?;
        self.links.get(id).map(Link::version)
    }

    /// Name of the first attached link that is up.
    pub fn first_up(&self) -> Option<String> {
        self.ports
            .iter()
            .find(|&(_, &id)| self.links.get(id).is_some_and(Link::is_up))
            .map(|(name, _)| name.clone())
    }

    /// Send `packet` over an attached link, returning whether the link accepted it.
    pub fn send(&mut self, link: &str, packet: &Rc<Packet>) -> bool {
        let kind = packet.kind();
        let Some(id) = self
            .ports
            .get(link)
            .copied()
            .filter(|&id| id < self.links.len())
        else {
            debug!(node = self.name, link, reason = "no link", "dropping message");
            self.metrics.dropped_packet(kind, "no link");
            return false;
        };
        let now = self.scheduler.now();
        match self.links[id].transmit(now, self.node, packet.size) {
            Ok((arrival, to)) => {
                self.metrics.sent_packet(kind);
                self.scheduler.schedule_absolute(
                    arrival,
                    Event::Deliver {
                        link: id,
                        to,
                        packet: packet.clone(),
                    },
                );
                true
            }
            Err(reason) => {
                debug!(
                    node = self.name,
                    link,
                    id = packet.id,
                    %kind,
                    reason = reason.as_str(),
                    "dropping message"
                );
                self.metrics.dropped_packet(kind, reason.as_str());
                false
            }
        }
    }

    /// Send `packet` over every attached link except `except`.
    ///
    /// Returns the number of links that accepted it.
    pub fn flood(&mut self, packet: &Rc<Packet>, except: Option<&str>) -> usize {
        let ports = self.ports;
        let mut accepted = 0;
        for link in ports.keys() {
            if Some(link.as_str()) == except {
                continue;
            }
            if self.send(link, packet) {
                accepted += 1;
            }
        }
        accepted
    }
}
