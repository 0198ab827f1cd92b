//! The simulated world: an arena of nodes and links driven by a [Scheduler].
//!
//! [Network] owns every node and link (addressed by [NodeId] and [LinkId]) and implements
//! [Handler] for [Event], so a run is simply `scheduler.run(&mut network)`. Nodes never touch
//! each other directly: everything they do is a packet handed to a link, which comes back as
//! a scheduled [Event::Deliver].

use crate::{
    controller::{self, Controller, Strategy},
    coordinator::Coordinator,
    graph::{diameter, Graph, Undirected},
    link::{Link, State},
    metrics::Metrics,
    node::{Context, Host, Node, Role},
    packet::{FlowTable, Kind, Packet, Signature, WILDCARD},
    switch::Switch,
    Error, LinkId, NodeId,
};
use pilo_runtime::{distribution::success, Handler, Scheduler, Spec, Task, Time};
use prometheus_client::registry::Registry;
use rand::{rngs::StdRng, SeedableRng};
use std::{
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};
use tracing::{debug, info, trace};

/// Configuration for a [Network].
#[derive(Clone, Debug)]
pub struct Config {
    /// Bandwidth of every link (in bits per second).
    pub bandwidth: f64,

    /// Per-hop latency (parameters in milliseconds).
    pub latency: Spec,

    /// Probability that a link accepts a packet.
    pub link_success: f64,

    /// Probability that a controller accepts a delivered packet.
    pub controller_success: f64,

    /// Behavior shared by every controller.
    pub controller: controller::Config,

    /// Whether controllers receive through a global [Coordinator].
    pub coordinated: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bandwidth: 1e10,
            latency: Spec::Constant { mean: 1.0 },
            link_success: 1.0,
            controller_success: 1.0,
            controller: controller::Config::default(),
            coordinated: false,
        }
    }
}

/// Kind of node to add to a [Network].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    Host,
    Switch,
    Controller,
}

/// A scheduled occurrence in a [Network].
#[derive(Clone, Debug)]
pub enum Event {
    /// A packet reaches the end of `link` at node `to`.
    Deliver {
        link: LinkId,
        to: NodeId,
        packet: Rc<Packet>,
    },
    /// A controller polls switches.
    Refresh(NodeId),
    /// A controller starts a gossip round.
    Gossip(NodeId),
    /// A controller asks switches to check their tables.
    Audit(NodeId),
    /// The coordinator releases a packet to every registered controller.
    Coordinate { packet: Rc<Packet> },
    /// A coordinated controller processes a released packet.
    Release {
        controller: NodeId,
        packet: Rc<Packet>,
    },
    LinkUp(LinkId),
    LinkDown(LinkId),
    /// A host sends a data packet.
    Inject {
        source: NodeId,
        destination: String,
    },
    /// Record a [Sample].
    Measure { utilization: bool },
}

impl Task for Event {
    fn label(&self) -> &'static str {
        match self {
            Self::Deliver { .. } => "deliver",
            Self::Refresh(_) => "refresh",
            Self::Gossip(_) => "gossip",
            Self::Audit(_) => "audit",
            Self::Coordinate { .. } => "coordinate",
            Self::Release { .. } => "release",
            Self::LinkUp(_) => "link_up",
            Self::LinkDown(_) => "link_down",
            Self::Inject { .. } => "inject",
            Self::Measure { .. } => "measure",
        }
    }
}

/// Measurement taken during a run.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub time: Time,
    /// Fraction of host pairs whose traffic reaches its destination.
    pub converged: f64,
    /// Largest number of rules forwarding out of any single link (if requested).
    pub max_load: Option<u64>,
}

pub struct Network {
    cfg: Config,
    rng: StdRng,

    nodes: Vec<Node>,
    links: Vec<Link>,
    node_ids: BTreeMap<String, NodeId>,
    link_ids: BTreeMap<String, LinkId>,

    /// Last packet id assigned.
    packets: u64,
    coordinator: Option<Coordinator>,
    samples: Vec<Sample>,
    metrics: Metrics,
}

/// Split `nodes` into the role of `node` and a [Context] for it to act through.
fn enter<'a>(
    nodes: &'a mut [Node],
    links: &'a mut [Link],
    scheduler: &'a mut Scheduler<Event>,
    packets: &'a mut u64,
    metrics: &'a Metrics,
    node: NodeId,
) -> Result<(&'a mut Role, Context<'a>), Error> {
    let Node { name, ports, role } = nodes.get_mut(node).ok_or(Error::InvalidNode(node))?;
    let ctx = Context::new(node, name, ports, links, scheduler, packets, metrics);
    Ok((role, ctx))
}

impl Network {
    /// Create an empty network whose randomness derives from `seed`.
    pub fn new(cfg: Config, seed: u64) -> Result<Self, Error> {
        if !cfg.bandwidth.is_finite() || cfg.bandwidth <= 0.0 {
            return Err(Error::InvalidBandwidth(cfg.bandwidth));
        }
        let timers = [cfg.controller.refresh, cfg.controller.gossip];
        for interval in timers.into_iter().chain(cfg.controller.audit) {
            if !interval.is_finite() || interval <= 0.0 {
                return Err(Error::InvalidInterval(interval));
            }
        }
        if let Strategy::LoadAware { limit: 0 } = cfg.controller.strategy {
            return Err(Error::InvalidLimit(0));
        }
        for probability in [cfg.link_success, cfg.controller_success] {
            if !(0.0..=1.0).contains(&probability) {
                return Err(pilo_runtime::Error::InvalidProbability(probability).into());
            }
        }
        Ok(Self {
            cfg,
            rng: StdRng::seed_from_u64(seed),
            nodes: Vec::new(),
            links: Vec::new(),
            node_ids: BTreeMap::new(),
            link_ids: BTreeMap::new(),
            packets: 0,
            coordinator: None,
            samples: Vec::new(),
            metrics: Metrics::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Source of randomness for anything that should be reproducible from the seed.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Register the network's metrics with the provided registry.
    pub fn register(&self, registry: &mut Registry) {
        self.metrics.register(registry);
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Add a node named `name`.
    ///
    /// Names must be non-empty, must not contain `-` (the link name separator), and must not
    /// be the broadcast address.
    pub fn add_node(&mut self, name: &str, class: Class) -> Result<NodeId, Error> {
        if name.is_empty() || name.contains('-') || name == WILDCARD {
            return Err(Error::InvalidName(name.to_string()));
        }
        if self.node_ids.contains_key(name) {
            return Err(Error::DuplicateNode(name.to_string()));
        }
        let role = match class {
            Class::Host => Role::Host(Host::new()),
            Class::Switch => Role::Switch(Switch::new()),
            Class::Controller => {
                let success = success(self.cfg.controller_success, &mut self.rng)?;
                Role::Controller(Box::new(Controller::new(
                    name,
                    self.cfg.controller.clone(),
                    success,
                )))
            }
        };
        let id = self.nodes.len();
        self.nodes.push(Node::new(name.to_string(), role));
        self.node_ids.insert(name.to_string(), id);
        Ok(id)
    }

    /// Add a link (initially down) named `a-b`.
    pub fn add_link(&mut self, a: &str, b: &str) -> Result<LinkId, Error> {
        if a == b {
            return Err(Error::LinkingSelf(a.to_string()));
        }
        let first = self.node_id(a)?;
        let second = self.node_id(b)?;
        let name = format!("{a}-{b}");
        if self.link_ids.contains_key(&name) || self.link_ids.contains_key(&format!("{b}-{a}")) {
            return Err(Error::DuplicateLink(name));
        }

        let latency = self.cfg.latency.build(&mut self.rng)?;
        let success = success(self.cfg.link_success, &mut self.rng)?;
        let id = self.links.len();
        self.links.push(Link::new(
            name.clone(),
            first,
            second,
            self.cfg.bandwidth,
            latency,
            success,
        ));
        self.link_ids.insert(name.clone(), id);
        for node in [first, second] {
            let node = &mut self.nodes[node];
            node.ports.insert(name.clone(), id);
            if let Role::Switch(switch) = &mut node.role {
                switch.add_port(&name);
            }
        }
        Ok(id)
    }

    /// Tell every controller about every node and, if coordinated, set up the coordinator.
    ///
    /// Call once the topology is complete.
    pub fn wire(&mut self) -> Result<(), Error> {
        let mut controllers = BTreeSet::new();
        let mut switches = BTreeSet::new();
        let mut hosts = BTreeSet::new();
        for node in &self.nodes {
            let name = node.name.clone();
            match node.role {
                Role::Host(_) => hosts.insert(name),
                Role::Switch(_) => switches.insert(name),
                Role::Controller(_) => controllers.insert(name),
            };
        }
        for node in &mut self.nodes {
            if let Role::Controller(controller) = &mut node.role {
                controller.add_controllers(controllers.iter().map(String::as_str));
                controller.add_switches(switches.iter().map(String::as_str));
                controller.add_hosts(hosts.iter().map(String::as_str));
            }
        }
        info!(
            controllers = controllers.len(),
            switches = switches.len(),
            hosts = hosts.len(),
            links = self.links.len(),
            "wired network"
        );

        if !self.cfg.coordinated {
            return Ok(());
        }

        // Synchronization delay is set by the most distant pair of controllers
        let mut physical = Undirected::new();
        for id in 0..self.nodes.len() {
            physical.add_vertex(id);
        }
        for link in &self.links {
            let (a, b) = link.endpoints();
            Graph::add_edge(&mut physical, a, b);
        }
        let members: Vec<NodeId> = self.controller_ids();
        let hops = diameter(&physical.distances(), &members);
        let mut coordinator = Coordinator::new();
        for &controller in &members {
            coordinator.register(controller);
        }
        coordinator.set_rtt(hops as f64 * 2.0 * self.cfg.latency.mean());
        info!(hops, rtt = coordinator.rtt(), "coordinating controllers");
        self.coordinator = Some(coordinator);
        Ok(())
    }

    /// Arm every controller's periodic timers.
    pub fn start(&self, scheduler: &mut Scheduler<Event>) {
        for controller in self.controller_ids() {
            scheduler.schedule(self.cfg.controller.refresh, Event::Refresh(controller));
            scheduler.schedule(self.cfg.controller.gossip, Event::Gossip(controller));
            if let Some(audit) = self.cfg.controller.audit {
                scheduler.schedule(audit, Event::Audit(controller));
            }
        }
    }

    fn controller_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| matches!(node.role, Role::Controller(_)))
            .map(|(id, _)| id)
            .collect()
    }

    fn node_id(&self, name: &str) -> Result<NodeId, Error> {
        self.node_ids
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownNode(name.to_string()))
    }

    pub fn link_id(&self, name: &str) -> Result<LinkId, Error> {
        self.link_ids
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownLink(name.to_string()))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn link(&self, name: &str) -> Option<&Link> {
        self.link_ids.get(name).map(|&id| &self.links[id])
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.node_ids.get(name).map(|&id| &self.nodes[id])
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        match self.node(name)?.role() {
            Role::Host(host) => Some(host),
            _ => None,
        }
    }

    pub fn switch(&self, name: &str) -> Option<&Switch> {
        match self.node(name)?.role() {
            Role::Switch(switch) => Some(switch),
            _ => None,
        }
    }

    pub fn controller(&self, name: &str) -> Option<&Controller> {
        match self.node(name)?.role() {
            Role::Controller(controller) => Some(controller.as_ref()),
            _ => None,
        }
    }

    pub fn coordinator(&self) -> Option<&Coordinator> {
        self.coordinator.as_ref()
    }

    /// Links joining two switches.
    pub fn switch_links(&self) -> Vec<LinkId> {
        self.links
            .iter()
            .enumerate()
            .filter(|(_, link)| {
                let (a, b) = link.endpoints();
                [a, b]
                    .iter()
                    .all(|&node| matches!(self.nodes[node].role, Role::Switch(_)))
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Bring every link up without telling anyone (switches record the new state).
    pub fn set_all_links_up_silent(&mut self) {
        for id in 0..self.links.len() {
            // Ids below the link count always name a link
            let _ = self.set_link_silent(id, State::Up);
        }
    }

    /// Set link `id` to `state` without telling anyone.
    ///
    /// The version still advances and attached switches record the new state, but no
    /// announcement is flooded. Returns `false` if the link was already in `state`.
    pub fn set_link_silent(&mut self, id: LinkId, state: State) -> Result<bool, Error> {
        let link = self.links.get_mut(id).ok_or(Error::InvalidLink(id))?;
        if !link.set(state) {
            return Ok(false);
        }
        let (a, b) = link.endpoints();
        for node in [a, b] {
            if let Some(Role::Switch(switch)) = self.nodes.get_mut(node).map(|node| &mut node.role)
            {
                switch.silent(link.name(), state);
            }
        }
        Ok(true)
    }

    /// Set link `id` to `state`, letting attached switches announce the change.
    ///
    /// Returns `false` if the link was already in `state`.
    pub fn set_link(
        &mut self,
        scheduler: &mut Scheduler<Event>,
        id: LinkId,
        state: State,
    ) -> Result<bool, Error> {
        let link = self.links.get_mut(id).ok_or(Error::InvalidLink(id))?;
        if !link.set(state) {
            return Ok(false);
        }
        let name = link.name().to_string();
        let (a, b) = link.endpoints();
        info!(
            now = scheduler.now(),
            link = %name,
            ?state,
            version = link.version(),
            "link changed"
        );
        self.metrics.link_transitions.inc();
        for node in [a, b] {
            let (role, mut ctx) = enter(
                &mut self.nodes,
                &mut self.links,
                scheduler,
                &mut self.packets,
                &self.metrics,
                node,
            )?;
            if let Role::Switch(switch) = role {
                switch.notify(&mut ctx, &name, state);
            }
        }
        Ok(true)
    }

    /// Schedule link `name` to change to `state` at `time`.
    pub fn schedule_link(
        &self,
        scheduler: &mut Scheduler<Event>,
        time: Time,
        name: &str,
        state: State,
    ) -> Result<Time, Error> {
        let id = self.link_id(name)?;
        let event = match state {
            State::Up => Event::LinkUp(id),
            State::Down => Event::LinkDown(id),
        };
        Ok(scheduler.schedule_absolute(time, event))
    }

    /// Schedule host `source` to send a data packet to `destination` at `time`.
    pub fn inject(
        &self,
        scheduler: &mut Scheduler<Event>,
        time: Time,
        source: &str,
        destination: &str,
    ) -> Result<Time, Error> {
        let source = self.node_id(source)?;
        self.node_id(destination)?;
        Ok(scheduler.schedule_absolute(
            time,
            Event::Inject {
                source,
                destination: destination.to_string(),
            },
        ))
    }

    /// Have every controller learn every link that is up and program switches directly.
    ///
    /// Used after a silent bring-up to start a run from a converged state.
    pub fn install_all_routes(&mut self) -> Result<(), Error> {
        let up: Vec<(String, u64)> = self
            .links
            .iter()
            .filter(|link| link.is_up())
            .map(|link| (link.name().to_string(), link.version()))
            .collect();
        let mut patches = Vec::new();
        for node in &mut self.nodes {
            let Role::Controller(controller) = &mut node.role else {
                continue;
            };
            for (link, version) in &up {
                controller.add_link(link, *version)?;
            }
            patches.push(controller.compute_paths()?);
        }
        for patch in patches {
            for (switch, table) in &patch.add {
                self.install(switch, table, &BTreeSet::new())?;
            }
            for (switch, remove) in &patch.remove {
                self.install(switch, &FlowTable::new(), remove)?;
            }
        }
        Ok(())
    }

    fn install(
        &mut self,
        switch: &str,
        table: &FlowTable,
        remove: &BTreeSet<Signature>,
    ) -> Result<(), Error> {
        let id = self.node_id(switch)?;
        match &mut self.nodes[id].role {
            Role::Switch(target) => {
                target.install(table, remove);
                Ok(())
            }
            _ => Err(Error::MissingVertex(switch.to_string())),
        }
    }

    /// Fraction of ordered host pairs whose data would reach its destination, following
    /// installed rules over links that are up. With fewer than two hosts this is `1.0`.
    pub fn check_routes(&self) -> f64 {
        let hosts: Vec<NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| matches!(node.role, Role::Host(_)))
            .map(|(id, _)| id)
            .collect();
        let mut pairs = 0usize;
        let mut reached = 0usize;
        for &source in &hosts {
            for &destination in &hosts {
                if source == destination {
                    continue;
                }
                pairs += 1;
                if self.reaches(source, destination) {
                    reached += 1;
                }
            }
        }
        if pairs == 0 {
            return 1.0;
        }
        reached as f64 / pairs as f64
    }

    /// Walk the forwarding tables from `source` towards `destination`.
    fn reaches(&self, source: NodeId, destination: NodeId) -> bool {
        let (Some(from), Some(to)) = (self.nodes.get(source), self.nodes.get(destination)) else {
            return false;
        };
        let signature = Signature::data(from.name(), to.name());
        let Some(mut link) = from
            .ports()
            .values()
            .copied()
            .find(|&id| self.links.get(id).is_some_and(Link::is_up))
        else {
            return false;
        };
        let mut at = source;
        for _ in 0..=self.nodes.len() {
            let Some(next) = self.links.get(link).and_then(|link| link.peer(at)) else {
                return false;
            };
            if next == destination {
                return true;
            }
            let Some(node) = self.nodes.get(next) else {
                return false;
            };
            let Role::Switch(switch) = node.role() else {
                return false;
            };
            let Some(out) = switch.table().get(&signature) else {
                return false;
            };
            let Some(&id) = node.ports().get(out) else {
                return false;
            };
            if !self.links.get(id).is_some_and(Link::is_up) {
                return false;
            }
            at = next;
            link = id;
        }
        false
    }

    /// Largest number of rules forwarding out of any link of any switch.
    pub fn max_link_usage(&self) -> u64 {
        self.nodes
            .iter()
            .filter_map(|node| match node.role() {
                Role::Switch(switch) => Some(switch.max_usage()),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Bits delivered over each link, by packet kind.
    pub fn bandwidth_used(&self) -> impl Iterator<Item = (&str, &BTreeMap<Kind, u64>)> {
        self.links.iter().map(|link| (link.name(), link.usage()))
    }

    /// Measurements recorded by [Event::Measure].
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of packets created so far.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    fn deliver(
        &mut self,
        scheduler: &mut Scheduler<Event>,
        link: LinkId,
        to: NodeId,
        packet: Rc<Packet>,
    ) -> Result<(), Error> {
        let kind = packet.kind();
        let channel = self.links.get_mut(link).ok_or(Error::InvalidLink(link))?;
        if !channel.deliver(to, kind, packet.size) {
            debug!(
                link = channel.name(),
                id = packet.id,
                %kind,
                reason = "link down in flight",
                "dropping message"
            );
            self.metrics.dropped_packet(kind, "link down in flight");
            return Ok(());
        }
        let arrival = channel.name().to_string();
        self.metrics.delivered_packet(kind, packet.size);

        // Coordinated controllers only see what the coordinator releases
        if let Some(coordinator) = self.coordinator.as_mut() {
            if coordinator.is_registered(to) {
                if let Some(release) =
                    coordinator.admit(scheduler.now(), &packet.destination, packet.id)
                {
                    self.metrics.coordinated.inc();
                    scheduler.schedule_absolute(release, Event::Coordinate { packet });
                }
                return Ok(());
            }
        }

        let (role, mut ctx) = enter(
            &mut self.nodes,
            &mut self.links,
            scheduler,
            &mut self.packets,
            &self.metrics,
            to,
        )?;
        match role {
            Role::Host(host) => host.receive(ctx.name(), &packet),
            Role::Switch(switch) => switch.receive(&mut ctx, &packet, &arrival),
            Role::Controller(controller) => controller.receive(&mut ctx, &packet)?,
        }
        Ok(())
    }

    /// Run `f` on controller `node`.
    fn with_controller(
        &mut self,
        scheduler: &mut Scheduler<Event>,
        node: NodeId,
        f: impl FnOnce(&mut Controller, &mut Context<'_>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let (role, mut ctx) = enter(
            &mut self.nodes,
            &mut self.links,
            scheduler,
            &mut self.packets,
            &self.metrics,
            node,
        )?;
        match role {
            Role::Controller(controller) => f(controller.as_mut(), &mut ctx),
            _ => Err(Error::NotController(ctx.name().to_string())),
        }
    }

    /// Record a [Sample], returning the fraction of host pairs that converged.
    fn measure(&mut self, now: Time, utilization: bool) -> f64 {
        let sample = Sample {
            time: now,
            converged: self.check_routes(),
            max_load: utilization.then(|| self.max_link_usage()),
        };
        info!(
            now,
            converged = sample.converged,
            max_load = ?sample.max_load,
            "measured"
        );
        let converged = sample.converged;
        self.samples.push(sample);
        converged
    }
}

impl Handler<Event> for Network {
    type Error = Error;

    fn handle(&mut self, scheduler: &mut Scheduler<Event>, event: Event) -> Result<(), Error> {
        match event {
            Event::Deliver { link, to, packet } => self.deliver(scheduler, link, to, packet),
            Event::Refresh(node) => self.with_controller(scheduler, node, |controller, ctx| {
                controller.refresh(ctx);
                Ok(())
            }),
            Event::Gossip(node) => self.with_controller(scheduler, node, |controller, ctx| {
                controller.gossip(ctx);
                Ok(())
            }),
            Event::Audit(node) => self.with_controller(scheduler, node, |controller, ctx| {
                controller.audit(ctx);
                Ok(())
            }),
            Event::Coordinate { packet } => {
                let controllers = self
                    .coordinator
                    .as_ref()
                    .map(|coordinator| coordinator.controllers().to_vec())
                    .unwrap_or_default();
                trace!(id = packet.id, controllers = controllers.len(), "releasing packet");
                for controller in controllers {
                    scheduler.schedule(
                        0.0,
                        Event::Release {
                            controller,
                            packet: packet.clone(),
                        },
                    );
                }
                Ok(())
            }
            Event::Release { controller, packet } => {
                self.with_controller(scheduler, controller, |controller, ctx| {
                    controller.receive(ctx, &packet)
                })
            }
            Event::LinkUp(link) => self.set_link(scheduler, link, State::Up).map(|_| ()),
            Event::LinkDown(link) => self.set_link(scheduler, link, State::Down).map(|_| ()),
            Event::Inject {
                source,
                destination,
            } => {
                let (role, mut ctx) = enter(
                    &mut self.nodes,
                    &mut self.links,
                    scheduler,
                    &mut self.packets,
                    &self.metrics,
                    source,
                )?;
                match role {
                    Role::Host(host) => {
                        host.send(&mut ctx, &destination);
                        Ok(())
                    }
                    _ => Err(Error::NotHost(ctx.name().to_string())),
                }
            }
            Event::Measure { utilization } => {
                let converged = self.measure(scheduler.now(), utilization);
                scheduler
                    .auditor()
                    .record(b"measure", &converged.to_bits().to_be_bytes());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::routing::table_hash;
    use pilo_macros::test_traced;
    use pilo_runtime::Config as SConfig;
    use test_case::test_case;

    /// h1 - s1 - s2 - h2 with controller c1 on s1.
    fn pair() -> Network {
        let mut network = Network::new(Config::default(), 7).unwrap();
        for (name, class) in [
            ("h1", Class::Host),
            ("h2", Class::Host),
            ("s1", Class::Switch),
            ("s2", Class::Switch),
            ("c1", Class::Controller),
        ] {
            network.add_node(name, class).unwrap();
        }
        for (a, b) in [("h1", "s1"), ("s1", "s2"), ("s2", "h2"), ("c1", "s1")] {
            network.add_link(a, b).unwrap();
        }
        network.wire().unwrap();
        network
    }

    #[test_case(""; "empty")]
    #[test_case("a-b"; "separator")]
    #[test_case("ALL"; "wildcard")]
    fn test_invalid_names(name: &str) {
        let mut network = Network::new(Config::default(), 0).unwrap();
        assert!(matches!(
            network.add_node(name, Class::Host),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn test_invalid_topology() {
        let mut network = pair();
        assert!(matches!(
            network.add_node("h1", Class::Host),
            Err(Error::DuplicateNode(_))
        ));
        assert!(matches!(
            network.add_link("s1", "s1"),
            Err(Error::LinkingSelf(_))
        ));
        assert!(matches!(
            network.add_link("s2", "s1"),
            Err(Error::DuplicateLink(_))
        ));
        assert!(matches!(
            network.add_link("s1", "s9"),
            Err(Error::UnknownNode(_))
        ));
    }

    #[test]
    fn test_invalid_config() {
        let cfg = Config {
            bandwidth: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            Network::new(cfg, 0),
            Err(Error::InvalidBandwidth(_))
        ));
        let mut cfg = Config::default();
        cfg.controller.strategy = Strategy::LoadAware { limit: 0 };
        assert!(matches!(Network::new(cfg, 0), Err(Error::InvalidLimit(0))));
        let cfg = Config {
            link_success: 1.5,
            ..Default::default()
        };
        assert!(matches!(Network::new(cfg, 0), Err(Error::Runtime(_))));
        let mut cfg = Config::default();
        cfg.controller.audit = Some(0.0);
        assert!(matches!(
            Network::new(cfg, 0),
            Err(Error::InvalidInterval(_))
        ));
    }

    #[test_traced]
    fn test_install_all_routes() {
        let mut network = pair();
        assert_eq!(network.check_routes(), 0.0);
        network.set_all_links_up_silent();
        network.install_all_routes().unwrap();
        assert_eq!(network.check_routes(), 1.0);

        // Switch tables match what the controller believes it installed
        let controller = network.controller("c1").unwrap();
        for switch in ["s1", "s2"] {
            assert_eq!(
                table_hash(network.switch(switch).unwrap().table()),
                table_hash(controller.table(switch).unwrap())
            );
        }
        assert_eq!(network.switch("s1").unwrap().version(), 1);
    }

    #[test_traced]
    fn test_data_delivery() {
        let mut network = pair();
        network.set_all_links_up_silent();
        network.install_all_routes().unwrap();
        let mut scheduler = Scheduler::init(SConfig { end: 10.0 }).unwrap();
        network.inject(&mut scheduler, 1.0, "h1", "h2").unwrap();
        network.inject(&mut scheduler, 1.0, "h2", "h1").unwrap();
        scheduler.run(&mut network).unwrap();
        assert_eq!(network.host("h1").unwrap().received(), 1);
        assert_eq!(network.host("h2").unwrap().received(), 1);
        assert_eq!(network.host("h2").unwrap().sent(), 1);
    }

    #[test_traced]
    fn test_link_failure_announced() {
        let mut network = pair();
        network.set_all_links_up_silent();
        network.install_all_routes().unwrap();
        let mut scheduler = Scheduler::init(SConfig { end: 10.0 }).unwrap();
        network
            .schedule_link(&mut scheduler, 1.0, "s2-h2", State::Down)
            .unwrap();
        scheduler.run(&mut network).unwrap();

        // The controller heard the failure and withdrew routes towards h2
        let controller = network.controller("c1").unwrap();
        assert!(!controller.topology().is_up("s2-h2"));
        assert_eq!(controller.topology().version("s2-h2"), Some(2));
        assert_eq!(network.check_routes(), 0.0);
        assert!(network
            .switch("s1")
            .unwrap()
            .table()
            .get(&Signature::data("h1", "h2"))
            .is_none());
        assert_eq!(network.metrics().link_transitions.get(), 1);
    }

    #[test]
    fn test_measure_samples() {
        let mut network = pair();
        network.set_all_links_up_silent();
        network.install_all_routes().unwrap();
        let mut scheduler = Scheduler::init(SConfig { end: 10.0 }).unwrap();
        scheduler.schedule(5.0, Event::Measure { utilization: true });
        scheduler.schedule(6.0, Event::Measure { utilization: false });
        scheduler.run(&mut network).unwrap();
        let samples = network.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].time, 5.0);
        assert_eq!(samples[0].converged, 1.0);
        assert_eq!(samples[0].max_load, Some(2));
        assert_eq!(samples[1].max_load, None);
    }

    #[test]
    fn test_switch_links() {
        let network = pair();
        assert_eq!(network.switch_links(), vec![network.link_id("s1-s2").unwrap()]);
    }

    #[test]
    fn test_set_link_silent() {
        let mut network = pair();
        network.set_all_links_up_silent();
        let id = network.link_id("s1-s2").unwrap();
        let version = network.link("s1-s2").unwrap().version();

        // Switches learn the state, but nothing is announced
        assert!(network.set_link_silent(id, State::Down).unwrap());
        assert!(!network.set_link_silent(id, State::Down).unwrap());
        assert_eq!(network.link("s1-s2").unwrap().version(), version + 1);
        for switch in ["s1", "s2"] {
            assert_eq!(
                network.switch(switch).unwrap().link_state("s1-s2"),
                Some(State::Down)
            );
        }
        assert_eq!(network.packets(), 0);
        assert!(matches!(
            network.set_link_silent(99, State::Up),
            Err(Error::InvalidLink(99))
        ));
    }

    #[test]
    fn test_coordinator_rtt() {
        let cfg = Config {
            coordinated: true,
            ..Default::default()
        };
        let mut network = Network::new(cfg, 0).unwrap();
        for (name, class) in [
            ("c1", Class::Controller),
            ("c2", Class::Controller),
            ("s1", Class::Switch),
            ("s2", Class::Switch),
        ] {
            network.add_node(name, class).unwrap();
        }
        for (a, b) in [("c1", "s1"), ("s1", "s2"), ("s2", "c2")] {
            network.add_link(a, b).unwrap();
        }
        network.wire().unwrap();

        // 3 hops, each 1ms
        let coordinator = network.coordinator().unwrap();
        assert_eq!(coordinator.controllers(), &[0, 1]);
        assert!((coordinator.rtt() - 0.006).abs() < 1e-12);
    }
}
