//! Controllers: replicated topology views that program switches.
//!
//! A [Controller] learns link state from flooded notifications and periodic switch polls,
//! repairs missed updates through [gossip], and recomputes routes whenever the set of links
//! it believes up changes. Recomputed tables are diffed against what each switch was last
//! sent and only the differences are pushed, as `ChangeRules` packets.
//!
//! Link updates are ordered by version: an update whose version is not newer than the one
//! already known for that link is ignored.
//!
//! With [Config::audit] set, a controller also sends each switch the hash of the table it
//! last computed for it. Switches that disagree reply with their table, and the controller
//! pushes whatever rules bring it back in line.

pub mod gossip;
pub mod routing;
pub mod te;
pub mod topology;

use crate::{
    link::State,
    network::Event,
    node::Context,
    packet::{FlowTable, Packet, Payload, WILDCARD},
    Error, Version,
};
use gossip::GossipLog;
use pilo_runtime::{Distribution, Time};
use routing::{table_hash, Patch};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use topology::Topology;
use tracing::{debug, trace};

/// How routes are chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    /// One shortest path per switch pair, shared by every endpoint pair.
    #[default]
    ShortestPath,
    /// Shortest paths, admitting at most `limit` routes per directed switch-to-switch arc.
    LoadAware { limit: usize },
}

/// Configuration shared by every controller in a network.
#[derive(Clone, Debug)]
pub struct Config {
    /// Seconds between switch polls.
    pub refresh: Time,

    /// Seconds between gossip rounds.
    pub gossip: Time,

    /// Seconds between switch table audits (disabled when `None`).
    pub audit: Option<Time>,

    pub strategy: Strategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh: 300.0,
            gossip: 600.0,
            audit: None,
            strategy: Strategy::ShortestPath,
        }
    }
}

pub struct Controller {
    name: String,
    cfg: Config,
    topology: Topology,
    log: GossipLog,
    /// Table last sent to each switch.
    flows: BTreeMap<String, FlowTable>,
    /// Ids of packets already handled.
    filter: HashSet<u64>,
    /// Whether a received packet survives (independent of link loss).
    success: Box<dyn Distribution<bool>>,
}

impl Controller {
    pub fn new(name: &str, cfg: Config, success: Box<dyn Distribution<bool>>) -> Self {
        Self {
            name: name.to_string(),
            cfg,
            topology: Topology::new(),
            log: GossipLog::new(),
            flows: BTreeMap::new(),
            filter: HashSet::new(),
            success,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn log(&self) -> &GossipLog {
        &self.log
    }

    /// Table last computed for `switch`.
    pub fn table(&self, switch: &str) -> Option<&FlowTable> {
        self.flows.get(switch)
    }

    pub fn add_controllers<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        self.topology.add_controllers(names);
    }

    /// Register switches (in the order their graph vertices should be numbered).
    pub fn add_switches<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        let names: Vec<&str> = names.into_iter().collect();
        for &name in &names {
            self.flows.entry(name.to_string()).or_default();
        }
        self.topology.add_switches(names);
    }

    pub fn add_hosts<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        self.topology.add_hosts(names);
    }

    /// Returns `true` if either end of `link` is a host or a controller.
    pub fn is_host_link(&self, link: &str) -> Result<bool, Error> {
        self.topology.is_host_link(link)
    }

    /// Accept version `version` of `link`, unless a version at least as new is known.
    ///
    /// Returns `false`, changing nothing, when the update is stale.
    fn accept(&mut self, link: &str, version: Version, state: State) -> Result<bool, Error> {
        self.topology.check(link)?;
        match self.topology.version(link) {
            Some(known) if version <= known => {
                debug!(
                    controller = %self.name,
                    link,
                    version,
                    known,
                    ?state,
                    "rejected stale update"
                );
                return Ok(false);
            }
            Some(_) => {}
            None => self.log.open(link),
        }
        self.topology.set_version(link, version);
        self.log.record(link, version, state);
        Ok(true)
    }

    /// Apply `link` coming up at `version`.
    ///
    /// Returns whether the set of links believed up changed (the only reason to recompute
    /// routes).
    pub fn add_link(&mut self, link: &str, version: Version) -> Result<bool, Error> {
        if !self.accept(link, version, State::Up)? {
            return Ok(false);
        }
        self.topology.connect(link)
    }

    /// Apply `link` going down at `version`.
    ///
    /// Returns whether the set of links believed up changed.
    pub fn remove_link(&mut self, link: &str, version: Version) -> Result<bool, Error> {
        if !self.accept(link, version, State::Down)? {
            return Ok(false);
        }
        self.topology.disconnect(link)
    }

    /// Recompute every switch's table and diff it against what was last sent.
    ///
    /// The computed tables become the new baseline, so calling this twice without a
    /// topology change yields an empty patch the second time.
    pub fn compute_paths(&mut self) -> Result<Patch, Error> {
        let routes = match self.cfg.strategy {
            Strategy::ShortestPath => routing::shortest(&self.topology)?,
            Strategy::LoadAware { limit } => te::load_aware(&self.topology, limit)?,
        };
        let patch = routing::diff(&mut self.flows, routes);
        debug!(
            controller = %self.name,
            tried = patch.tried,
            rejected = patch.rejected,
            rules = patch.rules(),
            "computed paths"
        );
        Ok(patch)
    }

    /// Send each switch in `patch` its changes.
    pub fn apply_patch(&self, ctx: &mut Context<'_>, patch: Patch) {
        let metrics = ctx.metrics();
        metrics.admission_tried.inc_by(patch.tried);
        metrics.admission_rejected.inc_by(patch.rejected);
        if patch.is_empty() {
            return;
        }
        let rules = patch.rules();
        metrics.patches.inc();
        metrics.rule_updates.inc_by(rules as u64);

        let switches: BTreeSet<String> = patch.switches().into_iter().map(String::from).collect();
        debug!(
            controller = %self.name,
            switches = switches.len(),
            rules,
            "sending patch"
        );
        let Patch {
            mut add,
            mut remove,
            ..
        } = patch;
        for switch in switches {
            let table = add.remove(&switch).unwrap_or_default();
            let removed = remove.remove(&switch).unwrap_or_default();
            let packet = ctx.packet(
                &switch,
                Payload::ChangeRules {
                    table,
                    remove: removed,
                },
            );
            ctx.flood(&packet, None);
        }
    }

    /// Handle a delivered packet.
    pub fn receive(&mut self, ctx: &mut Context<'_>, packet: &Packet) -> Result<(), Error> {
        if !self.success.next() {
            debug!(
                controller = %self.name,
                id = packet.id,
                kind = %packet.kind(),
                reason = "controller drop",
                "dropping message"
            );
            ctx.metrics()
                .dropped_packet(packet.kind(), "controller drop");
            return Ok(());
        }
        if !self.filter.insert(packet.id) {
            return Ok(());
        }
        if !packet.kind().is_control() || !packet.is_for(&self.name) {
            return Ok(());
        }

        let changed = match &packet.payload {
            Payload::LinkUp { link, version } => self.add_link(link, *version)?,
            Payload::LinkDown { link, version } => self.remove_link(link, *version)?,
            Payload::SwitchInformation { links } => {
                let mut changed = false;
                for (link, &(state, version)) in links {
                    if self
                        .topology
                        .version(link)
                        .is_some_and(|known| version <= known)
                    {
                        continue;
                    }
                    changed |= match state {
                        State::Up => self.add_link(link, version)?,
                        State::Down => self.remove_link(link, version)?,
                    };
                }
                changed
            }
            Payload::Gossip { max, gaps } => {
                let entries = self.log.compute_response(max, gaps);
                if !entries.is_empty() {
                    trace!(
                        controller = %self.name,
                        requester = %packet.source,
                        entries = entries.len(),
                        "answering gossip"
                    );
                    let response = ctx.packet(&packet.source, Payload::GossipRep { entries });
                    ctx.flood(&response, None);
                }
                false
            }
            Payload::GossipRep { entries } => {
                let merged = self.log.merge(entries);
                trace!(controller = %self.name, merged, "merged gossip");
                false
            }
            Payload::SwitchTableResp { version, table } => {
                self.reconcile(ctx, &packet.source, *version, table);
                false
            }
            _ => false,
        };
        if changed {
            let patch = self.compute_paths()?;
            self.apply_patch(ctx, patch);
        }
        Ok(())
    }

    /// Send `switch` whatever it needs to make `reported` equal to the table last computed
    /// for it.
    fn reconcile(
        &self,
        ctx: &mut Context<'_>,
        switch: &str,
        version: u64,
        reported: &FlowTable,
    ) {
        let Some(expected) = self.flows.get(switch) else {
            return;
        };
        let table: FlowTable = expected
            .iter()
            .filter(|(signature, link)| reported.get(*signature) != Some(*link))
            .map(|(signature, link)| (signature.clone(), link.clone()))
            .collect();
        let remove: BTreeSet<_> = reported
            .keys()
            .filter(|signature| !expected.contains_key(*signature))
            .cloned()
            .collect();
        if table.is_empty() && remove.is_empty() {
            return;
        }
        debug!(
            controller = %self.name,
            switch,
            version,
            added = table.len(),
            removed = remove.len(),
            "repairing stale table"
        );
        let metrics = ctx.metrics();
        metrics.patches.inc();
        metrics
            .rule_updates
            .inc_by((table.len() + remove.len()) as u64);
        let packet = ctx.packet(switch, Payload::ChangeRules { table, remove });
        ctx.flood(&packet, None);
    }

    /// Poll every switch for link state, then re-arm the timer.
    pub fn refresh(&mut self, ctx: &mut Context<'_>) {
        let request = ctx.packet(WILDCARD, Payload::SwitchInformationReq);
        self.filter.insert(request.id);
        ctx.flood(&request, None);
        let node = ctx.node();
        ctx.schedule(self.cfg.refresh, Event::Refresh(node));
    }

    /// Advertise gossip gaps to every controller, then re-arm the timer.
    pub fn gossip(&mut self, ctx: &mut Context<'_>) {
        let (max, gaps) = self.log.compute_gaps();
        let request = ctx.packet(WILDCARD, Payload::Gossip { max, gaps });
        self.filter.insert(request.id);
        ctx.flood(&request, None);
        let node = ctx.node();
        ctx.schedule(self.cfg.gossip, Event::Gossip(node));
    }

    /// Ask every switch to compare its table with the one last computed for it, then re-arm
    /// the timer.
    ///
    /// Switches whose table differs reply with their full table, which is then repaired.
    pub fn audit(&mut self, ctx: &mut Context<'_>) {
        for (switch, table) in &self.flows {
            let request = ctx.packet(
                switch,
                Payload::SwitchTableReq {
                    hash: table_hash(table),
                },
            );
            self.filter.insert(request.id);
            ctx.flood(&request, None);
        }
        if let Some(interval) = self.cfg.audit {
            let node = ctx.node();
            ctx.schedule(interval, Event::Audit(node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Signature;
    use pilo_macros::test_traced;
    use pilo_runtime::distribution::Constant;

    fn controller(strategy: Strategy) -> Controller {
        let cfg = Config {
            strategy,
            ..Default::default()
        };
        let mut controller = Controller::new("c1", cfg, Box::new(Constant::new(true)));
        controller.add_controllers(["c1"]);
        controller.add_hosts(["h1", "h2"]);
        controller.add_switches(["s1", "s2", "s3"]);
        controller
    }

    #[test_traced]
    fn test_version_ordering() {
        let mut controller = controller(Strategy::ShortestPath);
        assert!(controller.add_link("s1-s2", 1).unwrap());
        assert!(controller.remove_link("s1-s2", 2).unwrap());
        assert!(controller.add_link("s1-s2", 3).unwrap());

        // Stale or repeated versions are rejected in either direction
        assert!(!controller.remove_link("s1-s2", 2).unwrap());
        assert!(!controller.remove_link("s1-s2", 3).unwrap());
        assert!(!controller.add_link("s1-s2", 1).unwrap());
        assert!(controller.topology().is_up("s1-s2"));
        assert_eq!(controller.topology().version("s1-s2"), Some(3));

        // Every accepted event is in the log
        assert_eq!(controller.log().state("s1-s2", 2), Some(State::Down));
        assert_eq!(controller.log().max("s1-s2"), Some(3));
    }

    #[test_traced]
    fn test_newer_version_without_change() {
        let mut controller = controller(Strategy::ShortestPath);
        assert!(controller.add_link("s1-s2", 1).unwrap());

        // Accepted, but the link was already up
        assert!(!controller.add_link("s1-s2", 3).unwrap());
        assert_eq!(controller.topology().version("s1-s2"), Some(3));
        assert!(controller.log().is_committed("s1-s2", 3));
    }

    #[test_traced]
    fn test_invalid_link_leaves_no_trace() {
        let mut controller = controller(Strategy::ShortestPath);
        assert!(matches!(
            controller.add_link("h1-h2", 1),
            Err(Error::EndpointLink(_))
        ));
        assert!(controller.topology().version("h1-h2").is_none());
        assert!(!controller.log().contains("h1-h2"));
    }

    #[test_traced]
    fn test_compute_paths_idempotent() {
        let mut controller = controller(Strategy::ShortestPath);
        for link in ["h1-s1", "s1-s2", "s2-s3", "h2-s3", "c1-s2"] {
            assert!(controller.add_link(link, 1).unwrap());
        }
        let patch = controller.compute_paths().unwrap();
        assert_eq!(
            patch.add["s1"].get(&Signature::data("h1", "h2")),
            Some(&"s1-s2".to_string())
        );
        assert_eq!(
            patch.add["s2"].get(&Signature::data("c1", "h2")),
            Some(&"s2-s3".to_string())
        );
        assert_eq!(patch.rejected, 0);
        assert_eq!(controller.table("s1"), patch.add.get("s1"));

        assert!(controller.compute_paths().unwrap().is_empty());
    }

    #[test_traced]
    fn test_load_aware_strategy() {
        let mut controller = controller(Strategy::LoadAware { limit: 1 });
        for link in ["h1-s1", "s1-s2", "s2-s3", "h2-s3", "c1-s1"] {
            controller.add_link(link, 1).unwrap();
        }

        // h1 and c1 both need s1 -> s2, which admits one route
        let patch = controller.compute_paths().unwrap();
        assert_eq!(patch.tried, 4);
        assert_eq!(patch.rejected, 2);
    }
}
