//! Forwarding element programmed by controllers.
//!
//! A switch forwards data packets by looking up their flow signature, floods control packets
//! (at most once per packet id), and answers controller requests about its links and table.

use crate::{
    controller::routing::table_hash,
    link::State,
    node::Context,
    packet::{FlowTable, Kind, Packet, Payload, Signature, WILDCARD},
};
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    rc::Rc,
};
use tracing::{debug, info, trace};

#[derive(Debug, Default)]
pub struct Switch {
    /// Last observed state of every attached link.
    links: BTreeMap<String, State>,
    /// Rules pointing out of each attached link.
    usage: BTreeMap<String, u64>,
    table: FlowTable,
    /// Ids of control packets already handled.
    filter: HashSet<u64>,
    version: u64,
}

impl Switch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly attached link (initially down).
    pub fn add_port(&mut self, link: &str) {
        self.links.entry(link.to_string()).or_insert(State::Down);
        self.usage.entry(link.to_string()).or_insert(0);
    }

    pub fn table(&self) -> &FlowTable {
        &self.table
    }

    /// Number of installed rules.
    pub fn entries(&self) -> usize {
        self.table.len()
    }

    /// Incremented every time an installed patch changes the table.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn link_state(&self, link: &str) -> Option<State> {
        self.links.get(link).copied()
    }

    /// Rules currently forwarding out of `link`.
    pub fn usage(&self, link: &str) -> u64 {
        self.usage.get(link).copied().unwrap_or(0)
    }

    /// Largest number of rules forwarding out of any single link.
    pub fn max_usage(&self) -> u64 {
        self.usage.values().copied().max().unwrap_or(0)
    }

    /// Install `table` and then drop `remove`, returning whether anything changed.
    pub fn install(&mut self, table: &FlowTable, remove: &BTreeSet<Signature>) -> bool {
        let mut changed = false;
        for (signature, link) in table {
            match self.table.insert(signature.clone(), link.clone()) {
                Some(previous) if previous == *link => {}
                Some(previous) => {
                    self.release(&previous);
                    *self.usage.entry(link.clone()).or_default() += 1;
                    changed = true;
                }
                None => {
                    *self.usage.entry(link.clone()).or_default() += 1;
                    changed = true;
                }
            }
        }
        for signature in remove {
            if let Some(previous) = self.table.remove(signature) {
                self.release(&previous);
                changed = true;
            }
        }
        if changed {
            self.version += 1;
        }
        changed
    }

    fn release(&mut self, link: &str) {
        if let Some(count) = self.usage.get_mut(link) {
            *count = count.saturating_sub(1);
        }
    }

    /// Handle a packet that arrived over `arrival`.
    pub fn receive(&mut self, ctx: &mut Context<'_>, packet: &Rc<Packet>, arrival: &str) {
        if packet.kind() == Kind::Data {
            match self.table.get(&packet.signature()) {
                Some(link) => {
                    let link = link.clone();
                    ctx.send(&link, packet);
                }
                None => {
                    debug!(
                        switch = ctx.name(),
                        id = packet.id,
                        reason = "no rule",
                        "dropping message"
                    );
                    ctx.metrics().dropped_packet(Kind::Data, "no rule");
                }
            }
            return;
        }

        // Each control packet is handled at most once
        if !self.filter.insert(packet.id) {
            return;
        }
        if packet.destination != ctx.name() {
            ctx.flood(packet, Some(arrival));
        }
        if packet.is_for(ctx.name()) {
            self.process(ctx, packet);
        }
    }

    fn process(&mut self, ctx: &mut Context<'_>, packet: &Packet) {
        match &packet.payload {
            Payload::ChangeRules { table, remove } => {
                if self.install(table, remove) {
                    trace!(
                        switch = ctx.name(),
                        version = self.version,
                        entries = self.table.len(),
                        "installed rules"
                    );
                }
            }
            Payload::SwitchInformationReq => {
                let links = self
                    .links
                    .iter()
                    .map(|(link, &state)| {
                        let version = ctx.link_version(link).unwrap_or(0);
                        (link.clone(), (state, version))
                    })
                    .collect();
                let response =
                    ctx.packet(&packet.source, Payload::SwitchInformation { links });
                ctx.flood(&response, None);
            }
            Payload::SwitchTableReq { hash } => {
                if table_hash(&self.table) == *hash {
                    trace!(switch = ctx.name(), requester = %packet.source, "tables match");
                    return;
                }
                let response = ctx.packet(
                    &packet.source,
                    Payload::SwitchTableResp {
                        version: self.version,
                        table: self.table.clone(),
                    },
                );
                ctx.flood(&response, None);
            }
            _ => {}
        }
    }

    /// React to an attached link changing state, flooding the news if it is new to us.
    pub fn notify(&mut self, ctx: &mut Context<'_>, link: &str, state: State) {
        let Some(current) = self.links.get_mut(link) else {
            return;
        };
        if *current == state {
            return;
        }
        *current = state;
        let version = ctx.link_version(link).unwrap_or(0);
        info!(switch = ctx.name(), link, ?state, version, "link changed");
        let payload = match state {
            State::Up => Payload::LinkUp {
                link: link.to_string(),
                version,
            },
            State::Down => Payload::LinkDown {
                link: link.to_string(),
                version,
            },
        };
        let packet = ctx.packet(WILDCARD, payload);
        ctx.flood(&packet, None);
    }

    /// Record an attached link changing state without telling anyone.
    pub fn silent(&mut self, link: &str, state: State) {
        if let Some(current) = self.links.get_mut(link) {
            *current = state;
        }
    }
}
