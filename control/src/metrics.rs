use crate::packet::Kind;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Message {
    pub kind: String,
}

impl Message {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Loss {
    pub kind: String,
    pub reason: String,
}

impl Loss {
    pub fn new(kind: Kind, reason: &str) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Counters shared by every node in a network.
#[derive(Debug, Default)]
pub struct Metrics {
    pub sent: Family<Message, Counter>,
    pub delivered: Family<Message, Counter>,
    pub bits: Family<Message, Counter>,
    pub dropped: Family<Loss, Counter>,
    pub patches: Counter,
    pub rule_updates: Counter,
    pub admission_tried: Counter,
    pub admission_rejected: Counter,
    pub coordinated: Counter,
    pub link_transitions: Counter,
}

impl Metrics {
    pub fn register(&self, registry: &mut Registry) {
        registry.register("sent", "Packets accepted by a link", self.sent.clone());
        registry.register(
            "delivered",
            "Packets delivered to a node",
            self.delivered.clone(),
        );
        registry.register(
            "bits",
            "Bits delivered over links",
            self.bits.clone(),
        );
        registry.register("dropped", "Packets lost, by reason", self.dropped.clone());
        registry.register(
            "patches",
            "Forwarding-table patches computed by controllers",
            self.patches.clone(),
        );
        registry.register(
            "rule_updates",
            "Rules added or removed by patches",
            self.rule_updates.clone(),
        );
        registry.register(
            "admission_tried",
            "Host pairs considered during path computation",
            self.admission_tried.clone(),
        );
        registry.register(
            "admission_rejected",
            "Host pairs left without a route",
            self.admission_rejected.clone(),
        );
        registry.register(
            "coordinated",
            "Packets sequenced by the coordinator",
            self.coordinated.clone(),
        );
        registry.register(
            "link_transitions",
            "Links set up or down after bring-up",
            self.link_transitions.clone(),
        );
    }

    pub(crate) fn sent_packet(&self, kind: Kind) {
        self.sent.get_or_create(&Message::new(kind)).inc();
    }

    pub(crate) fn delivered_packet(&self, kind: Kind, size: usize) {
        let label = Message::new(kind);
        self.delivered.get_or_create(&label).inc();
        self.bits.get_or_create(&label).inc_by(size as u64);
    }

    pub(crate) fn dropped_packet(&self, kind: Kind, reason: &str) {
        self.dropped.get_or_create(&Loss::new(kind, reason)).inc();
    }
}
