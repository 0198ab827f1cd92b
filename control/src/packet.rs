//! Messages exchanged between hosts, switches, and controllers.
//!
//! Packet sizes are expressed in bits and follow a fixed accounting so that bandwidth
//! consumed by each kind of control traffic can be compared across runs.

use crate::{
    controller::gossip::{Entry, Gaps},
    link::State,
    Version,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

/// Size of every packet header (in bits).
pub const HEADER: usize = 112;

/// Size of a link identifier or version (in bits).
const WORD: usize = 64;

/// Size of a single link-state report (link, version, state) (in bits).
pub const LINK_STATE: usize = WORD + WORD + 8;

/// Destination of packets addressed to every node.
pub const WILDCARD: &str = "ALL";

/// Kind of a [Packet].
///
/// Everything other than [Kind::Data] is control traffic.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Kind {
    Data,
    LinkUp,
    LinkDown,
    ChangeRules,
    SwitchInformationReq,
    SwitchInformation,
    SwitchTableReq,
    SwitchTableResp,
    Gossip,
    GossipRep,
}

impl Kind {
    /// Returns `true` if this is control traffic.
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::Data)
    }

    /// Numeric code used when rendering flow signatures.
    pub fn code(&self) -> u8 {
        match self {
            Self::Data => 0,
            Self::LinkUp => 3,
            Self::LinkDown => 4,
            Self::ChangeRules => 6,
            Self::SwitchInformationReq => 7,
            Self::SwitchInformation => 8,
            Self::SwitchTableReq => 9,
            Self::SwitchTableResp => 10,
            Self::Gossip => 11,
            Self::GossipRep => 12,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::LinkUp => "link_up",
            Self::LinkDown => "link_down",
            Self::ChangeRules => "change_rules",
            Self::SwitchInformationReq => "switch_information_req",
            Self::SwitchInformation => "switch_information",
            Self::SwitchTableReq => "switch_table_req",
            Self::SwitchTableResp => "switch_table_resp",
            Self::Gossip => "gossip",
            Self::GossipRep => "gossip_rep",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a unidirectional flow: (source host, destination host, packet class).
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Signature {
    pub source: String,
    pub destination: String,
    pub kind: Kind,
}

impl Signature {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, kind: Kind) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            kind,
        }
    }

    /// Signature of data traffic from `source` to `destination`.
    pub fn data(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self::new(source, destination, Kind::Data)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.source,
            self.destination,
            self.kind.code()
        )
    }
}

/// Forwarding rules: flow signature to outgoing link name.
pub type FlowTable = BTreeMap<Signature, String>;

/// Typed contents of a [Packet].
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Data,
    LinkUp {
        link: String,
        version: Version,
    },
    LinkDown {
        link: String,
        version: Version,
    },
    ChangeRules {
        table: FlowTable,
        remove: BTreeSet<Signature>,
    },
    SwitchInformationReq,
    SwitchInformation {
        links: BTreeMap<String, (State, Version)>,
    },
    SwitchTableReq {
        hash: String,
    },
    SwitchTableResp {
        version: u64,
        table: FlowTable,
    },
    Gossip {
        max: BTreeMap<String, Version>,
        gaps: Gaps,
    },
    GossipRep {
        entries: Vec<Entry>,
    },
}

impl Payload {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Data => Kind::Data,
            Self::LinkUp { .. } => Kind::LinkUp,
            Self::LinkDown { .. } => Kind::LinkDown,
            Self::ChangeRules { .. } => Kind::ChangeRules,
            Self::SwitchInformationReq => Kind::SwitchInformationReq,
            Self::SwitchInformation { .. } => Kind::SwitchInformation,
            Self::SwitchTableReq { .. } => Kind::SwitchTableReq,
            Self::SwitchTableResp { .. } => Kind::SwitchTableResp,
            Self::Gossip { .. } => Kind::Gossip,
            Self::GossipRep { .. } => Kind::GossipRep,
        }
    }

    /// Size of a packet carrying this payload (in bits, header included).
    pub fn size(&self) -> usize {
        match self {
            Self::Data | Self::SwitchInformationReq => HEADER,
            Self::LinkUp { .. } | Self::LinkDown { .. } => HEADER + 2 * WORD,
            Self::ChangeRules { table, remove } => {
                HEADER + remove.len() * WORD + table.len() * (WORD + HEADER)
            }
            Self::SwitchInformation { links } => HEADER + links.len() * LINK_STATE,
            Self::SwitchTableReq { .. } => HEADER + 256,
            Self::SwitchTableResp { table, .. } => HEADER + WORD + table.len() * (WORD + HEADER),
            Self::Gossip { max, gaps } => {
                let ranges: usize = gaps.values().map(Vec::len).sum();
                HEADER + max.len() * 2 * WORD + ranges * 2 * WORD
            }
            Self::GossipRep { entries } => HEADER + entries.len() * LINK_STATE,
        }
    }
}

/// Immutable message routed through the network.
///
/// Packets are shared (rather than copied) when flooded over many links.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    /// Globally unique, monotonically increasing identifier.
    pub id: u64,
    pub source: String,
    pub destination: String,
    /// Size in bits.
    pub size: usize,
    pub payload: Payload,
}

impl Packet {
    pub fn new(
        id: u64,
        source: impl Into<String>,
        destination: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            id,
            source: source.into(),
            destination: destination.into(),
            size: payload.size(),
            payload,
        }
    }

    pub fn kind(&self) -> Kind {
        self.payload.kind()
    }

    pub fn signature(&self) -> Signature {
        Signature::new(&*self.source, &*self.destination, self.kind())
    }

    /// Returns `true` if `name` should process this packet.
    pub fn is_for(&self, name: &str) -> bool {
        self.destination == name || self.destination == WILDCARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_format() {
        let signature = Signature::data("h1", "h2");
        assert_eq!(signature.to_string(), "h1:h2:0");
        let packet = Packet::new(1, "c1", WILDCARD, Payload::SwitchInformationReq);
        assert_eq!(packet.signature().to_string(), "c1:ALL:7");
    }

    #[test]
    fn test_sizes() {
        assert_eq!(Payload::Data.size(), 112);
        let link_up = Payload::LinkUp {
            link: "s1-s2".into(),
            version: 3,
        };
        assert_eq!(link_up.size(), 112 + 128);

        let mut table = FlowTable::new();
        table.insert(Signature::data("h1", "h2"), "s1-s2".into());
        table.insert(Signature::data("h2", "h1"), "h1-s1".into());
        let mut remove = BTreeSet::new();
        remove.insert(Signature::data("h1", "h3"));
        let change = Payload::ChangeRules { table, remove };
        assert_eq!(change.size(), 112 + 64 + 2 * (64 + 112));

        let mut links = BTreeMap::new();
        links.insert("s1-s2".to_string(), (State::Up, 1));
        links.insert("s2-s3".to_string(), (State::Down, 2));
        assert_eq!(
            Payload::SwitchInformation { links }.size(),
            112 + 2 * (64 + 64 + 8)
        );
    }

    #[test]
    fn test_gossip_size_counts_gaps() {
        let mut max = BTreeMap::new();
        max.insert("s1-s2".to_string(), 5);
        max.insert("s2-s3".to_string(), 1);
        let mut gaps = Gaps::new();
        gaps.insert("s1-s2".to_string(), vec![(1, 2), (3, 4)]);
        gaps.insert("s2-s3".to_string(), Vec::new());
        let gossip = Payload::Gossip { max, gaps };
        assert_eq!(gossip.size(), 112 + 2 * 128 + 2 * 128);
    }

    #[test]
    fn test_addressing() {
        let direct = Packet::new(1, "c1", "s1", Payload::SwitchInformationReq);
        assert!(direct.is_for("s1"));
        assert!(!direct.is_for("s2"));
        let flood = Packet::new(2, "c1", WILDCARD, Payload::SwitchInformationReq);
        assert!(flood.is_for("s2"));
        assert!(flood.kind().is_control());
        assert!(!Kind::Data.is_control());
    }
}
