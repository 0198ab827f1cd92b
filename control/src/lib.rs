//! Simulate a link-state, gossip-repaired software-defined network control plane.
//!
//! A [Network] is an arena of nodes (hosts, switches, and controllers) joined by failure-prone
//! [link::Link]s. Controllers learn the topology from flooded link-state notifications and
//! periodic switch polls, repair missed updates with gossip anti-entropy
//! ([controller::gossip::GossipLog]), compute shortest paths, and push forwarding-table patches
//! to switches. Every interaction is a packet delivered by a [pilo_runtime::Scheduler], so a run
//! is a deterministic function of its seed.
//!
//! # Example
//!
//! ```rust
//! use pilo_control::{Class, Config, Network};
//! use pilo_runtime::{Config as SConfig, Scheduler};
//!
//! // Two hosts behind a pair of switches, managed by one controller
//! let mut network = Network::new(Config::default(), 42).unwrap();
//! for (name, class) in [
//!     ("h1", Class::Host),
//!     ("h2", Class::Host),
//!     ("s1", Class::Switch),
//!     ("s2", Class::Switch),
//!     ("c1", Class::Controller),
//! ] {
//!     network.add_node(name, class).unwrap();
//! }
//! for (a, b) in [("h1", "s1"), ("s1", "s2"), ("s2", "h2"), ("c1", "s1")] {
//!     network.add_link(a, b).unwrap();
//! }
//! network.wire().unwrap();
//!
//! // Bring everything up without generating link events, then install routes
//! network.set_all_links_up_silent();
//! network.install_all_routes().unwrap();
//! assert_eq!(network.check_routes(), 1.0);
//!
//! // Run the control plane for a while
//! let mut scheduler = Scheduler::init(SConfig { end: 1_000.0 }).unwrap();
//! network.start(&mut scheduler);
//! scheduler.run(&mut network).unwrap();
//! assert_eq!(network.check_routes(), 1.0);
//! ```

pub mod controller;
pub mod coordinator;
pub mod graph;
pub mod link;
pub mod metrics;
pub mod network;
pub mod node;
pub mod packet;
pub mod switch;

pub use network::{Class, Config, Event, Network, Sample};

use pilo_runtime::Time;
use thiserror::Error;

/// Index of a node in a [Network].
pub type NodeId = usize;

/// Index of a link in a [Network].
pub type LinkId = usize;

/// Version of a link's state (bumped on every transition).
pub type Version = u64;

/// Errors that can occur when building or running a [Network].
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid node name: {0}")]
    InvalidName(String),
    #[error("duplicate node: {0}")]
    DuplicateNode(String),
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("not valid to link self: {0}")]
    LinkingSelf(String),
    #[error("duplicate link: {0}")]
    DuplicateLink(String),
    #[error("unknown link: {0}")]
    UnknownLink(String),
    #[error("invalid link name: {0}")]
    InvalidLinkName(String),
    #[error("missing vertex: {0}")]
    MissingVertex(String),
    #[error("missing link between {0} and {1}")]
    MissingLink(String, String),
    #[error("link does not attach to a switch: {0}")]
    EndpointLink(String),
    #[error("invalid node index: {0}")]
    InvalidNode(NodeId),
    #[error("invalid link index: {0}")]
    InvalidLink(LinkId),
    #[error("not a controller: {0}")]
    NotController(String),
    #[error("not a host: {0}")]
    NotHost(String),
    #[error("invalid bandwidth: {0}")]
    InvalidBandwidth(f64),
    #[error("invalid load limit: {0}")]
    InvalidLimit(usize),
    #[error("invalid interval: {0}")]
    InvalidInterval(Time),
    #[error("runtime error: {0}")]
    Runtime(#[from] pilo_runtime::Error),
}
