//! Topology and parameter files.
//!
//! A topology is a YAML map from node name to `{type: Host | Switch | Control}`, plus a few
//! reserved keys holding link lists:
//!
//! ```yaml
//! h1: {type: Host}
//! s1: {type: Switch}
//! s2: {type: Switch}
//! c1: {type: Control}
//! links: [h1-s1, s1-s2, c1-s2]
//! crit_links: [s1-s2]
//! ```

use crate::Error;
use pilo_control::{controller::topology::split, Class, Config, Network};
use pilo_runtime::Spec;
use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::Path};
use tracing::debug;

/// Links to create.
pub const LINKS: &str = "links";

/// Links that failure traces may pick from.
pub const FAIL_LINKS: &str = "fail_links";

/// Links that failure traces pick from when restricted to critical links.
pub const CRIT_LINKS: &str = "crit_links";

/// Ignored.
pub const RUNFILE: &str = "runfile";

/// Kind of node, as written in a topology file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum Type {
    Host,
    #[serde(alias = "LinkStateSwitch")]
    Switch,
    #[serde(alias = "Controller")]
    Control,
}

impl From<Type> for Class {
    fn from(value: Type) -> Self {
        match value {
            Type::Host => Class::Host,
            Type::Switch => Class::Switch,
            Type::Control => Class::Controller,
        }
    }
}

#[derive(Deserialize)]
struct Entry {
    #[serde(rename = "type")]
    kind: Type,
}

/// Parsed topology file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Topology {
    pub nodes: BTreeMap<String, Type>,
    pub links: Vec<String>,
    pub fail_links: Vec<String>,
    pub crit_links: Vec<String>,
}

impl Topology {
    pub fn load(path: &Path) -> Result<Self, Error> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn parse(yaml: &str) -> Result<Self, Error> {
        let raw: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(yaml)?;
        let mut topology = Self::default();
        for (key, value) in raw {
            match key.as_str() {
                LINKS => topology.links = serde_yaml::from_value(value)?,
                FAIL_LINKS => topology.fail_links = serde_yaml::from_value(value)?,
                CRIT_LINKS => topology.crit_links = serde_yaml::from_value(value)?,
                RUNFILE => {}
                _ => {
                    let entry: Entry = serde_yaml::from_value(value)
                        .map_err(|source| Error::InvalidNode { name: key.clone(), source })?;
                    topology.nodes.insert(key, entry.kind);
                }
            }
        }

        // Every link must join known nodes, and listed failure candidates must exist
        for link in &topology.links {
            let (a, b) = split(link)?;
            for node in [a, b] {
                if !topology.nodes.contains_key(node) {
                    return Err(Error::UnknownEndpoint(link.clone(), node.to_string()));
                }
            }
        }
        for link in topology.fail_links.iter().chain(&topology.crit_links) {
            if !topology.links.contains(link) {
                return Err(Error::UnknownLink(link.clone()));
            }
        }
        debug!(
            nodes = topology.nodes.len(),
            links = topology.links.len(),
            "parsed topology"
        );
        Ok(topology)
    }

    /// Create a wired [Network] with every node and link (all links down).
    pub fn build(&self, cfg: Config, seed: u64) -> Result<Network, Error> {
        let mut network = Network::new(cfg, seed)?;
        for (name, &kind) in &self.nodes {
            network.add_node(name, kind.into())?;
        }
        for link in &self.links {
            let (a, b) = split(link)?;
            network.add_link(a, b)?;
        }
        network.wire()?;
        Ok(network)
    }
}

/// Parsed configuration file.
///
/// ```yaml
/// data_link_latency:
///   distro: normal
///   mean: 1.0
///   stdev: 0.1
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Parameters {
    /// Per-hop latency of every link (milliseconds).
    pub data_link_latency: Spec,
}

impl Parameters {
    pub fn load(path: &Path) -> Result<Self, Error> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn parse(yaml: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const LINE: &str = r#"
h1: {type: Host}
h2: {type: Host, args: [ignored]}
s1: {type: LinkStateSwitch}
s2: {type: Switch}
c1: {type: Control}
runfile: trace.txt
links: [h1-s1, s1-s2, s2-h2, c1-s1]
crit_links: [s1-s2]
"#;

    #[test]
    fn test_parse() {
        let topology = Topology::parse(LINE).unwrap();
        assert_eq!(topology.nodes.len(), 5);
        assert_eq!(topology.nodes["s1"], Type::Switch);
        assert_eq!(topology.nodes["c1"], Type::Control);
        assert_eq!(topology.links, vec!["h1-s1", "s1-s2", "s2-h2", "c1-s1"]);
        assert_eq!(topology.crit_links, vec!["s1-s2"]);
        assert!(topology.fail_links.is_empty());
    }

    #[test]
    fn test_build() {
        let topology = Topology::parse(LINE).unwrap();
        let mut network = topology.build(Config::default(), 0).unwrap();
        assert_eq!(network.nodes().len(), 5);
        assert_eq!(network.links().len(), 4);
        assert!(network.controller("c1").is_some());
        network.set_all_links_up_silent();
        network.install_all_routes().unwrap();
        assert_eq!(network.check_routes(), 1.0);
    }

    #[test_case("h1: {type: Router}"; "unknown type")]
    #[test_case("h1: {kind: Host}"; "missing type")]
    fn test_invalid_node(yaml: &str) {
        assert!(matches!(
            Topology::parse(yaml),
            Err(Error::InvalidNode { .. })
        ));
    }

    #[test]
    fn test_invalid_links() {
        let unknown = "h1: {type: Host}\nlinks: [h1-s9]";
        assert!(matches!(
            Topology::parse(unknown),
            Err(Error::UnknownEndpoint(_, node)) if node == "s9"
        ));
        let malformed = "h1: {type: Host}\nlinks: [h1]";
        assert!(matches!(Topology::parse(malformed), Err(Error::Control(_))));
        let missing = "h1: {type: Host}\ns1: {type: Switch}\nlinks: [h1-s1]\nfail_links: [s1-h1]";
        assert!(matches!(
            Topology::parse(missing),
            Err(Error::UnknownLink(_))
        ));
    }

    #[test]
    fn test_parameters() {
        let parameters = Parameters::parse(
            "data_link_latency:\n  distro: normal\n  mean: 1.0\n  stdev: 0.1\nother: 3\n",
        )
        .unwrap();
        assert_eq!(
            parameters.data_link_latency,
            Spec::Normal {
                mean: 1.0,
                stdev: 0.1
            }
        );
        assert!(Parameters::parse("data_link_latency: {distro: uniform}").is_err());
    }
}
