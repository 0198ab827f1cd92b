//! Shortest-path route computation and forwarding-table diffs.

use super::topology::Topology;
use crate::{
    graph::{to_directed, Graph},
    packet::{FlowTable, Signature},
    Error,
};
use pilo_runtime::hex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Forwarding tables computed for every switch.
#[derive(Clone, Debug, Default)]
pub struct Routes {
    pub tables: BTreeMap<String, FlowTable>,
    /// Host pairs (on distinct switches) considered.
    pub tried: u64,
    /// Host pairs left without a route.
    pub rejected: u64,
}

impl Routes {
    /// Empty tables for every switch in `topology`.
    pub fn new(topology: &Topology) -> Self {
        Self {
            tables: topology
                .switches()
                .iter()
                .map(|switch| (switch.clone(), FlowTable::new()))
                .collect(),
            tried: 0,
            rejected: 0,
        }
    }

    /// Install rules between every pair of distinct endpoints attached to `switch`.
    pub fn local(
        &mut self,
        topology: &Topology,
        switch: &str,
        endpoints: &BTreeSet<String>,
    ) -> Result<(), Error> {
        for source in endpoints {
            for destination in endpoints {
                if source == destination {
                    continue;
                }
                let link = topology.canonical(switch, destination)?;
                self.tables
                    .entry(switch.to_string())
                    .or_default()
                    .insert(Signature::data(source, destination), link);
            }
        }
        Ok(())
    }

    /// Install one rule per switch along `path` (vertices) for `source -> destination`.
    pub fn install(
        &mut self,
        topology: &Topology,
        path: &[usize],
        source: &str,
        destination: &str,
    ) -> Result<(), Error> {
        for (index, &vertex) in path.iter().enumerate() {
            let switch = topology.name(vertex)?;
            let next = match path.get(index + 1) {
                Some(&next) => topology.name(next)?,
                None => destination,
            };
            let link = topology.canonical(switch, next)?;
            self.tables
                .entry(switch.to_string())
                .or_default()
                .insert(Signature::data(source, destination), link);
        }
        Ok(())
    }
}

/// Route every endpoint pair over one shortest path between their switches.
pub fn shortest(topology: &Topology) -> Result<Routes, Error> {
    let graph = to_directed(topology.graph());
    let mut routes = Routes::new(topology);
    let edges = topology.edge_switches();
    for &(from, sources) in &edges {
        for &(to, destinations) in &edges {
            if from == to {
                routes.local(topology, topology.name(from)?, sources)?;
                continue;
            }
            let path = graph.shortest_path(from, to);
            for source in sources {
                for destination in destinations {
                    routes.tried += 1;
                    match &path {
                        Some(path) => routes.install(topology, path, source, destination)?,
                        None => routes.rejected += 1,
                    }
                }
            }
        }
    }
    Ok(routes)
}

/// Changes needed to move switches from their last installed tables to new ones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Patch {
    /// New or changed rules, by switch.
    pub add: BTreeMap<String, FlowTable>,
    /// Rules to delete, by switch.
    pub remove: BTreeMap<String, BTreeSet<Signature>>,
    pub tried: u64,
    pub rejected: u64,
}

impl Patch {
    /// Returns `true` if no switch needs an update.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Number of rules added, changed, or removed.
    pub fn rules(&self) -> usize {
        self.add.values().map(FlowTable::len).sum::<usize>()
            + self.remove.values().map(BTreeSet::len).sum::<usize>()
    }

    /// Switches with at least one change.
    pub fn switches(&self) -> BTreeSet<&str> {
        self.add
            .keys()
            .chain(self.remove.keys())
            .map(String::as_str)
            .collect()
    }
}

/// Diff `routes` against `flows` (the tables last sent to each switch), then replace `flows`
/// with `routes`.
pub fn diff(flows: &mut BTreeMap<String, FlowTable>, routes: Routes) -> Patch {
    let mut patch = Patch {
        tried: routes.tried,
        rejected: routes.rejected,
        ..Default::default()
    };
    for (switch, table) in routes.tables {
        let installed = flows.entry(switch.clone()).or_default();
        let added: FlowTable = table
            .iter()
            .filter(|&(signature, link)| installed.get(signature) != Some(link))
            .map(|(signature, link)| (signature.clone(), link.clone()))
            .collect();
        let removed: BTreeSet<Signature> = installed
            .keys()
            .filter(|signature| !table.contains_key(*signature))
            .cloned()
            .collect();
        *installed = table;
        if !added.is_empty() {
            patch.add.insert(switch.clone(), added);
        }
        if !removed.is_empty() {
            patch.remove.insert(switch, removed);
        }
    }
    patch
}

/// Digest of a forwarding table (entries are hashed in signature order).
pub fn table_hash(table: &FlowTable) -> String {
    let mut hasher = Sha256::new();
    for (signature, link) in table {
        hasher.update(signature.to_string().as_bytes());
        hasher.update(b"=");
        hasher.update(link.as_bytes());
        hasher.update(b"\n");
    }
    hex(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Line s1 - s2 - s3 with h1 at s1, h3 at s3, and h2 and h4 at s2.
    fn line() -> Topology {
        let mut topology = Topology::new();
        topology.add_hosts(["h1", "h2", "h3", "h4"]);
        topology.add_switches(["s1", "s2", "s3"]);
        for link in ["h1-s1", "s2-h2", "h3-s3", "h4-s2", "s1-s2", "s2-s3"] {
            topology.set_version(link, 1);
            topology.connect(link).unwrap();
        }
        topology
    }

    fn rule<'a>(
        routes: &'a Routes,
        switch: &str,
        source: &str,
        destination: &str,
    ) -> Option<&'a str> {
        routes.tables[switch]
            .get(&Signature::data(source, destination))
            .map(String::as_str)
    }

    #[test]
    fn test_shortest_routes() {
        let routes = shortest(&line()).unwrap();
        assert_eq!(rule(&routes, "s1", "h1", "h3"), Some("s1-s2"));
        assert_eq!(rule(&routes, "s2", "h1", "h3"), Some("s2-s3"));
        assert_eq!(rule(&routes, "s3", "h1", "h3"), Some("h3-s3"));
        assert_eq!(rule(&routes, "s3", "h3", "h1"), Some("s2-s3"));

        // Endpoints behind the same switch get a direct rule
        assert_eq!(rule(&routes, "s2", "h2", "h4"), Some("h4-s2"));
        assert_eq!(rule(&routes, "s2", "h4", "h2"), Some("s2-h2"));
        assert_eq!(rule(&routes, "s2", "h2", "h2"), None);

        // 4 endpoints over 3 switches: 12 ordered pairs, 2 of them local
        assert_eq!(routes.tried, 10);
        assert_eq!(routes.rejected, 0);
    }

    #[test]
    fn test_unreachable_pairs_rejected() {
        let mut topology = line();
        topology.set_version("s2-s3", 2);
        assert!(topology.disconnect("s2-s3").unwrap());
        let routes = shortest(&topology).unwrap();

        // h3 is cut off from the other three hosts, in both directions
        assert_eq!(routes.rejected, 6);
        assert_eq!(rule(&routes, "s1", "h1", "h3"), None);
        assert!(routes.tables["s3"].is_empty());
    }

    #[test]
    fn test_second_diff_empty() {
        let topology = line();
        let mut flows = BTreeMap::new();
        let first = diff(&mut flows, shortest(&topology).unwrap());
        assert!(!first.is_empty());
        assert!(first.remove.is_empty());
        assert_eq!(first.switches().len(), 3);

        let second = diff(&mut flows, shortest(&topology).unwrap());
        assert!(second.is_empty());
        assert_eq!(second.rules(), 0);
    }

    #[test]
    fn test_diff_removes_stale_rules() {
        let mut topology = line();
        let mut flows = BTreeMap::new();
        diff(&mut flows, shortest(&topology).unwrap());

        topology.set_version("h3-s3", 2);
        topology.disconnect("h3-s3").unwrap();
        let patch = diff(&mut flows, shortest(&topology).unwrap());
        assert!(patch.add.is_empty());
        assert!(patch.remove["s3"].contains(&Signature::data("h1", "h3")));
        assert!(patch.remove["s1"].contains(&Signature::data("h3", "h1")));
        assert!(flows["s3"].is_empty());
    }

    #[test]
    fn test_table_hash() {
        let mut forward = FlowTable::new();
        forward.insert(Signature::data("h1", "h2"), "s1-s2".into());
        forward.insert(Signature::data("h2", "h1"), "h1-s1".into());
        let mut backward = FlowTable::new();
        backward.insert(Signature::data("h2", "h1"), "h1-s1".into());
        backward.insert(Signature::data("h1", "h2"), "s1-s2".into());
        assert_eq!(table_hash(&forward), table_hash(&backward));
        assert_eq!(table_hash(&forward).len(), 64);

        backward.insert(Signature::data("h1", "h2"), "s1-s3".into());
        assert_ne!(table_hash(&forward), table_hash(&backward));
    }
}
