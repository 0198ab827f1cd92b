//! A controller's view of the network.
//!
//! Switches are graph vertices (numbered in registration order). Links between two switches
//! are graph edges, while links from an endpoint (a host or a controller) to a switch are kept
//! as per-switch attachment sets. Only links believed up are present in either structure.

use crate::{
    graph::{Graph, Undirected},
    Error, Version,
};
use std::collections::{BTreeMap, BTreeSet};

/// Split a link name (`a-b`) into its endpoints.
pub fn split(link: &str) -> Result<(&str, &str), Error> {
    match link.split_once('-') {
        Some((a, b)) if !a.is_empty() && !b.is_empty() && !b.contains('-') => Ok((a, b)),
        _ => Err(Error::InvalidLinkName(link.to_string())),
    }
}

#[derive(Clone, Debug, Default)]
pub struct Topology {
    controllers: BTreeSet<String>,
    switches: BTreeSet<String>,
    /// Hosts and controllers.
    endpoints: BTreeSet<String>,

    vertices: BTreeMap<String, usize>,
    names: Vec<String>,

    /// Highest version seen for every known link.
    versions: BTreeMap<String, Version>,
    /// Links believed up.
    up: BTreeSet<String>,
    /// Endpoints reachable through each switch.
    attached: BTreeMap<String, BTreeSet<String>>,
    graph: Undirected,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_controllers<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            self.controllers.insert(name.to_string());
            self.endpoints.insert(name.to_string());
        }
    }

    pub fn add_hosts<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            self.endpoints.insert(name.to_string());
        }
    }

    /// Register switches as graph vertices, in iteration order.
    pub fn add_switches<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            if self.vertices.contains_key(name) {
                continue;
            }
            let vertex = self.names.len();
            self.names.push(name.to_string());
            self.vertices.insert(name.to_string(), vertex);
            self.switches.insert(name.to_string());
            self.attached.insert(name.to_string(), BTreeSet::new());
            self.graph.add_vertex(vertex);
        }
    }

    pub fn controllers(&self) -> &BTreeSet<String> {
        &self.controllers
    }

    pub fn switches(&self) -> &BTreeSet<String> {
        &self.switches
    }

    pub fn graph(&self) -> &Undirected {
        &self.graph
    }

    pub fn vertex(&self, name: &str) -> Result<usize, Error> {
        self.vertices
            .get(name)
            .copied()
            .ok_or_else(|| Error::MissingVertex(name.to_string()))
    }

    pub fn name(&self, vertex: usize) -> Result<&str, Error> {
        self.names
            .get(vertex)
            .map(String::as_str)
            .ok_or_else(|| Error::MissingVertex(vertex.to_string()))
    }

    /// Switches with at least one attached endpoint, in vertex order.
    pub fn edge_switches(&self) -> Vec<(usize, &BTreeSet<String>)> {
        self.names
            .iter()
            .enumerate()
            .filter_map(|(vertex, name)| {
                let attached = self.attached.get(name)?;
                (!attached.is_empty()).then_some((vertex, attached))
            })
            .collect()
    }

    /// Endpoints attached to `switch` over links believed up.
    pub fn attached(&self, switch: &str) -> Option<&BTreeSet<String>> {
        self.attached.get(switch)
    }

    pub fn version(&self, link: &str) -> Option<Version> {
        self.versions.get(link).copied()
    }

    pub fn set_version(&mut self, link: &str, version: Version) {
        self.versions.insert(link.to_string(), version);
    }

    pub fn is_known(&self, link: &str) -> bool {
        self.versions.contains_key(link)
    }

    pub fn is_up(&self, link: &str) -> bool {
        self.up.contains(link)
    }

    pub fn up(&self) -> &BTreeSet<String> {
        &self.up
    }

    /// Returns `true` if either end of `link` is a host or a controller.
    pub fn is_host_link(&self, link: &str) -> Result<bool, Error> {
        let (a, b) = split(link)?;
        Ok(self.endpoints.contains(a) || self.endpoints.contains(b))
    }

    /// Name under which the link between `a` and `b` is known (`a-b`, else `b-a`).
    pub fn canonical(&self, a: &str, b: &str) -> Result<String, Error> {
        let forward = format!("{a}-{b}");
        if self.versions.contains_key(&forward) {
            return Ok(forward);
        }
        let backward = format!("{b}-{a}");
        if self.versions.contains_key(&backward) {
            return Ok(backward);
        }
        Err(Error::MissingLink(a.to_string(), b.to_string()))
    }

    /// Ensure `link` joins known nodes and touches at least one switch.
    pub fn check(&self, link: &str) -> Result<(), Error> {
        self.resolve(link).map(|_| ())
    }

    fn resolve<'a>(&self, link: &'a str) -> Result<Attachment<'a>, Error> {
        let (a, b) = split(link)?;
        match (self.endpoints.contains(a), self.endpoints.contains(b)) {
            (true, true) => Err(Error::EndpointLink(link.to_string())),
            (true, false) => {
                self.vertex(b)?;
                Ok(Attachment::Endpoint { switch: b, endpoint: a })
            }
            (false, true) => {
                self.vertex(a)?;
                Ok(Attachment::Endpoint { switch: a, endpoint: b })
            }
            (false, false) => Ok(Attachment::Edge(self.vertex(a)?, self.vertex(b)?)),
        }
    }

    /// Mark `link` up, returning whether the set of up links changed.
    pub fn connect(&mut self, link: &str) -> Result<bool, Error> {
        let attachment = self.resolve(link)?;
        if !self.up.insert(link.to_string()) {
            return Ok(false);
        }
        match attachment {
            Attachment::Endpoint { switch, endpoint } => {
                self.attached
                    .entry(switch.to_string())
                    .or_default()
                    .insert(endpoint.to_string());
            }
            Attachment::Edge(a, b) => {
                Graph::add_edge(&mut self.graph, a, b);
            }
        }
        Ok(true)
    }

    /// Mark `link` down, returning whether the set of up links changed.
    pub fn disconnect(&mut self, link: &str) -> Result<bool, Error> {
        let attachment = self.resolve(link)?;
        if !self.up.remove(link) {
            return Ok(false);
        }
        match attachment {
            Attachment::Endpoint { switch, endpoint } => {
                if let Some(attached) = self.attached.get_mut(switch) {
                    attached.remove(endpoint);
                }
            }
            Attachment::Edge(a, b) => {
                Graph::remove_edge(&mut self.graph, a, b);
            }
        }
        Ok(true)
    }
}

/// Where a link lands in the topology.
enum Attachment<'a> {
    Endpoint { switch: &'a str, endpoint: &'a str },
    Edge(usize, usize),
}
