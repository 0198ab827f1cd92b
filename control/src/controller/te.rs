//! Load-aware routing with per-arc admission limits.
//!
//! Endpoint pairs are routed greedily, in switch-vertex then endpoint order. Every directed
//! switch-to-switch arc carries a counter of routes placed on it; once the counter reaches
//! the limit the arc is removed from the working graph. A pair whose preferred path hits a
//! removed arc is re-routed from that switch on what remains. Pairs that cannot be completed
//! are rejected and consume no capacity.

use super::{routing::Routes, topology::Topology};
use crate::{
    graph::{to_directed, Directed, Graph},
    Error,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Routes placed on each directed arc.
type Load = BTreeMap<(usize, usize), usize>;

/// Largest load along `path`.
fn peak(load: &Load, path: &[usize]) -> usize {
    path.windows(2)
        .filter_map(|arc| load.get(&(arc[0], arc[1])))
        .copied()
        .max()
        .unwrap_or(0)
}

/// Follow `path` where its arcs remain, detouring from the current switch where they do not.
///
/// Returns `None` if the destination becomes unreachable or the route would loop.
fn walk(graph: &Directed, path: &[usize]) -> Option<Vec<usize>> {
    let (&first, _) = path.split_first()?;
    let &target = path.last()?;
    let mut route = vec![first];
    let mut plan = path.to_vec();
    let mut index = 1;
    let mut at = first;
    while at != target {
        let mut next = *plan.get(index)?;
        if !graph.has_edge(at, next) {
            plan = graph.shortest_path(at, target)?;
            index = 1;
            next = *plan.get(index)?;
        }
        if route.contains(&next) {
            return None;
        }
        route.push(next);
        at = next;
        index += 1;
    }
    Some(route)
}

/// Route every endpoint pair, admitting at most `limit` routes per directed arc.
pub fn load_aware(topology: &Topology, limit: usize) -> Result<Routes, Error> {
    if limit == 0 {
        return Err(Error::InvalidLimit(limit));
    }
    let mut graph = to_directed(topology.graph());
    let mut load = Load::new();
    let mut routes = Routes::new(topology);
    let edges = topology.edge_switches();
    for &(from, sources) in &edges {
        for &(to, destinations) in &edges {
            if from == to {
                routes.local(topology, topology.name(from)?, sources)?;
                continue;
            }

            // Prefer the least loaded of the equal-length candidates (first on ties)
            let preferred = graph
                .all_shortest_paths(from, to)
                .into_iter()
                .min_by_key(|path| peak(&load, path));
            for source in sources {
                for destination in destinations {
                    routes.tried += 1;
                    let Some(route) = preferred.as_deref().and_then(|path| walk(&graph, path))
                    else {
                        debug!(%source, %destination, "rejected by admission control");
                        routes.rejected += 1;
                        continue;
                    };
                    for arc in route.windows(2) {
                        let count = load.entry((arc[0], arc[1])).or_insert(0);
                        *count += 1;
                        if *count >= limit {
                            Graph::remove_edge(&mut graph, arc[0], arc[1]);
                        }
                    }
                    routes.install(topology, &route, source, destination)?;
                }
            }
        }
    }
    Ok(routes)
}
