//! Adjacency graph over integer vertices.
//!
//! Controllers keep the switch-to-switch topology in an [Undirected] graph and route on a
//! [Directed] copy (each undirected edge becomes two opposing arcs, so capacity can be
//! consumed per direction).

use petgraph::{
    algo::{astar, dijkstra},
    graphmap::{DiGraphMap, GraphMap, UnGraphMap},
    Direction, EdgeType,
};
use std::collections::BTreeMap;

pub type Undirected = UnGraphMap<usize, ()>;
pub type Directed = DiGraphMap<usize, ()>;

/// Hop counts from every vertex to every vertex it can reach.
pub type Distances = BTreeMap<usize, BTreeMap<usize, usize>>;

/// Operations consumed by path computation.
pub trait Graph {
    /// Add `vertex` (no-op if present).
    fn add_vertex(&mut self, vertex: usize);

    /// Add an edge, returning `false` if it already existed.
    fn add_edge(&mut self, a: usize, b: usize) -> bool;

    /// Remove an edge, returning `false` if it did not exist.
    fn remove_edge(&mut self, a: usize, b: usize) -> bool;

    fn has_edge(&self, a: usize, b: usize) -> bool;

    /// One shortest (fewest hops) path from `from` to `to`, both ends included.
    ///
    /// Ties between equal-length paths are broken deterministically but arbitrarily.
    fn shortest_path(&self, from: usize, to: usize) -> Option<Vec<usize>>;

    /// Every shortest path from `from` to `to`.
    fn all_shortest_paths(&self, from: usize, to: usize) -> Vec<Vec<usize>>;

    /// Full distance matrix (unreachable pairs are absent).
    fn distances(&self) -> Distances;
}

impl<Ty: EdgeType> Graph for GraphMap<usize, (), Ty> {
    fn add_vertex(&mut self, vertex: usize) {
        self.add_node(vertex);
    }

    fn add_edge(&mut self, a: usize, b: usize) -> bool {
        GraphMap::add_edge(self, a, b, ()).is_none()
    }

    fn remove_edge(&mut self, a: usize, b: usize) -> bool {
        GraphMap::remove_edge(self, a, b).is_some()
    }

    fn has_edge(&self, a: usize, b: usize) -> bool {
        self.contains_edge(a, b)
    }

    fn shortest_path(&self, from: usize, to: usize) -> Option<Vec<usize>> {
        if !self.contains_node(from) || !self.contains_node(to) {
            return None;
        }
        astar(self, from, |vertex| vertex == to, |_| 1usize, |_| 0).map(|(_, path)| path)
    }

    fn all_shortest_paths(&self, from: usize, to: usize) -> Vec<Vec<usize>> {
        if !self.contains_node(from) || !self.contains_node(to) {
            return Vec::new();
        }
        let distance = dijkstra(self, from, None, |_| 1usize);
        if !distance.contains_key(&to) {
            return Vec::new();
        }

        // Walk back from the destination over arcs that lie on some shortest path
        let mut paths = Vec::new();
        let mut stack = vec![vec![to]];
        while let Some(partial) = stack.pop() {
            let head = partial[partial.len() - 1];
            if head == from {
                let mut path = partial;
                path.reverse();
                paths.push(path);
                continue;
            }
            let Some(&hops) = distance.get(&head) else {
                continue;
            };
            for previous in self.neighbors_directed(head, Direction::Incoming) {
                if distance.get(&previous).is_some_and(|&d| d + 1 == hops) {
                    let mut extended = partial.clone();
                    extended.push(previous);
                    stack.push(extended);
                }
            }
        }
        paths.sort();
        paths
    }

    fn distances(&self) -> Distances {
        self.nodes()
            .map(|source| {
                let reached = dijkstra(self, source, None, |_| 1usize);
                (source, reached.into_iter().collect())
            })
            .collect()
    }
}

/// Directed copy of `graph` with an arc in each direction per edge.
pub fn to_directed(graph: &Undirected) -> Directed {
    let mut directed = Directed::new();
    for vertex in graph.nodes() {
        directed.add_node(vertex);
    }
    for (a, b, _) in graph.all_edges() {
        directed.add_edge(a, b, ());
        directed.add_edge(b, a, ());
    }
    directed
}

/// Largest finite distance between any two of `among`.
pub fn diameter(distances: &Distances, among: &[usize]) -> usize {
    among
        .iter()
        .filter_map(|source| distances.get(source))
        .flat_map(|reached| among.iter().filter_map(|target| reached.get(target)))
        .copied()
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 0 - 1 - 2 - 3 with a detour 0 - 4 - 5 - 3 and an isolated 6.
    fn square() -> Undirected {
        let mut graph = Undirected::new();
        for vertex in 0..7 {
            graph.add_vertex(vertex);
        }
        for (a, b) in [(0, 1), (1, 2), (2, 3), (0, 4), (4, 5), (5, 3)] {
            assert!(Graph::add_edge(&mut graph, a, b));
        }
        graph
    }

    #[test]
    fn test_add_remove_edge() {
        let mut graph = square();
        assert!(!Graph::add_edge(&mut graph, 1, 0));
        assert!(graph.has_edge(1, 0));
        assert!(Graph::remove_edge(&mut graph, 1, 0));
        assert!(!Graph::remove_edge(&mut graph, 0, 1));
        assert!(!graph.has_edge(0, 1));
    }

    #[test]
    fn test_shortest_path() {
        let mut graph = square();
        assert_eq!(graph.shortest_path(0, 2), Some(vec![0, 1, 2]));
        assert_eq!(graph.shortest_path(0, 0), Some(vec![0]));
        assert_eq!(graph.shortest_path(0, 6), None);
        assert_eq!(graph.shortest_path(0, 9), None);

        // Removing an edge forces the detour
        Graph::remove_edge(&mut graph, 1, 2);
        assert_eq!(graph.shortest_path(0, 2), Some(vec![0, 4, 5, 3, 2]));
    }

    #[test]
    fn test_all_shortest_paths() {
        let graph = square();
        assert_eq!(
            graph.all_shortest_paths(0, 3),
            vec![vec![0, 1, 2, 3], vec![0, 4, 5, 3]]
        );
        assert_eq!(graph.all_shortest_paths(0, 1), vec![vec![0, 1]]);
        assert!(graph.all_shortest_paths(0, 6).is_empty());
    }

    #[test]
    fn test_distances() {
        let graph = square();
        let distances = graph.distances();
        assert_eq!(distances[&0][&3], 3);
        assert_eq!(distances[&2][&4], 3);
        assert_eq!(distances[&6].len(), 1);
        assert!(!distances[&0].contains_key(&6));
        assert_eq!(diameter(&distances, &[0, 2, 5]), 2);
        assert_eq!(diameter(&distances, &[1, 5]), 3);
        assert_eq!(diameter(&distances, &[0, 6]), 0);
    }

    #[test]
    fn test_directed_copy() {
        let graph = square();
        let mut directed = to_directed(&graph);
        assert!(directed.has_edge(1, 0) && directed.has_edge(0, 1));

        // Removing one direction leaves the other usable
        Graph::remove_edge(&mut directed, 1, 2);
        assert_eq!(directed.shortest_path(2, 0), Some(vec![2, 1, 0]));
        assert_eq!(directed.shortest_path(0, 2), Some(vec![0, 4, 5, 3, 2]));
    }
}
