use log::debug;
use petgraph::algo::astar;
use petgraph::visit::EdgeRef;

use crate::data::road::{NodeId, RoadGraph};
use crate::errors::{Error, ErrorKind, Result};

/// Ordered intersections from source to target.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub nodes: Vec<NodeId>,
    /// Metres.
    pub length: f64,
}

impl Route {
    pub fn source(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn target(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    pub fn hops(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.nodes.windows(2).map(|pair| (pair[0], pair[1]))
    }

    /// Street names along the route, consecutive duplicates collapsed.
    pub fn street_names(&self, graph: &RoadGraph) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (from, to) in self.hops() {
            let name = graph.shortest_edge(from, to).and_then(|edge| edge.name.clone());
            if let Some(name) = name {
                if names.last() != Some(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

/// A* weighted by segment length. The heuristic is zero, so the search
/// behaves as uniform-cost search.
pub fn find_path(graph: &RoadGraph, source: NodeId, target: NodeId) -> Result<Route> {
    let not_found = |id: NodeId| {
        Error::new(ErrorKind::NodeNotFound, format!("Node {} is not part of the road graph", id))
    };
    let start = graph.index_of(source).ok_or_else(|| not_found(source))?;
    let goal = graph.index_of(target).ok_or_else(|| not_found(target))?;

    let (length, path) = astar(
        graph.inner(),
        start,
        |n| n == goal,
        |e| e.weight().length,
        |_| 0.0,
    )
    .ok_or_else(|| {
        Error::new(ErrorKind::NoPath, format!("No path between node {} and node {}", source, target))
    })?;

    let nodes: Vec<NodeId> = path.into_iter().map(|idx| graph.inner()[idx].id).collect();
    debug!(source = source.0, target = target.0, hops = nodes.len(), length = length; "Found path");
    Ok(Route { nodes, length })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::road::{MapCoords, RoadEdge, RoadNode};

    fn add_node(graph: &mut RoadGraph, id: u64) {
        graph.add_node(RoadNode { id: NodeId(id), coords: MapCoords::new(36.0, 3.0 + id as f64 * 0.001), name: None });
    }

    fn add_edge(graph: &mut RoadGraph, from: u64, to: u64, length: f64) {
        let edge = RoadEdge { way_id: 1, length, geometry: vec![], name: Some(format!("Road {}", from)), highway: None };
        graph.add_edge(NodeId(from), NodeId(to), edge).unwrap();
    }

    /// 1 -> 2 -> 4 costs 2, 1 -> 3 -> 4 costs 5, 1 -> 4 costs 10; 5 and 6 are an island.
    fn diamond() -> RoadGraph {
        let mut graph = RoadGraph::new();
        for id in 1..=6 {
            add_node(&mut graph, id);
        }
        add_edge(&mut graph, 1, 2, 1.0);
        add_edge(&mut graph, 2, 4, 1.0);
        add_edge(&mut graph, 1, 3, 2.0);
        add_edge(&mut graph, 3, 4, 3.0);
        add_edge(&mut graph, 1, 4, 10.0);
        add_edge(&mut graph, 5, 6, 1.0);
        graph
    }

    #[test]
    fn test_shortest_path() {
        let graph = diamond();
        let route = find_path(&graph, NodeId(1), NodeId(4)).unwrap();
        assert_eq!(route.nodes, vec![NodeId(1), NodeId(2), NodeId(4)]);
        assert_eq!(route.length, 2.0);
        for (from, to) in route.hops() {
            assert!(graph.shortest_edge(from, to).is_some());
        }
        assert_eq!(route.street_names(&graph), vec!["Road 1".to_string(), "Road 2".to_string()]);
    }

    #[test]
    fn test_same_source_and_target() {
        let route = find_path(&diamond(), NodeId(3), NodeId(3)).unwrap();
        assert_eq!(route.nodes, vec![NodeId(3)]);
        assert_eq!(route.length, 0.0);
        assert_eq!(route.source(), route.target());
    }

    #[test]
    fn test_edges_are_directed() {
        let err = find_path(&diamond(), NodeId(4), NodeId(1)).unwrap_err();
        assert!(err.is(ErrorKind::NoPath));
    }

    #[test]
    fn test_disconnected_components() {
        let err = find_path(&diamond(), NodeId(1), NodeId(6)).unwrap_err();
        assert!(err.is(ErrorKind::NoPath));
    }

    #[test]
    fn test_unknown_node() {
        let err = find_path(&diamond(), NodeId(1), NodeId(42)).unwrap_err();
        assert!(err.is(ErrorKind::NodeNotFound));
        let err = find_path(&diamond(), NodeId(42), NodeId(1)).unwrap_err();
        assert!(err.is(ErrorKind::NodeNotFound));
    }

    #[test]
    fn test_parallel_edges_use_cheapest() {
        let mut graph = diamond();
        add_edge(&mut graph, 1, 2, 0.25);
        let route = find_path(&graph, NodeId(1), NodeId(4)).unwrap();
        assert_eq!(route.length, 1.25);
    }
}
