use std::{cmp::Reverse, collections::{HashMap, HashSet}, fmt, str::FromStr};

use log::info;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;

use super::osm::{self, OsmId, Way};
use super::OsmMapData;
use crate::errors::{Error, ErrorKind, Result};

/// Mean earth radius in metres, as used by osmnx for edge lengths.
pub const EARTH_RADIUS_M: f64 = 6_371_009.0;

/// Highway classes that never carry motor traffic.
pub const EXCLUDED_HIGHWAYS: &[&str] = &[
    "abandoned", "bridleway", "bus_guideway", "construction", "corridor", "cycleway",
    "elevator", "escalator", "footway", "no", "path", "pedestrian", "planned", "platform",
    "proposed", "raceway", "razed", "service", "steps", "track",
];

pub const EXCLUDED_SERVICES: &[&str] = &[
    "alley", "driveway", "emergency_access", "parking", "parking_aisle", "private",
];

/// Opaque node identifier assigned by the map provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub OsmId);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse()
            .map(NodeId)
            .map_err(|_| Error::new(ErrorKind::NodeNotFound, format!("'{}' is not a node id", s.trim())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapCoords {
    pub lat: f64,
    pub lon: f64,
}

impl MapCoords {
    pub fn new(lat: f64, lon: f64) -> Self {
        MapCoords { lat, lon }
    }

    /// Great-circle distance in metres.
    pub fn distance_m(&self, other: &MapCoords) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
    }
}

impl From<&osm::Node> for MapCoords {
    fn from(value: &osm::Node) -> Self {
        MapCoords {
            lat: value.lat,
            lon: value.lon,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Bounds {
    fn around(coords: &MapCoords) -> Self {
        Bounds {
            min_lat: coords.lat,
            max_lat: coords.lat,
            min_lon: coords.lon,
            max_lon: coords.lon,
        }
    }

    fn extend(&mut self, coords: &MapCoords) {
        self.min_lat = self.min_lat.min(coords.lat);
        self.max_lat = self.max_lat.max(coords.lat);
        self.min_lon = self.min_lon.min(coords.lon);
        self.max_lon = self.max_lon.max(coords.lon);
    }
}

/// An intersection or dead end of the road network.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadNode {
    pub id: NodeId,
    pub coords: MapCoords,
    pub name: Option<String>,
}

/// A directed road segment between two intersections.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadEdge {
    pub way_id: OsmId,
    /// Metres; the search weight.
    pub length: f64,
    /// Full polyline from source to target, only used for drawing.
    pub geometry: Vec<MapCoords>,
    pub name: Option<String>,
    pub highway: Option<String>,
}

impl RoadEdge {
    fn reversed(&self) -> RoadEdge {
        let mut geometry = self.geometry.clone();
        geometry.reverse();
        RoadEdge {
            geometry,
            ..self.clone()
        }
    }
}

enum Flow {
    Both,
    Forward,
    Backward,
}

impl Flow {
    fn of(way: &Way) -> Flow {
        match way.tag("oneway") {
            Some("yes") | Some("true") | Some("1") => Flow::Forward,
            Some("-1") | Some("reverse") => Flow::Backward,
            Some("no") | Some("false") | Some("0") => Flow::Both,
            _ if way.has_kv_pair("junction", "roundabout") => Flow::Forward,
            _ => Flow::Both,
        }
    }
}

/// Whether a way belongs to the drivable network.
pub fn is_drivable(way: &Way) -> bool {
    let Some(highway) = way.tag("highway") else {
        return false;
    };
    let excluded_service = way
        .tag("service")
        .map(|service| EXCLUDED_SERVICES.contains(&service))
        .unwrap_or(false);

    !EXCLUDED_HIGHWAYS.contains(&highway)
        && !excluded_service
        && !way.has_kv_pair("area", "yes")
        && !way.has_kv_pair("motor_vehicle", "no")
        && !way.has_kv_pair("motorcar", "no")
        && !way.has_kv_pair("access", "private")
}

/// Directed road network of one city. Parallel edges are allowed.
#[derive(Debug, Default, Clone)]
pub struct RoadGraph {
    graph: DiGraph<RoadNode, RoadEdge>,
    index: HashMap<NodeId, NodeIndex>,
}

impl RoadGraph {
    pub fn new() -> Self {
        RoadGraph::default()
    }

    /// Adds a node, or returns the existing index when the id is already present.
    pub fn add_node(&mut self, node: RoadNode) -> NodeIndex {
        if let Some(idx) = self.index.get(&node.id) {
            return *idx;
        }
        let id = node.id;
        let idx = self.graph.add_node(node);
        self.index.insert(id, idx);
        idx
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId, edge: RoadEdge) -> Result<()> {
        let from_idx = self.require(from)?;
        let to_idx = self.require(to)?;
        self.graph.add_edge(from_idx, to_idx, edge);
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&RoadNode> {
        self.index.get(&id).map(|idx| &self.graph[*idx])
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RoadNode> {
        self.graph.node_weights()
    }

    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId, &RoadEdge)> {
        self.graph.edge_references().map(|edge| {
            (self.graph[edge.source()].id, self.graph[edge.target()].id, edge.weight())
        })
    }

    /// The cheapest of the (possibly parallel) edges from `from` to `to`.
    pub fn shortest_edge(&self, from: NodeId, to: NodeId) -> Option<&RoadEdge> {
        let from_idx = *self.index.get(&from)?;
        let to_idx = *self.index.get(&to)?;
        self.graph
            .edges_connecting(from_idx, to_idx)
            .map(|edge| edge.weight())
            .min_by(|a, b| a.length.total_cmp(&b.length))
    }

    pub fn bounds(&self) -> Option<Bounds> {
        let mut coords = self
            .graph
            .node_weights()
            .map(|node| &node.coords)
            .chain(self.graph.edge_weights().flat_map(|edge| edge.geometry.iter()));
        let mut bounds = Bounds::around(coords.next()?);
        for c in coords {
            bounds.extend(c);
        }
        Some(bounds)
    }

    pub(crate) fn inner(&self) -> &DiGraph<RoadNode, RoadEdge> {
        &self.graph
    }

    pub(crate) fn index_of(&self, id: NodeId) -> Option<NodeIndex> {
        self.index.get(&id).copied()
    }

    fn require(&self, id: NodeId) -> Result<NodeIndex> {
        self.index_of(id).ok_or_else(|| {
            Error::new(ErrorKind::NodeNotFound, format!("Node {} is not part of the road graph", id))
        })
    }

    /// Builds the simplified drivable network: way endpoints and shared nodes
    /// become graph nodes, every other way node ends up in edge geometry.
    pub fn from_osm(data: &OsmMapData, retain_all: bool) -> RoadGraph {
        let resolved: Vec<(&Way, Vec<&osm::Node>)> = data
            .ways
            .iter()
            .filter(|way| is_drivable(way))
            .map(|way| (way, way.node_ids.iter().filter_map(|id| data.node(*id)).collect::<Vec<_>>()))
            .filter(|(_, nodes)| nodes.len() >= 2)
            .collect();

        let mut usage: HashMap<OsmId, usize> = HashMap::new();
        let mut endpoints: HashSet<OsmId> = HashSet::new();
        for (_, nodes) in &resolved {
            endpoints.insert(nodes[0].id);
            endpoints.insert(nodes[nodes.len() - 1].id);
            for node in nodes {
                *usage.entry(node.id).or_default() += 1;
            }
        }
        let is_junction = |id: OsmId| endpoints.contains(&id) || usage.get(&id).copied().unwrap_or(0) > 1;

        let mut graph = RoadGraph::new();
        for (way, nodes) in &resolved {
            let flow = Flow::of(way);
            let mut start = 0;
            for i in 1..nodes.len() {
                if i == nodes.len() - 1 || is_junction(nodes[i].id) {
                    graph.add_segment(way, &nodes[start..=i], &flow);
                    start = i;
                }
            }
        }

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            ways = resolved.len();
            "Built road graph"
        );

        if retain_all {
            graph
        } else {
            graph.retain_largest_component()
        }
    }

    fn add_segment(&mut self, way: &Way, nodes: &[&osm::Node], flow: &Flow) {
        let geometry: Vec<MapCoords> = nodes.iter().map(|node| MapCoords::from(*node)).collect();
        let length = geometry.windows(2).map(|pair| pair[0].distance_m(&pair[1])).sum();
        let first = nodes[0];
        let last = nodes[nodes.len() - 1];

        let from = self.add_node(Self::road_node(first));
        let to = self.add_node(Self::road_node(last));
        let edge = RoadEdge {
            way_id: way.id,
            length,
            geometry,
            name: way.tag("name").map(str::to_string),
            highway: way.tag("highway").map(str::to_string),
        };

        match flow {
            Flow::Forward => {
                self.graph.add_edge(from, to, edge);
            },
            Flow::Backward => {
                self.graph.add_edge(to, from, edge.reversed());
            },
            Flow::Both => {
                self.graph.add_edge(to, from, edge.reversed());
                self.graph.add_edge(from, to, edge);
            },
        }
    }

    fn road_node(node: &osm::Node) -> RoadNode {
        RoadNode {
            id: NodeId(node.id),
            coords: node.into(),
            name: node.tags.get("name").cloned(),
        }
    }

    /// Keeps only the largest weakly connected component.
    pub fn retain_largest_component(self) -> RoadGraph {
        if self.graph.node_count() == 0 {
            return self;
        }
        let mut components = UnionFind::<usize>::new(self.graph.node_count());
        for edge in self.graph.edge_references() {
            components.union(edge.source().index(), edge.target().index());
        }
        let labels = components.into_labeling();

        let mut sizes: HashMap<usize, usize> = HashMap::new();
        for label in &labels {
            *sizes.entry(*label).or_default() += 1;
        }
        let Some((largest, _)) = sizes
            .iter()
            .max_by_key(|(label, size)| (**size, Reverse(**label)))
            .map(|(label, size)| (*label, *size))
        else {
            return self;
        };
        if sizes.len() == 1 {
            return self;
        }

        let graph = self.graph.filter_map(
            |idx, node| (labels[idx.index()] == largest).then(|| node.clone()),
            |_, edge| Some(edge.clone()),
        );
        let index = graph
            .node_indices()
            .map(|idx| (graph[idx].id, idx))
            .collect();

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            components = sizes.len();
            "Kept largest connected component"
        );
        RoadGraph { graph, index }
    }
}
