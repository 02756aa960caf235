use std::collections::HashMap;

use self::osm::{Node, OsmId, Way};

pub mod osm;
pub mod road;

/// Map data as defined in the .osm file. Relations and metadata are discarded,
/// nodes and ways are kept without any processing.
#[derive(Debug, Default, Clone)]
pub struct OsmMapData {
    pub nodes: HashMap<OsmId, Node>,
    pub ways: Vec<Way>,
}

impl OsmMapData {
    pub fn node(&self, id: OsmId) -> Option<&Node> {
        self.nodes.get(&id)
    }
}
