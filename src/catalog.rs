use std::collections::BTreeMap;

use crate::data::road::{NodeId, RoadGraph};

/// Display names for every node of one road graph, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeCatalog {
    labels: BTreeMap<NodeId, String>,
}

pub fn fallback_label(id: NodeId) -> String {
    format!("Unnamed Node {}", id)
}

impl NodeCatalog {
    pub fn build(graph: &RoadGraph) -> NodeCatalog {
        let labels = graph
            .nodes()
            .map(|node| {
                let label = match node.name.as_deref().map(str::trim) {
                    Some(name) if !name.is_empty() => name.to_string(),
                    _ => fallback_label(node.id),
                };
                (node.id, label)
            })
            .collect();
        NodeCatalog { labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (NodeId, &str)> {
        self.labels.iter().map(|(id, label)| (*id, label.as_str()))
    }

    /// Entries whose label or id contains `filter`, ignoring case.
    pub fn matching<'a>(&'a self, filter: &str) -> impl Iterator<Item = (NodeId, &'a str)> + 'a {
        let needle = filter.trim().to_lowercase();
        self.entries().filter(move |(id, label)| {
            needle.is_empty() || label.to_lowercase().contains(&needle) || id.to_string().contains(&needle)
        })
    }
}
