use std::collections::HashMap;

pub type OsmId = u64;
pub type Tags = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: OsmId,
    pub lon: f64,
    pub lat: f64,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: OsmId,
    pub node_ids: Vec<OsmId>,
    pub tags: Tags,
}

impl Way {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn has_kv_pair(&self, key: &str, value: &str) -> bool {
        self.tag(key)
            .map(|tag_value| tag_value.split(';').any(|tag| tag.trim() == value))
            .unwrap_or(false)
    }
}
