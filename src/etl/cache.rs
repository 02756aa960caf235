use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;
use xz::write::XzEncoder;

use crate::cities::slug;
use crate::errors::Result;

pub const CACHE_EXTENSION: &str = "osm.xz";

/// Raw OSM documents keyed by the full place name (city and country
/// suffix), stored xz-compressed.
#[derive(Debug, Clone)]
pub struct OsmCache {
    dir: PathBuf,
}

impl OsmCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        OsmCache { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn output_path(&self, place: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", slug(place), CACHE_EXTENSION))
    }

    pub fn is_cached(&self, place: &str) -> bool {
        self.output_path(place).exists()
    }

    /// Compresses `xml` into the cache. Written to a temporary file first so a
    /// crash never leaves a truncated entry behind.
    pub fn store(&self, place: &str, xml: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.output_path(place);
        let tmp_path = path.with_extension("xz.part");

        let mut encoder = XzEncoder::new(fs::File::create(&tmp_path)?, 6);
        encoder.write_all(xml)?;
        encoder.finish()?.sync_all()?;
        fs::rename(&tmp_path, &path)?;

        info!(place = place, path = path.display().to_string(), bytes = xml.len(); "Cached OSM data");
        Ok(path)
    }

    /// Removes the cached entry; returns whether there was one.
    pub fn clean(&self, place: &str) -> Result<bool> {
        let path = self.output_path(place);
        if path.exists() {
            fs::remove_file(&path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::parse_osm::read_osm_file;

    #[test]
    fn test_store_and_clean() {
        let dir = tempfile::tempdir().unwrap();
        let cache = OsmCache::new(dir.path().join("nested"));
        assert!(!cache.is_cached("Tizi Ouzou"));

        let xml = br#"<osm><node id="7" lat="36.7" lon="4.05"/></osm>"#;
        let path = cache.store("Tizi Ouzou", xml).unwrap();
        assert!(path.ends_with("tizi_ouzou.osm.xz"));
        assert!(cache.is_cached("Tizi Ouzou"));

        let data = read_osm_file(&path).unwrap();
        assert_eq!(data.nodes.len(), 1);

        assert!(cache.clean("Tizi Ouzou").unwrap());
        assert!(!cache.is_cached("Tizi Ouzou"));
        assert!(!cache.clean("Tizi Ouzou").unwrap());
    }
}
