use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;
use xz::read::XzDecoder;

use crate::cities::slug;
use crate::config::AppConfig;
use crate::data::road::{EXCLUDED_HIGHWAYS, EXCLUDED_SERVICES};
use crate::errors::{Error, Result};

/// Nominatim relation ids map onto Overpass area ids with this offset.
const RELATION_AREA_OFFSET: u64 = 3_600_000_000;

/// Source of raw OSM XML for a free-text place name.
pub trait MapProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the OSM XML document with the drivable ways of `place` and
    /// their nodes.
    fn fetch(&self, place: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaceArea {
    /// Overpass area id of a boundary relation.
    Area(u64),
    BoundingBox {
        south: f64,
        west: f64,
        north: f64,
        east: f64,
    },
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    osm_type: Option<String>,
    osm_id: Option<u64>,
    #[serde(default)]
    boundingbox: Vec<String>,
    display_name: Option<String>,
}

impl NominatimPlace {
    fn relation_area(&self) -> Option<PlaceArea> {
        match (self.osm_type.as_deref(), self.osm_id) {
            (Some("relation"), Some(id)) => Some(PlaceArea::Area(RELATION_AREA_OFFSET + id)),
            _ => None,
        }
    }

    fn bounding_box(&self) -> Option<PlaceArea> {
        let coords: Vec<f64> = self
            .boundingbox
            .iter()
            .filter_map(|value| value.parse().ok())
            .collect();
        // Nominatim order: south, north, west, east
        match coords[..] {
            [south, north, west, east] => Some(PlaceArea::BoundingBox { south, west, north, east }),
            _ => None,
        }
    }
}

/// Uses the top result. A later boundary relation is only taken when it
/// describes the same place, otherwise the top result's bounding box is used.
fn choose_area(places: &[NominatimPlace]) -> Option<PlaceArea> {
    let top = places.first()?;
    top.relation_area()
        .or_else(|| {
            places[1..]
                .iter()
                .filter(|place| place.display_name.is_some() && place.display_name == top.display_name)
                .find_map(NominatimPlace::relation_area)
        })
        .or_else(|| top.bounding_box())
}

/// Overpass QL selecting the drivable network, mirroring the local drive filter.
pub fn overpass_query(area: &PlaceArea, timeout_secs: u64) -> String {
    let filter = format!(
        r#"["highway"]["area"!~"yes"]["highway"!~"{}"]["motor_vehicle"!~"no"]["motorcar"!~"no"]["access"!~"private"]["service"!~"{}"]"#,
        EXCLUDED_HIGHWAYS.join("|"),
        EXCLUDED_SERVICES.join("|"),
    );
    let (area_clause, selector) = match area {
        PlaceArea::Area(id) => (format!("area(id:{})->.searchArea;\n", id), "area.searchArea".to_string()),
        PlaceArea::BoundingBox { south, west, north, east } => {
            (String::new(), format!("{},{},{},{}", south, west, north, east))
        },
    };
    format!(
        "[out:xml][timeout:{}];\n{}(way{}({}););\n(._;>;);\nout body;",
        timeout_secs, area_clause, filter, selector
    )
}

/// Geocodes with Nominatim and downloads the network from Overpass.
pub struct OverpassProvider {
    client: reqwest::Client,
    nominatim_url: String,
    overpass_url: String,
    timeout_secs: u64,
}

impl OverpassProvider {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(OverpassProvider {
            client,
            nominatim_url: config.nominatim_url.clone(),
            overpass_url: config.overpass_url.clone(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    pub async fn geocode(&self, place: &str) -> Result<PlaceArea> {
        let places: Vec<NominatimPlace> = self
            .client
            .get(&self.nominatim_url)
            .query(&[("q", place), ("format", "json"), ("limit", "5")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let area = choose_area(&places)
            .ok_or_else(|| Error::provider(format!("Could not resolve place '{}'", place)))?;
        info!(
            place = place,
            resolved = places.first().and_then(|p| p.display_name.as_deref()).unwrap_or("");
            "Geocoded place"
        );
        Ok(area)
    }
}

impl MapProvider for OverpassProvider {
    fn name(&self) -> &str {
        "overpass"
    }

    async fn fetch(&self, place: &str) -> Result<Vec<u8>> {
        let area = self.geocode(place).await?;
        let query = overpass_query(&area, self.timeout_secs);
        debug!(query = query.as_str(); "Overpass query");

        let response = self
            .client
            .post(&self.overpass_url)
            .header("Content-Type", "text/plain")
            .body(query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::provider(format!(
                "Overpass API returned status {}",
                response.status()
            )));
        }
        let body = response.bytes().await?;
        info!(place = place, bytes = body.len(); "Downloaded road network");
        Ok(body.to_vec())
    }
}

/// Serves `<slug>.osm` or `<slug>.osm.xz` files from a directory. The slug is
/// taken from the full place name first, then from the part before the comma.
pub struct FileProvider {
    dir: PathBuf,
}

impl FileProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileProvider { dir: dir.into() }
    }

    fn candidates(&self, place: &str) -> Vec<PathBuf> {
        let mut slugs = vec![slug(place)];
        if let Some((city, _)) = place.split_once(',') {
            slugs.push(slug(city));
        }
        slugs
            .iter()
            .flat_map(|s| [format!("{}.osm.xz", s), format!("{}.osm", s)])
            .map(|file_name| self.dir.join(file_name))
            .collect()
    }

    fn read(path: &Path, bytes: Vec<u8>) -> Result<Vec<u8>> {
        if path.extension().map(|ext| ext == "xz").unwrap_or(false) {
            let mut xml = Vec::new();
            XzDecoder::new(bytes.as_slice()).read_to_end(&mut xml)?;
            Ok(xml)
        } else {
            Ok(bytes)
        }
    }
}

impl MapProvider for FileProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch(&self, place: &str) -> Result<Vec<u8>> {
        for path in self.candidates(place) {
            if tokio::fs::try_exists(&path).await? {
                let bytes = tokio::fs::read(&path).await?;
                info!(place = place, path = path.display().to_string(); "Read offline map");
                return Self::read(&path, bytes);
            }
        }
        Err(Error::provider(format!(
            "No offline map for '{}' in {}",
            place,
            self.dir.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(osm_type: &str, osm_id: u64, bbox: &[&str], display_name: &str) -> NominatimPlace {
        NominatimPlace {
            osm_type: Some(osm_type.to_string()),
            osm_id: Some(osm_id),
            boundingbox: bbox.iter().map(|s| s.to_string()).collect(),
            display_name: Some(display_name.to_string()),
        }
    }

    #[test]
    fn test_choose_area_uses_relation_of_same_place() {
        let places = vec![
            place("node", 1, &["36.7", "36.8", "3.0", "3.1"], "Oran, Algérie"),
            place("relation", 1_234, &[], "Oran, Algérie"),
        ];
        assert_eq!(choose_area(&places), Some(PlaceArea::Area(3_600_001_234)));
    }

    #[test]
    fn test_choose_area_ignores_other_places() {
        let places = vec![
            place("node", 1, &["35.6", "35.8", "-0.7", "-0.5"], "Oran, Algérie"),
            place("relation", 1_234, &["35.0", "36.0", "-1.0", "0.0"], "Wilaya d'Oran, Algérie"),
        ];
        assert_eq!(
            choose_area(&places),
            Some(PlaceArea::BoundingBox { south: 35.6, west: -0.7, north: 35.8, east: -0.5 })
        );
    }

    #[test]
    fn test_choose_area_falls_back_to_bbox() {
        let places = vec![place("node", 1, &["36.7", "36.8", "3.0", "3.1"], "Alger")];
        assert_eq!(
            choose_area(&places),
            Some(PlaceArea::BoundingBox { south: 36.7, west: 3.0, north: 36.8, east: 3.1 })
        );
        assert_eq!(choose_area(&[]), None);
    }

    #[test]
    fn test_nominatim_payload() {
        let json = r#"[{"place_id": 9, "osm_type": "relation", "osm_id": 42,
            "boundingbox": ["36.6", "36.8", "2.9", "3.2"], "display_name": "Alger, Algérie"}]"#;
        let places: Vec<NominatimPlace> = serde_json::from_str(json).unwrap();
        assert_eq!(choose_area(&places), Some(PlaceArea::Area(3_600_000_042)));
    }

    #[test]
    fn test_overpass_query() {
        let query = overpass_query(&PlaceArea::Area(3_600_000_042), 180);
        assert!(query.starts_with("[out:xml][timeout:180];"));
        assert!(query.contains("area(id:3600000042)->.searchArea;"));
        assert!(query.contains("(area.searchArea)"));
        assert!(query.contains(r#"["highway"!~"abandoned|bridleway|"#));
        assert!(query.ends_with("out body;"));

        let bbox = overpass_query(&PlaceArea::BoundingBox { south: 1.0, west: 2.0, north: 3.0, east: 4.0 }, 60);
        assert!(bbox.contains("(1,2,3,4)"));
        assert!(!bbox.contains("searchArea"));
    }

    #[tokio::test]
    async fn test_file_provider_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("oran.osm"), b"<osm/>").unwrap();
        let provider = FileProvider::new(dir.path());

        assert_eq!(provider.fetch("Oran, Algeria").await.unwrap(), b"<osm/>");
        assert!(provider.fetch("Blida, Algeria").await.is_err());
    }

    #[tokio::test]
    async fn test_file_provider_reads_xz() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let file = std::fs::File::create(dir.path().join("setif.osm.xz")).unwrap();
        let mut encoder = xz::write::XzEncoder::new(file, 6);
        encoder.write_all(b"<osm></osm>").unwrap();
        encoder.finish().unwrap();

        let provider = FileProvider::new(dir.path());
        assert_eq!(provider.fetch("Setif, Algeria").await.unwrap(), b"<osm></osm>");
    }
}
