pub mod cache;
pub mod parse_osm;
pub mod provider;

use std::sync::Arc;

use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::cities::place_name;
use crate::data::road::RoadGraph;
use crate::errors::{Error, ErrorKind, Result};

use self::cache::OsmCache;
use self::parse_osm::{parse_osm, read_osm_file};
use self::provider::MapProvider;

const ETL_NAME: &str = "load_city";

enum OsmSource {
    Cached(std::path::PathBuf),
    Fetched(Arc<Vec<u8>>),
}

/// Turns a city name into its road graph: extract (cache or provider),
/// transform (parse and build), load (cache the download once it produced
/// a usable graph).
pub struct CityEtl<P> {
    provider: Arc<P>,
    cache: Option<OsmCache>,
    country_suffix: String,
    retain_all: bool,
}

impl<P: MapProvider> CityEtl<P> {
    pub fn new(provider: Arc<P>, cache: Option<OsmCache>, country_suffix: &str, retain_all: bool) -> Self {
        CityEtl {
            provider,
            cache,
            country_suffix: country_suffix.to_string(),
            retain_all,
        }
    }

    pub fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn place(&self, city: &str) -> String {
        place_name(city, &self.country_suffix)
    }

    pub fn is_cached(&self, city: &str) -> bool {
        self.cache.as_ref().map(|cache| cache.is_cached(&self.place(city))).unwrap_or(false)
    }

    pub fn clean(&self, city: &str) -> Result<bool> {
        match &self.cache {
            Some(cache) => cache.clean(&self.place(city)),
            None => Ok(false),
        }
    }

    async fn extract(&self, city: &str, place: &str, token: &CancellationToken) -> Result<Vec<u8>> {
        info!(etl_name = self.etl_name(), city = city, provider = self.provider.name(), place = place; "Fetching");
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::cancelled()),
            xml = self.provider.fetch(place) => xml,
        }
    }

    fn load(&self, city: &str, place: &str, xml: &[u8]) {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.store(place, xml) {
                warn!(etl_name = self.etl_name(), city = city, err = err.message.as_str(); "Could not cache OSM data");
            }
        }
    }

    async fn transform(&self, city: &str, source: OsmSource, token: &CancellationToken) -> Result<RoadGraph> {
        let retain_all = self.retain_all;
        let task = tokio::task::spawn_blocking(move || {
            let data = match source {
                OsmSource::Cached(path) => read_osm_file(&path)?,
                OsmSource::Fetched(xml) => parse_osm(xml.as_slice())?,
            };
            Ok::<_, Error>(RoadGraph::from_osm(&data, retain_all))
        });
        let graph = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::cancelled()),
            graph = task => graph??,
        };
        if graph.is_empty() {
            return Err(Error::provider(format!("No drivable roads found for {}", city)));
        }
        Ok(graph)
    }

    fn logged<T>(&self, city: &str, stage: &str, result: Result<T>) -> Result<T> {
        match &result {
            Err(err) if err.is(ErrorKind::Cancelled) => {
                info!(etl_name = self.etl_name(), city = city, stage = stage; "Cancelled");
            },
            Err(err) => {
                error!(etl_name = self.etl_name(), city = city, stage = stage, err = err.message.as_str(); "Stage failed with error");
            },
            Ok(_) => (),
        }
        result
    }

    /// Drops a cache entry that no longer parses into a graph, so the city
    /// is fetched again instead of failing on every load.
    fn evict(&self, cache: &OsmCache, city: &str, place: &str, err: &Error) {
        warn!(etl_name = self.etl_name(), city = city, err = err.message.as_str(); "Cached OSM data is unusable");
        if let Err(err) = cache.clean(place) {
            warn!(etl_name = self.etl_name(), city = city, err = err.message.as_str(); "Could not remove cache entry");
        }
    }

    fn finished(&self, city: &str, graph: RoadGraph) -> RoadGraph {
        info!(
            etl_name = self.etl_name(),
            city = city,
            nodes = graph.node_count(),
            edges = graph.edge_count();
            "Process finished"
        );
        graph
    }

    pub async fn process(&self, city: &str, token: &CancellationToken) -> Result<RoadGraph> {
        info!(etl_name = self.etl_name(), city = city; "Starting ETL process");
        let place = self.place(city);

        if let Some(cache) = self.cache.as_ref().filter(|cache| cache.is_cached(&place)) {
            info!(etl_name = self.etl_name(), city = city; "Using cached value");
            match self.transform(city, OsmSource::Cached(cache.output_path(&place)), token).await {
                Ok(graph) => return Ok(self.finished(city, graph)),
                Err(err) if err.is(ErrorKind::Cancelled) => return self.logged(city, "transform", Err(err)),
                Err(err) => self.evict(cache, city, &place, &err),
            }
        }

        info!(etl_name = self.etl_name(), city = city; "Extracting");
        let xml = Arc::new(self.logged(city, "extract", self.extract(city, &place, token).await)?);

        info!(etl_name = self.etl_name(), city = city; "Transforming");
        let source = OsmSource::Fetched(Arc::clone(&xml));
        let graph = self.logged(city, "transform", self.transform(city, source, token).await)?;

        info!(etl_name = self.etl_name(), city = city; "Loading");
        self.load(city, &place, &xml);
        Ok(self.finished(city, graph))
    }
}
