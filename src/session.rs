use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::catalog::NodeCatalog;
use crate::data::road::{NodeId, RoadGraph};
use crate::errors::{Error, ErrorKind, Result};
use crate::render::{MapCanvas, Renderer};
use crate::routing::{find_path, Route};

pub const MISSING_SELECTION_WARNING: &str = "Please select both source and target nodes.";

/// A chosen node, always carried as id and label together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub id: NodeId,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NoCityLoaded,
    Loading,
    CityLoaded,
    PathDisplayed,
}

/// Handed to the background loader; results are accepted only for the
/// latest ticket.
#[derive(Debug, Clone)]
pub struct LoadTicket {
    pub city: String,
    pub generation: u64,
    pub token: CancellationToken,
}

pub struct LoadedCity {
    pub name: String,
    pub graph: RoadGraph,
    pub catalog: NodeCatalog,
}

#[derive(Debug, PartialEq)]
pub enum LoadOutcome {
    Loaded { city: String, nodes: usize },
    Failed { city: String, message: String },
    /// A newer city was selected before this load finished.
    Discarded,
}

pub struct PathOutcome<'a> {
    pub graph: &'a RoadGraph,
    pub route: &'a Route,
    pub canvas: &'a MapCanvas,
    pub source: &'a Selection,
    pub target: &'a Selection,
}

/// Everything the user interface holds: the current city and its graph,
/// the two selections and the rendered map.
pub struct Session {
    renderer: Renderer,
    phase: Phase,
    generation: u64,
    loading: Option<LoadTicket>,
    city: Option<LoadedCity>,
    source: Option<Selection>,
    target: Option<Selection>,
    result: Option<(Route, MapCanvas)>,
}

impl Session {
    pub fn new(renderer: Renderer) -> Session {
        Session {
            renderer,
            phase: Phase::NoCityLoaded,
            generation: 0,
            loading: None,
            city: None,
            source: None,
            target: None,
            result: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn city(&self) -> Option<&LoadedCity> {
        self.city.as_ref()
    }

    pub fn loading_city(&self) -> Option<&str> {
        self.loading.as_ref().map(|ticket| ticket.city.as_str())
    }

    pub fn source(&self) -> Option<&Selection> {
        self.source.as_ref()
    }

    pub fn target(&self) -> Option<&Selection> {
        self.target.as_ref()
    }

    pub fn route(&self) -> Option<&Route> {
        self.result.as_ref().map(|(route, _)| route)
    }

    pub fn canvas(&self) -> Option<&MapCanvas> {
        self.result.as_ref().map(|(_, canvas)| canvas)
    }

    /// Switches to `city`: cancels any load in flight and drops the current
    /// graph, catalog, selections and map.
    pub fn begin_load(&mut self, city: &str) -> LoadTicket {
        if let Some(previous) = self.loading.take() {
            info!(city = previous.city.as_str(), generation = previous.generation; "Cancelling superseded load");
            previous.token.cancel();
        }
        self.generation += 1;
        self.city = None;
        self.source = None;
        self.target = None;
        self.result = None;
        self.phase = Phase::Loading;

        let ticket = LoadTicket {
            city: city.to_string(),
            generation: self.generation,
            token: CancellationToken::new(),
        };
        self.loading = Some(ticket.clone());
        ticket
    }

    pub fn finish_load(&mut self, generation: u64, result: Result<RoadGraph>) -> LoadOutcome {
        let current = matches!(&self.loading, Some(ticket) if ticket.generation == generation);
        if !current {
            info!(generation = generation; "Discarding stale load result");
            return LoadOutcome::Discarded;
        }
        let Some(ticket) = self.loading.take() else {
            return LoadOutcome::Discarded;
        };

        match result {
            Ok(graph) => {
                let catalog = NodeCatalog::build(&graph);
                let nodes = catalog.len();
                self.city = Some(LoadedCity { name: ticket.city.clone(), graph, catalog });
                self.phase = Phase::CityLoaded;
                LoadOutcome::Loaded { city: ticket.city, nodes }
            },
            Err(err) => {
                warn!(city = ticket.city.as_str(), err = err.message.as_str(); "City could not be loaded");
                self.phase = Phase::NoCityLoaded;
                LoadOutcome::Failed { city: ticket.city, message: err.message }
            },
        }
    }

    fn loaded_city(&self) -> Result<&LoadedCity> {
        match self.phase {
            Phase::Loading => Err(Error::new(ErrorKind::InvalidState, "The city is still loading.")),
            _ => self
                .city
                .as_ref()
                .ok_or_else(|| Error::new(ErrorKind::InvalidState, "Select a city first.")),
        }
    }

    fn selection(&self, id: NodeId) -> Result<Selection> {
        let city = self.loaded_city()?;
        let label = city.catalog.label(id).ok_or_else(|| {
            Error::new(ErrorKind::NodeNotFound, format!("Node {} is not in {}", id, city.name))
        })?;
        Ok(Selection { id, label: label.to_string() })
    }

    pub fn select_source(&mut self, id: NodeId) -> Result<&Selection> {
        let selection = self.selection(id)?;
        Ok(&*self.source.insert(selection))
    }

    pub fn select_target(&mut self, id: NodeId) -> Result<&Selection> {
        let selection = self.selection(id)?;
        Ok(&*self.target.insert(selection))
    }

    /// Searches the route between the selections and renders it, replacing
    /// the previous map.
    pub fn find_path(&mut self) -> Result<PathOutcome<'_>> {
        let city = self.loaded_city()?;
        let (Some(source), Some(target)) = (&self.source, &self.target) else {
            return Err(Error::new(ErrorKind::MissingSelection, MISSING_SELECTION_WARNING));
        };

        let route = find_path(&city.graph, source.id, target.id)?;
        let canvas = self.renderer.render(&city.graph, &route)?;
        info!(
            city = city.name.as_str(),
            source = source.id.0,
            target = target.id.0,
            hops = route.nodes.len(),
            length = route.length;
            "Route displayed"
        );

        self.phase = Phase::PathDisplayed;
        let (route, canvas) = self.result.insert((route, canvas));
        match (&self.city, &self.source, &self.target) {
            (Some(city), Some(source), Some(target)) => Ok(PathOutcome {
                graph: &city.graph,
                route,
                canvas,
                source,
                target,
            }),
            _ => Err(Error::new(ErrorKind::InvalidState, "Session changed while rendering")),
        }
    }
}
