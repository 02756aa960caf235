use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{info, warn};
use png::{BitDepth, ColorType};
use raqote::{DrawOptions, DrawTarget, LineCap, LineJoin, PathBuilder, Point, SolidSource, Source, StrokeStyle};

use crate::catalog::fallback_label;
use crate::config::{AppConfig, Theme};
use crate::data::osm::OsmId;
use crate::data::road::{Bounds, MapCoords, NodeId, RoadGraph};
use crate::errors::Result;
use crate::routing::Route;

mod fk {
    pub use font_kit::family_name::FamilyName;
    pub use font_kit::font::Font;
    pub use font_kit::properties::Properties;
    pub use font_kit::source::SystemSource;
    pub use pathfinder_geometry::vector::vec2f;
}

const LABEL_POINT_SIZE: f32 = 18.0;

/// Maps lon/lat onto canvas pixels, keeping the aspect ratio of the area
/// (equirectangular, scaled by the cosine of the middle latitude).
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    min_lon: f64,
    max_lat: f64,
    px_per_deg_lon: f64,
    px_per_deg_lat: f64,
    offset_x: f64,
    offset_y: f64,
}

impl Projection {
    pub fn fit(bounds: &Bounds, width_px: u32, height_px: u32, padding_px: u32) -> Projection {
        let avail_w = width_px.saturating_sub(padding_px.saturating_mul(2)).max(1) as f64;
        let avail_h = height_px.saturating_sub(padding_px.saturating_mul(2)).max(1) as f64;
        let mid_lat = (bounds.min_lat + bounds.max_lat) / 2.0;
        let kx = mid_lat.to_radians().cos().max(1e-6);

        let world_w = (bounds.max_lon - bounds.min_lon) * kx;
        let world_h = bounds.max_lat - bounds.min_lat;
        let scale = match (world_w > 0.0, world_h > 0.0) {
            (true, true) => (avail_w / world_w).min(avail_h / world_h),
            (true, false) => avail_w / world_w,
            (false, true) => avail_h / world_h,
            (false, false) => 1.0,
        };

        Projection {
            min_lon: bounds.min_lon,
            max_lat: bounds.max_lat,
            px_per_deg_lon: scale * kx,
            px_per_deg_lat: scale,
            offset_x: padding_px as f64 + (avail_w - world_w * scale) / 2.0,
            offset_y: padding_px as f64 + (avail_h - world_h * scale) / 2.0,
        }
    }

    pub fn project(&self, coords: &MapCoords) -> (f32, f32) {
        let x = self.offset_x + (coords.lon - self.min_lon) * self.px_per_deg_lon;
        let y = self.offset_y + (self.max_lat - coords.lat) * self.px_per_deg_lat;
        (x as f32, y as f32)
    }
}

/// The one drawing surface of a session. A new render replaces it.
pub struct MapCanvas {
    dt: DrawTarget,
}

impl MapCanvas {
    pub fn width(&self) -> i32 {
        self.dt.width()
    }

    pub fn height(&self) -> i32 {
        self.dt.height()
    }

    /// Premultiplied ARGB value of a pixel.
    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        if x < 0 || y < 0 || x >= self.width() || y >= self.height() {
            return None;
        }
        self.dt.get_data().get((y * self.width() + x) as usize).copied()
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut rgba = Vec::with_capacity(self.dt.get_data().len() * 4);
        for px in self.dt.get_data() {
            rgba.extend_from_slice(&unpremultiply(*px));
        }

        let mut buf = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut buf, self.width().try_into()?, self.height().try_into()?);
            encoder.set_color(ColorType::Rgba);
            encoder.set_depth(BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&rgba)?;
            writer.finish()?;
        }
        Ok(buf)
    }

    /// Writes the PNG next to `path` and renames it over the previous image.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.encode_png()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file_name = path
            .file_name()
            .ok_or("Output path has no file name")?
            .to_string_lossy();
        let tmp_path = path.with_file_name(format!(".{}.part", file_name));
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, path)?;
        info!(path = path.display().to_string(), bytes = bytes.len(); "Wrote map image");
        Ok(())
    }
}

fn unpremultiply(px: u32) -> [u8; 4] {
    let a = (px >> 24) & 0xff;
    if a == 0 {
        return [0, 0, 0, 0];
    }
    let channel = |shift: u32| (((px >> shift) & 0xff) * 255 + a / 2) / a;
    [channel(16).min(255) as u8, channel(8).min(255) as u8, channel(0).min(255) as u8, a as u8]
}

pub struct Renderer {
    width_px: u32,
    height_px: u32,
    padding_px: u32,
    road_width: f32,
    route_width: f32,
    theme: Theme,
    font: Option<fk::Font>,
}

impl Renderer {
    pub fn new(config: &AppConfig) -> Renderer {
        let font = if config.draw_labels {
            match Self::load_font(config.font_path.as_deref()) {
                Ok(font) => Some(font),
                Err(err) => {
                    warn!(err = err.message.as_str(); "No font available, labels disabled");
                    None
                },
            }
        } else {
            None
        };
        Renderer::with_font(config, font)
    }

    /// A renderer that never draws text.
    pub fn without_labels(config: &AppConfig) -> Renderer {
        Renderer::with_font(config, None)
    }

    fn with_font(config: &AppConfig, font: Option<fk::Font>) -> Renderer {
        Renderer {
            width_px: config.width_px.max(1),
            height_px: config.height_px.max(1),
            padding_px: config.padding_px,
            road_width: config.road_width,
            route_width: config.route_width,
            theme: config.theme,
            font,
        }
    }

    fn load_font(path: Option<&Path>) -> Result<fk::Font> {
        match path {
            Some(path) => Ok(fk::Font::from_path(path, 0)?),
            None => {
                let handle = fk::SystemSource::new()
                    .select_best_match(&[fk::FamilyName::SansSerif], &fk::Properties::new())?;
                Ok(handle.load()?)
            },
        }
    }

    pub fn projection(&self, graph: &RoadGraph) -> Option<Projection> {
        graph
            .bounds()
            .map(|bounds| Projection::fit(&bounds, self.width_px, self.height_px, self.padding_px))
    }

    fn stroke(width: f32) -> StrokeStyle {
        StrokeStyle {
            cap: LineCap::Round,
            join: LineJoin::Round,
            width,
            miter_limit: 2.0,
            dash_array: Vec::new(),
            dash_offset: 0.0,
        }
    }

    fn add_polyline(pb: &mut PathBuilder, projection: &Projection, coords: &[MapCoords]) {
        if coords.len() < 2 {
            return;
        }
        let (x0, y0) = projection.project(&coords[0]);
        pb.move_to(x0, y0);
        for c in &coords[1..] {
            let (x, y) = projection.project(c);
            pb.line_to(x, y);
        }
    }

    /// Edge geometry, or the straight line between its endpoints.
    fn hop_geometry(graph: &RoadGraph, from: NodeId, to: NodeId) -> Vec<MapCoords> {
        match graph.shortest_edge(from, to) {
            Some(edge) if edge.geometry.len() >= 2 => edge.geometry.clone(),
            _ => [from, to]
                .iter()
                .filter_map(|id| graph.node(*id).map(|node| node.coords))
                .collect(),
        }
    }

    fn draw_roads(&self, dt: &mut DrawTarget, graph: &RoadGraph, projection: &Projection) {
        // Two-way segments appear once per direction with reversed geometry.
        let mut drawn: HashSet<(OsmId, Vec<(u64, u64)>)> = HashSet::new();
        let mut pb = PathBuilder::new();
        for (from, to, edge) in graph.edges() {
            let geometry = if edge.geometry.len() >= 2 {
                edge.geometry.clone()
            } else {
                Self::hop_geometry(graph, from, to)
            };
            let forward: Vec<(u64, u64)> = geometry.iter().map(|c| (c.lat.to_bits(), c.lon.to_bits())).collect();
            let backward: Vec<(u64, u64)> = forward.iter().rev().copied().collect();
            if !drawn.insert((edge.way_id, forward.min(backward))) {
                continue;
            }
            Self::add_polyline(&mut pb, projection, &geometry);
        }
        dt.stroke(
            &pb.finish(),
            &Source::Solid(self.theme.road_color),
            &Self::stroke(self.road_width),
            &DrawOptions::new(),
        );
    }

    fn draw_route(&self, dt: &mut DrawTarget, graph: &RoadGraph, route: &Route, projection: &Projection) {
        let mut pb = PathBuilder::new();
        for (from, to) in route.hops() {
            Self::add_polyline(&mut pb, projection, &Self::hop_geometry(graph, from, to));
        }
        dt.stroke(
            &pb.finish(),
            &Source::Solid(self.theme.route_color),
            &Self::stroke(self.route_width),
            &DrawOptions::new(),
        );
    }

    fn draw_endpoint(&self, dt: &mut DrawTarget, graph: &RoadGraph, id: NodeId, projection: &Projection) {
        let Some(node) = graph.node(id) else {
            return;
        };
        let (x, y) = projection.project(&node.coords);
        let radius = (self.route_width * 1.5).max(3.0);

        let mut pb = PathBuilder::new();
        pb.arc(x, y, radius, 0.0, 2.0 * std::f32::consts::PI);
        pb.close();
        dt.fill(&pb.finish(), &Source::Solid(self.theme.endpoint_color), &DrawOptions::new());

        if let Some(font) = &self.font {
            let label = node.name.clone().unwrap_or_else(|| fallback_label(id));
            Self::draw_text(dt, font, self.theme.text_color, x + radius + 4.0, y - radius, &label);
        }
    }

    fn draw_text(dt: &mut DrawTarget, font: &fk::Font, color: SolidSource, x: f32, y: f32, text: &str) {
        let units_per_em = font.metrics().units_per_em as f32;
        let mut start = fk::vec2f(x, y);
        let mut ids = Vec::new();
        let mut positions = Vec::new();
        for c in text.chars() {
            let Some(id) = font.glyph_for_char(c) else {
                continue;
            };
            ids.push(id);
            positions.push(Point::new(start.x(), start.y()));
            if let Ok(advance) = font.advance(id) {
                start += advance * (LABEL_POINT_SIZE / units_per_em);
            }
        }
        dt.draw_glyphs(font, LABEL_POINT_SIZE, &ids, &positions, &Source::Solid(color), &DrawOptions::new());
    }

    /// Draws every road, then the route on top, then both route ends.
    pub fn render(&self, graph: &RoadGraph, route: &Route) -> Result<MapCanvas> {
        let projection = self
            .projection(graph)
            .ok_or("Cannot draw an empty road graph")?;
        let mut dt = DrawTarget::new(self.width_px.try_into()?, self.height_px.try_into()?);
        dt.clear(self.theme.background);

        self.draw_roads(&mut dt, graph, &projection);
        self.draw_route(&mut dt, graph, route, &projection);
        self.draw_endpoint(&mut dt, graph, route.source(), &projection);
        if route.target() != route.source() {
            self.draw_endpoint(&mut dt, graph, route.target(), &projection);
        }

        Ok(MapCanvas { dt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::road::{RoadEdge, RoadNode};

    fn config() -> AppConfig {
        AppConfig {
            width_px: 200,
            height_px: 100,
            padding_px: 10,
            draw_labels: false,
            ..AppConfig::default()
        }
    }

    /// Three nodes on one parallel; the route covers the western half.
    fn line_graph() -> RoadGraph {
        let mut graph = RoadGraph::new();
        for (id, lon) in [(1, 3.00), (2, 3.01), (3, 3.02)] {
            graph.add_node(RoadNode { id: NodeId(id), coords: MapCoords::new(36.0, lon), name: None });
        }
        for (from, to) in [(1, 2), (2, 3)] {
            let geometry = vec![graph.node(NodeId(from)).unwrap().coords, graph.node(NodeId(to)).unwrap().coords];
            let length = geometry[0].distance_m(&geometry[1]);
            let edge = RoadEdge { way_id: from, length, geometry, name: None, highway: None };
            graph.add_edge(NodeId(from), NodeId(to), edge).unwrap();
        }
        graph
    }

    fn channels(px: u32) -> (u32, u32, u32) {
        ((px >> 16) & 0xff, (px >> 8) & 0xff, px & 0xff)
    }

    #[test]
    fn test_projection_fits_canvas() {
        let bounds = Bounds { min_lat: 36.0, max_lat: 36.1, min_lon: 3.0, max_lon: 3.1 };
        let projection = Projection::fit(&bounds, 400, 300, 20);
        let (x0, y0) = projection.project(&MapCoords::new(36.1, 3.0));
        let (x1, y1) = projection.project(&MapCoords::new(36.0, 3.1));
        assert!(x0 >= 20.0 && y0 >= 20.0);
        assert!(x1 <= 380.0 && y1 <= 280.0);
        assert!(x1 > x0 && y1 > y0);
        // north is up, aspect kept
        assert!((y1 - y0 - 260.0).abs() < 0.01);
    }

    #[test]
    fn test_projection_huge_padding() {
        let bounds = Bounds { min_lat: 36.0, max_lat: 36.1, min_lon: 3.0, max_lon: 3.1 };
        let (x, y) = Projection::fit(&bounds, 100, 100, u32::MAX).project(&MapCoords::new(36.05, 3.05));
        assert!(x.is_finite() && y.is_finite());
    }

    #[test]
    fn test_projection_single_point() {
        let bounds = Bounds { min_lat: 36.0, max_lat: 36.0, min_lon: 3.0, max_lon: 3.0 };
        let (x, y) = Projection::fit(&bounds, 100, 100, 10).project(&MapCoords::new(36.0, 3.0));
        assert_eq!((x, y), (50.0, 50.0));
    }

    #[test]
    fn test_route_is_highlighted() {
        let config = config();
        let graph = line_graph();
        let renderer = Renderer::without_labels(&config);
        let route = Route { nodes: vec![NodeId(1), NodeId(2)], length: 1.0 };
        let canvas = renderer.render(&graph, &route).unwrap();
        let projection = renderer.projection(&graph).unwrap();

        assert_eq!((canvas.width(), canvas.height()), (200, 100));

        let mid_route = MapCoords::new(36.0, 3.0025);
        let (x, y) = projection.project(&mid_route);
        let (r, g, b) = channels(canvas.pixel(x as i32, y as i32).unwrap());
        assert!(g > 0x60 && r < 0x20 && b < 0x20, "expected route colour, got {:?}", (r, g, b));

        let off_route = MapCoords::new(36.0, 3.0175);
        let (x, y) = projection.project(&off_route);
        let (r, g, b) = channels(canvas.pixel(x as i32, y as i32).unwrap());
        assert!(r == g && g == b && r > 0x40, "expected road colour, got {:?}", (r, g, b));

        let (r, g, b) = channels(canvas.pixel(1, 1).unwrap());
        assert_eq!((r, g, b), (0x11, 0x11, 0x11));
        assert_eq!(canvas.pixel(500, 1), None);
    }

    #[test]
    fn test_closed_way_is_fully_drawn() {
        use crate::data::osm::{Node, Way};
        use crate::data::OsmMapData;

        let nodes = [(1, 36.00, 3.00), (2, 36.00, 3.01), (3, 36.01, 3.01), (4, 36.01, 3.00), (5, 36.02, 3.01)]
            .into_iter()
            .map(|(id, lat, lon)| (id, Node { id, lat, lon, tags: Default::default() }))
            .collect();
        let way = |id, node_ids: &[u64]| Way {
            id,
            node_ids: node_ids.to_vec(),
            tags: [("highway".to_string(), "residential".to_string())].into_iter().collect(),
        };
        // The loop splits at node 3 into two segments that both join nodes 1 and 3.
        let data = OsmMapData { nodes, ways: vec![way(10, &[1, 2, 3, 4, 1]), way(11, &[3, 5])] };
        let graph = RoadGraph::from_osm(&data, false);
        assert_eq!(graph.edge_count(), 6);

        let config = AppConfig { road_width: 3.0, ..config() };
        let renderer = Renderer::without_labels(&config);
        let canvas = renderer.render(&graph, &Route { nodes: vec![NodeId(5)], length: 0.0 }).unwrap();
        let projection = renderer.projection(&graph).unwrap();

        for coords in [MapCoords::new(36.00, 3.005), MapCoords::new(36.01, 3.005)] {
            let (x, y) = projection.project(&coords);
            let (r, g, b) = channels(canvas.pixel(x as i32, y as i32).unwrap());
            assert!(r == g && g == b && r > 0x40, "expected road colour at {:?}, got {:?}", coords, (r, g, b));
        }
    }

    #[test]
    fn test_png_output_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("route.png");
        let graph = line_graph();
        let renderer = Renderer::without_labels(&config());

        let first = renderer.render(&graph, &Route { nodes: vec![NodeId(1), NodeId(2)], length: 1.0 }).unwrap();
        first.save(&path).unwrap();
        let second = renderer.render(&graph, &Route { nodes: vec![NodeId(2), NodeId(3)], length: 1.0 }).unwrap();
        second.save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, second.encode_png().unwrap());
        assert_ne!(bytes, first.encode_png().unwrap());
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);

        let decoder = png::Decoder::new(std::fs::File::open(&path).unwrap());
        let reader = decoder.read_info().unwrap();
        assert_eq!((reader.info().width, reader.info().height), (200, 100));
    }

    #[test]
    fn test_unpremultiply() {
        assert_eq!(unpremultiply(0xff008000), [0x00, 0x80, 0x00, 0xff]);
        assert_eq!(unpremultiply(0x80400000), [0x80, 0x00, 0x00, 0x80]);
        assert_eq!(unpremultiply(0x00000000), [0, 0, 0, 0]);
    }
}
