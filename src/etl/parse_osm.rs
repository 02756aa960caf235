use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str;

use log::warn;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use xz::bufread::XzDecoder;

use crate::data::osm::{Node, OsmId, Tags, Way};
use crate::data::OsmMapData;
use crate::errors::{Error, Result};

enum ParserState {
    Top,
    Node(Node),
    Way(Way),
    Relation,
    Remark(String),
}

fn parse_id(value: &[u8]) -> Result<OsmId> {
    Ok(str::from_utf8(value)?.parse()?)
}

fn parse_node(el: &BytesStart) -> Result<Node> {
    let mut id: Option<OsmId> = None;
    let mut lat: Option<f64> = None;
    let mut lon: Option<f64> = None;

    for attribute_res in el.attributes() {
        let attribute = attribute_res?;
        match attribute.key.as_ref() {
            b"id" => id = Some(parse_id(&attribute.value)?),
            b"lat" => lat = Some(str::from_utf8(&attribute.value)?.parse()?),
            b"lon" => lon = Some(str::from_utf8(&attribute.value)?.parse()?),
            _ => (),
        }
    }

    match (id, lat, lon) {
        (Some(id), Some(lat), Some(lon)) => Ok(Node { id, lat, lon, tags: Tags::new() }),
        _ => Err(Error::parse("Node without id, lat or lon")),
    }
}

fn parse_way(el: &BytesStart) -> Result<Way> {
    for attribute_res in el.attributes() {
        let attribute = attribute_res?;
        if attribute.key.as_ref() == b"id" {
            return Ok(Way {
                id: parse_id(&attribute.value)?,
                node_ids: Vec::new(),
                tags: Tags::new(),
            });
        }
    }
    Err(Error::parse("Way without id"))
}

fn parse_tag(el: &BytesStart) -> Result<(String, String)> {
    let mut key: Option<String> = None;
    let mut value: Option<String> = None;
    for attribute_res in el.attributes() {
        let attribute = attribute_res?;
        match attribute.key.as_ref() {
            b"k" => key = Some(attribute.unescape_value()?.into_owned()),
            b"v" => value = Some(attribute.unescape_value()?.into_owned()),
            _ => (),
        }
    }
    match (key, value) {
        (Some(key), Some(value)) => Ok((key, value)),
        _ => Err(Error::parse("Tag without k or v")),
    }
}

fn parse_nd(el: &BytesStart) -> Result<OsmId> {
    for attribute_res in el.attributes() {
        let attribute = attribute_res?;
        if attribute.key.as_ref() == b"ref" {
            return parse_id(&attribute.value);
        }
    }
    Err(Error::parse("nd without ref"))
}

/// Handles an empty element (`<x/>`) or the opening tag of a child element.
fn handle_child(state: &mut ParserState, el: &BytesStart) -> Result<()> {
    match (state, el.name().as_ref()) {
        (ParserState::Node(node), b"tag") => {
            let (k, v) = parse_tag(el)?;
            node.tags.insert(k, v);
        },
        (ParserState::Way(way), b"tag") => {
            let (k, v) = parse_tag(el)?;
            way.tags.insert(k, v);
        },
        (ParserState::Way(way), b"nd") => way.node_ids.push(parse_nd(el)?),
        _ => (),
    }
    Ok(())
}

/// Parses OSM XML (as written by osmosis, JOSM or returned by Overpass) into
/// nodes and ways. Relations are skipped. Overpass `<remark>` elements carry
/// server-side errors and are turned into provider errors.
pub fn parse_osm<R: BufRead>(input: R) -> Result<OsmMapData> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut output = OsmMapData::default();
    let mut state = ParserState::Top;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => match (&state, e.name().as_ref()) {
                (ParserState::Top, b"node") => state = ParserState::Node(parse_node(&e)?),
                (ParserState::Top, b"way") => state = ParserState::Way(parse_way(&e)?),
                (ParserState::Top, b"relation") => state = ParserState::Relation,
                (ParserState::Top, b"remark") => state = ParserState::Remark(String::new()),
                _ => handle_child(&mut state, &e)?,
            },
            Event::Empty(e) => match (&state, e.name().as_ref()) {
                (ParserState::Top, b"node") => {
                    let node = parse_node(&e)?;
                    output.nodes.insert(node.id, node);
                },
                (ParserState::Top, b"way") => output.ways.push(parse_way(&e)?),
                _ => handle_child(&mut state, &e)?,
            },
            Event::Text(e) => {
                if let ParserState::Remark(remark) = &mut state {
                    remark.push_str(&e.unescape()?);
                }
            },
            Event::End(e) => {
                let closes_top_level = matches!(
                    (&state, e.name().as_ref()),
                    (ParserState::Node(_), b"node")
                        | (ParserState::Way(_), b"way")
                        | (ParserState::Relation, b"relation")
                        | (ParserState::Remark(_), b"remark")
                );
                if closes_top_level {
                    match std::mem::replace(&mut state, ParserState::Top) {
                        ParserState::Node(node) => {
                            output.nodes.insert(node.id, node);
                        },
                        ParserState::Way(way) => output.ways.push(way),
                        ParserState::Remark(remark) => {
                            return Err(Error::provider(format!("Map service reported: {}", remark.trim())));
                        },
                        _ => (),
                    }
                }
            },
            // Declarations, comments and processing instructions carry no map data.
            _ => (),
        }
        buf.clear();
    }

    if output.nodes.is_empty() {
        warn!(ways = output.ways.len(); "OSM document contains no nodes");
    }
    Ok(output)
}

/// Reads an `.osm` file, transparently decompressing `.xz` files.
pub fn read_osm_file(path: &Path) -> Result<OsmMapData> {
    let file_reader = BufReader::new(fs::File::open(path)?);
    if path.extension().map(|ext| ext == "xz").unwrap_or(false) {
        parse_osm(BufReader::new(XzDecoder::new(file_reader)))
    } else {
        parse_osm(file_reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="Overpass API">
  <note>The data included in this document is from www.openstreetmap.org.</note>
  <meta osm_base="2024-01-01T00:00:00Z"/>
  <node id="1" lat="36.7700" lon="3.0500">
    <tag k="name" v="Place &amp; Square"/>
  </node>
  <node id="2" lat="36.7700" lon="3.0520" version="3" user="someone"/>
  <way id="100">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="residential"/>
    <tag k="name" v="Rue Larbi Ben M'hidi"/>
  </way>
  <relation id="500">
    <member type="way" ref="100" role=""/>
    <tag k="type" v="route"/>
  </relation>
</osm>"#;

    #[test]
    fn test_parse_nodes_ways_and_tags() {
        let data = parse_osm(SAMPLE.as_bytes()).unwrap();

        assert_eq!(data.nodes.len(), 2);
        assert_eq!(data.nodes[&1].tags.get("name").map(String::as_str), Some("Place & Square"));
        assert_eq!(data.nodes[&2].lon, 3.052);
        assert_eq!(data.ways.len(), 1);
        assert_eq!(data.ways[0].node_ids, vec![1, 2]);
        assert_eq!(data.ways[0].tag("highway"), Some("residential"));
        assert_eq!(data.ways[0].tag("type"), None);
    }

    #[test]
    fn test_remark_is_provider_error() {
        let xml = r#"<osm><remark> runtime error: Query timed out </remark></osm>"#;
        let err = parse_osm(xml.as_bytes()).unwrap_err();
        assert!(err.is(ErrorKind::Provider));
        assert!(err.message.contains("Query timed out"));
    }

    #[test]
    fn test_node_without_coordinates_is_rejected() {
        let xml = r#"<osm><node id="1" lat="36.0"/></osm>"#;
        assert!(parse_osm(xml.as_bytes()).unwrap_err().is(ErrorKind::Parse));
    }
}
